//! Decision Engine: pure function `DecisionContext -> DecisionOutput`.
//!
//! No I/O, no wall-clock reads, no randomness — every input the evaluation
//! needs (candidate rules, the effective timezone, "now") is provided by the
//! caller.

use access_schemas::{
    AuthMethod, DecisionResult, DeviceCommandKind, DeviceSnapshot, PassDirection, RuleAction,
    RuleSnapshot, SubjectType,
};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

/// Per-organization knob: what to decide when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultDecision {
    Allow,
    Deny,
}

impl Default for DefaultDecision {
    fn default() -> Self {
        DefaultDecision::Allow
    }
}

/// Everything the engine needs to decide one access attempt. Built entirely
/// by the caller (`access-attempt`) before invocation — the engine never
/// reaches back into storage.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub org_id: Uuid,
    pub attempt_id: Uuid,
    pub area_id: Uuid,
    pub device: DeviceSnapshot,
    pub subject_type: Option<SubjectType>,
    pub pass_direction: PassDirection,
    pub auth_method: AuthMethod,
    pub occurred_at_utc: DateTime<Utc>,
    pub effective_zone: Tz,
    /// ACTIVE rules for `(org_id, area_id, subject_type)`, as served by the
    /// Rule-Candidates Cache — already ordered `priority DESC,
    /// updated_at_utc DESC` but not yet filtered against this intent.
    pub candidate_rules: Vec<RuleSnapshot>,
    pub default_decision: DefaultDecision,
    /// Decision instant, injected by the caller's clock rather than
    /// read from the system clock here, so the engine stays deterministic.
    pub now_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutput {
    pub result: DecisionResult,
    pub reason_code: String,
    pub reason_detail: Option<String>,
    pub decided_at_utc: DateTime<Utc>,
    pub suggested_command: Option<DeviceCommandKind>,
    pub suggested_message: Option<String>,
    pub expires_at_utc: Option<DateTime<Utc>>,
}

fn precondition_failure(ctx: &DecisionContext) -> bool {
    ctx.org_id.is_nil()
        || ctx.attempt_id.is_nil()
        || ctx.area_id.is_nil()
        || ctx.device.id.is_nil()
        || ctx.device.org_id != ctx.org_id
        || ctx.device.area_id != ctx.area_id
}

fn policy_error(ctx: &DecisionContext) -> DecisionOutput {
    DecisionOutput {
        result: DecisionResult::Error,
        reason_code: "POLICY_ERROR".to_string(),
        reason_detail: Some("decision context was incomplete".to_string()),
        decided_at_utc: ctx.now_utc,
        suggested_command: None,
        suggested_message: None,
        expires_at_utc: None,
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// Whether `t` falls within the daily window `[from, to]`, allowing
/// wrap-around when `from > to` (the window spans midnight).
fn daily_window_contains(from: NaiveTime, to: NaiveTime, t: NaiveTime) -> bool {
    if from <= to {
        from <= t && t <= to
    } else {
        t >= from || t <= to
    }
}

/// Rule matching: does `rule` match this attempt's matchers and fall
/// within its validity/daily windows?
fn rule_matches(rule: &RuleSnapshot, ctx: &DecisionContext) -> bool {
    if let Some(device_id) = rule.device_id {
        if device_id != ctx.device.id {
            return false;
        }
    }
    if let Some(pass_direction) = rule.pass_direction {
        if pass_direction != ctx.pass_direction {
            return false;
        }
    }
    if let Some(auth_method) = rule.auth_method {
        if auth_method != ctx.auth_method {
            return false;
        }
    }

    if let (Some(from), Some(to)) = (rule.valid_from_utc, rule.valid_to_utc) {
        if ctx.occurred_at_utc < from || ctx.occurred_at_utc > to {
            return false;
        }
    }

    if let (Some(from_s), Some(to_s)) = (&rule.from_local, &rule.to_local) {
        let (Some(from), Some(to)) = (parse_hhmm(from_s), parse_hhmm(to_s)) else {
            // Unparseable stored window: fail closed, treat as non-matching
            // rather than letting a malformed row silently admit everything.
            return false;
        };
        let local_time = ctx.occurred_at_utc.with_timezone(&ctx.effective_zone).time();
        if !daily_window_contains(from, to, local_time) {
            return false;
        }
    }

    true
}

fn order_key(rule: &RuleSnapshot) -> (i32, u32, DateTime<Utc>) {
    (rule.priority, rule.specificity(), rule.updated_at_utc)
}

fn outcome_for_action(
    action: RuleAction,
    message: Option<String>,
    ctx: &DecisionContext,
) -> DecisionOutput {
    match action {
        RuleAction::Allow => DecisionOutput {
            result: DecisionResult::Allow,
            reason_code: "RULE_MATCH".to_string(),
            reason_detail: message.clone(),
            decided_at_utc: ctx.now_utc,
            suggested_command: Some(DeviceCommandKind::OpenDoor),
            suggested_message: message,
            expires_at_utc: None,
        },
        RuleAction::Deny => DecisionOutput {
            result: DecisionResult::Deny,
            reason_code: "RULE_MATCH".to_string(),
            reason_detail: message.clone(),
            decided_at_utc: ctx.now_utc,
            suggested_command: Some(DeviceCommandKind::DenyWithSignal),
            suggested_message: message,
            expires_at_utc: None,
        },
    }
}

fn default_outcome(ctx: &DecisionContext) -> DecisionOutput {
    match ctx.default_decision {
        DefaultDecision::Allow => DecisionOutput {
            result: DecisionResult::Allow,
            reason_code: "ALLOW".to_string(),
            reason_detail: None,
            decided_at_utc: ctx.now_utc,
            suggested_command: Some(DeviceCommandKind::OpenDoor),
            suggested_message: None,
            expires_at_utc: None,
        },
        DefaultDecision::Deny => DecisionOutput {
            result: DecisionResult::Deny,
            reason_code: "DEFAULT_DENY".to_string(),
            reason_detail: None,
            decided_at_utc: ctx.now_utc,
            suggested_command: Some(DeviceCommandKind::DenyWithSignal),
            suggested_message: None,
            expires_at_utc: None,
        },
    }
}

/// Evaluate one access attempt against its candidate rule set.
pub fn evaluate(ctx: &DecisionContext) -> DecisionOutput {
    if precondition_failure(ctx) {
        return policy_error(ctx);
    }

    if !ctx.device.active {
        return DecisionOutput {
            result: DecisionResult::Deny,
            reason_code: "DEVICE_INACTIVE".to_string(),
            reason_detail: Some("the device is not active".to_string()),
            decided_at_utc: ctx.now_utc,
            suggested_command: Some(DeviceCommandKind::DenyWithSignal),
            suggested_message: None,
            expires_at_utc: None,
        };
    }

    match ctx.subject_type {
        None | Some(SubjectType::Unknown) => {
            return DecisionOutput {
                result: DecisionResult::Deny,
                reason_code: "SUBJECT_UNKNOWN".to_string(),
                reason_detail: Some("subject type is absent or UNKNOWN".to_string()),
                decided_at_utc: ctx.now_utc,
                suggested_command: Some(DeviceCommandKind::DenyWithSignal),
                suggested_message: None,
                expires_at_utc: None,
            };
        }
        Some(_) => {}
    }

    let mut surviving: Vec<&RuleSnapshot> = ctx
        .candidate_rules
        .iter()
        .filter(|r| rule_matches(r, ctx))
        .collect();

    surviving.sort_by(|a, b| {
        order_key(b)
            .0
            .cmp(&order_key(a).0)
            .then(order_key(b).1.cmp(&order_key(a).1))
            .then(order_key(b).2.cmp(&order_key(a).2))
    });

    match surviving.first() {
        Some(rule) => outcome_for_action(rule.action, rule.message.clone(), ctx),
        None => default_outcome(ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn device(active: bool, org_id: Uuid, area_id: Uuid) -> DeviceSnapshot {
        DeviceSnapshot {
            id: Uuid::new_v4(),
            org_id,
            area_id,
            name: "Turnstile 1".to_string(),
            model: None,
            external_id: None,
            active,
        }
    }

    fn base_ctx(device: DeviceSnapshot, org_id: Uuid, area_id: Uuid) -> DecisionContext {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 8, 0, 0).unwrap();
        DecisionContext {
            org_id,
            attempt_id: Uuid::new_v4(),
            area_id,
            device,
            subject_type: Some(SubjectType::Resident),
            pass_direction: PassDirection::In,
            auth_method: AuthMethod::Card,
            occurred_at_utc: now,
            effective_zone: chrono_tz::UTC,
            candidate_rules: Vec::new(),
            default_decision: DefaultDecision::Allow,
            now_utc: now,
        }
    }

    #[test]
    fn default_allow_when_no_rules_match() {
        let org_id = Uuid::new_v4();
        let area_id = Uuid::new_v4();
        let ctx = base_ctx(device(true, org_id, area_id), org_id, area_id);
        let out = evaluate(&ctx);
        assert_eq!(out.result, DecisionResult::Allow);
        assert_eq!(out.reason_code, "ALLOW");
        assert_eq!(out.suggested_command, Some(DeviceCommandKind::OpenDoor));
    }

    #[test]
    fn inactive_device_denies_before_rule_evaluation() {
        let org_id = Uuid::new_v4();
        let area_id = Uuid::new_v4();
        let ctx = base_ctx(device(false, org_id, area_id), org_id, area_id);
        let out = evaluate(&ctx);
        assert_eq!(out.result, DecisionResult::Deny);
        assert_eq!(out.reason_code, "DEVICE_INACTIVE");
        assert_eq!(
            out.suggested_command,
            Some(DeviceCommandKind::DenyWithSignal)
        );
    }

    #[test]
    fn unknown_subject_denies() {
        let org_id = Uuid::new_v4();
        let area_id = Uuid::new_v4();
        let mut ctx = base_ctx(device(true, org_id, area_id), org_id, area_id);
        ctx.subject_type = Some(SubjectType::Unknown);
        let out = evaluate(&ctx);
        assert_eq!(out.result, DecisionResult::Deny);
        assert_eq!(out.reason_code, "SUBJECT_UNKNOWN");
    }

    #[test]
    fn missing_subject_denies() {
        let org_id = Uuid::new_v4();
        let area_id = Uuid::new_v4();
        let mut ctx = base_ctx(device(true, org_id, area_id), org_id, area_id);
        ctx.subject_type = None;
        let out = evaluate(&ctx);
        assert_eq!(out.result, DecisionResult::Deny);
        assert_eq!(out.reason_code, "SUBJECT_UNKNOWN");
    }

    fn rule(
        org_id: Uuid,
        area_id: Uuid,
        action: RuleAction,
        priority: i32,
        from_local: Option<&str>,
        to_local: Option<&str>,
    ) -> RuleSnapshot {
        RuleSnapshot {
            id: Uuid::new_v4(),
            org_id,
            area_id,
            subject_type: SubjectType::Resident,
            device_id: None,
            pass_direction: None,
            auth_method: None,
            action,
            valid_from_utc: None,
            valid_to_utc: None,
            from_local: from_local.map(String::from),
            to_local: to_local.map(String::from),
            priority,
            state: access_schemas::RuleState::Active,
            message: None,
            updated_at_utc: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn overnight_daily_window_denies_inside_and_allows_outside() {
        // 03:00 Bogota local is inside a 22:00-06:00 DENY window.
        let org_id = Uuid::new_v4();
        let area_id = Uuid::new_v4();
        let mut ctx = base_ctx(device(true, org_id, area_id), org_id, area_id);
        ctx.effective_zone = chrono_tz::America::Bogota;
        ctx.occurred_at_utc = Utc.with_ymd_and_hms(2025, 1, 15, 8, 0, 0).unwrap(); // 03:00 local
        ctx.now_utc = ctx.occurred_at_utc;
        ctx.candidate_rules = vec![rule(
            org_id,
            area_id,
            RuleAction::Deny,
            0,
            Some("22:00"),
            Some("06:00"),
        )];

        let out = evaluate(&ctx);
        assert_eq!(out.result, DecisionResult::Deny);
        assert_eq!(out.reason_code, "RULE_MATCH");

        // 07:00 local is outside the window -> falls through to default ALLOW.
        ctx.occurred_at_utc = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        ctx.now_utc = ctx.occurred_at_utc;
        let out2 = evaluate(&ctx);
        assert_eq!(out2.result, DecisionResult::Allow);
        assert_eq!(out2.reason_code, "ALLOW");
    }

    #[test]
    fn higher_priority_rule_wins_over_specificity() {
        let org_id = Uuid::new_v4();
        let area_id = Uuid::new_v4();
        let mut ctx = base_ctx(device(true, org_id, area_id), org_id, area_id);
        let mut specific_low_priority = rule(org_id, area_id, RuleAction::Deny, 0, None, None);
        specific_low_priority.device_id = Some(ctx.device.id);
        let general_high_priority = rule(org_id, area_id, RuleAction::Allow, 10, None, None);
        ctx.candidate_rules = vec![specific_low_priority, general_high_priority];

        let out = evaluate(&ctx);
        assert_eq!(out.result, DecisionResult::Allow, "priority DESC sorts first");
    }

    #[test]
    fn specificity_breaks_priority_ties() {
        let org_id = Uuid::new_v4();
        let area_id = Uuid::new_v4();
        let mut ctx = base_ctx(device(true, org_id, area_id), org_id, area_id);
        let general = rule(org_id, area_id, RuleAction::Allow, 5, None, None);
        let mut specific = rule(org_id, area_id, RuleAction::Deny, 5, None, None);
        specific.device_id = Some(ctx.device.id);
        ctx.candidate_rules = vec![general, specific];

        let out = evaluate(&ctx);
        assert_eq!(
            out.result,
            DecisionResult::Deny,
            "same priority -> higher specificity wins"
        );
    }

    #[test]
    fn default_deny_config_flips_no_match_outcome() {
        let org_id = Uuid::new_v4();
        let area_id = Uuid::new_v4();
        let mut ctx = base_ctx(device(true, org_id, area_id), org_id, area_id);
        ctx.default_decision = DefaultDecision::Deny;
        let out = evaluate(&ctx);
        assert_eq!(out.result, DecisionResult::Deny);
        assert_eq!(out.reason_code, "DEFAULT_DENY");
    }

    #[test]
    fn policy_error_on_incomplete_context() {
        let org_id = Uuid::new_v4();
        let area_id = Uuid::new_v4();
        let mut ctx = base_ctx(device(true, org_id, area_id), org_id, area_id);
        ctx.device.area_id = Uuid::new_v4(); // now mismatched with ctx.area_id
        let out = evaluate(&ctx);
        assert_eq!(out.result, DecisionResult::Error);
        assert_eq!(out.reason_code, "POLICY_ERROR");
    }

    #[test]
    fn determinism_same_input_same_output() {
        let org_id = Uuid::new_v4();
        let area_id = Uuid::new_v4();
        let ctx = base_ctx(device(true, org_id, area_id), org_id, area_id);
        assert_eq!(evaluate(&ctx), evaluate(&ctx));
    }
}
