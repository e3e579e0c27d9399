//! `eventKey` derivation — the dedup key every audit row
//! is uniquely keyed on, alongside `org_id`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Event types that carry a domain-minted `event_id` of their own; these use
/// it directly. Every other whitelisted type is keyed by its aggregate id.
fn has_natural_event_id(event_type: &str) -> bool {
    matches!(
        event_type,
        "access.policy.PolicyChanged" | "access.policy.ChangeRejected"
    )
}

pub fn derive_event_key(
    org_id: Uuid,
    event_type: &str,
    event_id: Option<Uuid>,
    aggregate_id: &str,
    occurred_at_utc: DateTime<Utc>,
) -> String {
    if has_natural_event_id(event_type) {
        if let Some(event_id) = event_id {
            return format!("{org_id}|{event_type}|{event_id}");
        }
    }

    if !aggregate_id.is_empty() && aggregate_id != "UNKNOWN" {
        return format!("{org_id}|{event_type}|{aggregate_id}");
    }

    format!("{org_id}|{event_type}|{aggregate_id}|{}", occurred_at_utc.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_changed_keys_on_its_own_event_id() {
        let org_id = Uuid::new_v4();
        let event_id = Uuid::new_v4();
        let key = derive_event_key(org_id, "access.policy.PolicyChanged", Some(event_id), "rule-ignored", Utc::now());
        assert_eq!(key, format!("{org_id}|access.policy.PolicyChanged|{event_id}"));
    }

    #[test]
    fn attempt_registered_keys_on_aggregate_id() {
        let org_id = Uuid::new_v4();
        let attempt_id = Uuid::new_v4().to_string();
        let key = derive_event_key(org_id, "access.attempt.AttemptRegistered", None, &attempt_id, Utc::now());
        assert_eq!(key, format!("{org_id}|access.attempt.AttemptRegistered|{attempt_id}"));
    }

    #[test]
    fn falls_back_to_timestamp_when_no_id_is_usable() {
        let org_id = Uuid::new_v4();
        let now = Utc::now();
        let key = derive_event_key(org_id, "access.unknown.Mystery", None, "UNKNOWN", now);
        assert_eq!(key, format!("{org_id}|access.unknown.Mystery|UNKNOWN|{}", now.to_rfc3339()));
    }
}
