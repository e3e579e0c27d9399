//! Attempt Service: the single write path for `POST
//! /organizations/{orgId}/accesses/attempts`.
//!
//! Orchestrates the idempotency check, device/zone/candidate-rule reads,
//! the pure engine evaluation, and the transactional persist of
//! attempt+decision+command+outbox rows. No HTTP concerns live here —
//! `access-daemon` maps [`RegisterAttemptError`] onto the wire.

use access_db::attempt::{
    fetch_command_by_attempt, fetch_decision_by_attempt, find_attempt_by_idempotency_key,
    insert_attempt, insert_command, insert_decision, NewAttempt, NewCommand, NewDecision,
};
use access_db::is_unique_violation;
use access_engine::{evaluate, DecisionContext, DefaultDecision};
use access_outbox::write_event;
use access_rules::RuleCandidatesCache;
use access_schemas::events::{AttemptRegistered, CommandEmitted, DecisionTaken};
use access_schemas::{
    AttemptResult, CommandView, DecisionResult, DecisionView, RegisterAttemptRequest,
};
use access_zone::ZoneCache;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegisterAttemptError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    /// An idempotency race: a concurrent insert under the same
    /// `(org_id, idempotency_key)` won, and this request is the loser that
    /// replayed the winner's row. Distinct from the plain, pre-insert
    /// replay path, which returns the winner's row as a 200.
    #[error("idempotency key already registered by a concurrent request")]
    Conflict(Box<AttemptResult>),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Parse the config-layer `default_decision` string, falling back to ALLOW
/// on anything unrecognized rather than failing every attempt for a typo in
/// configuration.
pub fn parse_default_decision(s: &str) -> DefaultDecision {
    match s.to_ascii_uppercase().as_str() {
        "DENY" => DefaultDecision::Deny,
        _ => DefaultDecision::Allow,
    }
}

/// Collaborators the service needs, bundled so `access-daemon` constructs
/// this once at startup and clones it per request.
#[derive(Clone)]
pub struct AttemptService {
    pub pool: sqlx::PgPool,
    pub zone_cache: ZoneCache,
    pub rule_cache: RuleCandidatesCache,
    pub default_decision: DefaultDecision,
}

impl AttemptService {
    pub fn new(
        pool: sqlx::PgPool,
        zone_cache: ZoneCache,
        rule_cache: RuleCandidatesCache,
        default_decision: DefaultDecision,
    ) -> Self {
        Self {
            pool,
            zone_cache,
            rule_cache,
            default_decision,
        }
    }

    /// Register one access attempt end to end (steps 1-6).
    pub async fn register_attempt(
        &self,
        org_id: Uuid,
        req: RegisterAttemptRequest,
    ) -> Result<AttemptResult, RegisterAttemptError> {
        if req.idempotency_key.trim().is_empty() {
            return Err(RegisterAttemptError::Validation(
                "idempotency_key must not be empty".to_string(),
            ));
        }

        if let Some(existing) = self.replay_if_known(org_id, &req.idempotency_key).await? {
            return Ok(existing);
        }

        let device = access_db::device::fetch_device_snapshot(&self.pool, org_id, req.device_id)
            .await?
            .ok_or_else(|| RegisterAttemptError::NotFound("device not found".to_string()))?;

        if let Some(requested_area) = req.area_id {
            if requested_area != device.area_id {
                return Err(RegisterAttemptError::Validation(
                    "area_id does not match the device's area".to_string(),
                ));
            }
        }

        let occurred_at_utc = req.occurred_at_utc.unwrap_or_else(Utc::now);

        let effective_zone = self
            .zone_cache
            .zone_for_area(&self.pool, org_id, device.area_id)
            .await?;

        let candidate_rules = self
            .rule_cache
            .get(&self.pool, org_id, device.area_id, req.subject_type)
            .await?;

        let attempt_id = Uuid::new_v4();

        let ctx = DecisionContext {
            org_id,
            attempt_id,
            area_id: device.area_id,
            device: device.clone(),
            subject_type: Some(req.subject_type),
            pass_direction: req.pass_direction,
            auth_method: req.auth_method,
            occurred_at_utc,
            effective_zone,
            candidate_rules,
            default_decision: self.default_decision,
            now_utc: Utc::now(),
        };

        let decision = evaluate(&ctx);

        match self
            .persist(&req, org_id, attempt_id, &device, occurred_at_utc, &decision)
            .await
        {
            Ok(result) => Ok(result),
            Err(err) => {
                if let Some(sqlx_err) = err.downcast_ref::<sqlx::Error>() {
                    if is_unique_violation(sqlx_err, "access_attempts_org_id_idempotency_key_key") {
                        tracing::debug!(
                            org_id = %org_id,
                            idempotency_key = %req.idempotency_key,
                            "idempotency race on insert, replaying existing attempt"
                        );
                        if let Some(existing) =
                            self.replay_if_known(org_id, &req.idempotency_key).await?
                        {
                            return Err(RegisterAttemptError::Conflict(Box::new(existing)));
                        }
                    }
                }
                Err(RegisterAttemptError::Internal(err))
            }
        }
    }

    async fn replay_if_known(
        &self,
        org_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<AttemptResult>, RegisterAttemptError> {
        let Some(attempt) =
            find_attempt_by_idempotency_key(&self.pool, org_id, idempotency_key).await?
        else {
            return Ok(None);
        };

        let decision = fetch_decision_by_attempt(&self.pool, attempt.id)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!("attempt {} exists without a decision row", attempt.id)
            })?;
        let command = fetch_command_by_attempt(&self.pool, attempt.id).await?;

        Ok(Some(AttemptResult {
            attempt_id: attempt.id,
            org_id: attempt.org_id,
            area_id: attempt.area_id,
            device_id: attempt.device_id,
            decision: DecisionView {
                result: DecisionResult::parse(&decision.result).ok_or_else(|| {
                    RegisterAttemptError::Internal(anyhow::anyhow!(
                        "unrecognized decision result {}",
                        decision.result
                    ))
                })?,
                reason_code: decision.reason_code,
                reason_detail: decision.reason_detail,
                decided_at_utc: decision.decided_at_utc,
                expires_at_utc: decision.expires_at_utc,
            },
            command: command.map(|c| CommandView {
                id: c.id,
                command: access_schemas::DeviceCommandKind::parse(&c.command).unwrap_or(
                    access_schemas::DeviceCommandKind::DenyWithSignal,
                ),
                message: c.message,
            }),
        }))
    }

    async fn persist(
        &self,
        req: &RegisterAttemptRequest,
        org_id: Uuid,
        attempt_id: Uuid,
        device: &access_schemas::DeviceSnapshot,
        occurred_at_utc: chrono::DateTime<Utc>,
        decision: &access_engine::DecisionOutput,
    ) -> anyhow::Result<AttemptResult> {
        let mut tx = self.pool.begin().await?;

        insert_attempt(
            &mut tx,
            &NewAttempt {
                id: attempt_id,
                org_id,
                device_id: device.id,
                area_id: device.area_id,
                subject_type: req.subject_type.as_str().to_string(),
                pass_direction: req.pass_direction.as_str().to_string(),
                auth_method: req.auth_method.as_str().to_string(),
                subject_reference: req.subject_reference.clone(),
                idempotency_key: req.idempotency_key.clone(),
                occurred_at_utc,
            },
        )
        .await?;

        write_event(
            &mut tx,
            &AttemptRegistered {
                org_id,
                attempt_id,
                device_id: device.id,
                area_id: device.area_id,
                occurred_at_utc,
            },
        )
        .await?;

        let decision_id = Uuid::new_v4();
        insert_decision(
            &mut tx,
            &NewDecision {
                id: decision_id,
                org_id,
                attempt_id,
                result: decision.result.as_str().to_string(),
                reason_code: decision.reason_code.clone(),
                reason_detail: decision.reason_detail.clone(),
                decided_at_utc: decision.decided_at_utc,
                expires_at_utc: decision.expires_at_utc,
            },
        )
        .await?;

        write_event(
            &mut tx,
            &DecisionTaken {
                org_id,
                attempt_id,
                decision_id,
                result: decision.result.as_str().to_string(),
                reason_code: decision.reason_code.clone(),
                decided_at_utc: decision.decided_at_utc,
            },
        )
        .await?;

        let command_view = if let Some(command_kind) = decision.suggested_command {
            let command_id = Uuid::new_v4();
            let idempotency_key = format!("cmd:{attempt_id}");
            insert_command(
                &mut tx,
                &NewCommand {
                    id: command_id,
                    org_id,
                    attempt_id,
                    device_id: device.id,
                    command: command_kind.as_str().to_string(),
                    message: decision.suggested_message.clone(),
                    idempotency_key,
                    sent_at_utc: decision.decided_at_utc,
                },
            )
            .await?;

            write_event(
                &mut tx,
                &CommandEmitted {
                    org_id,
                    attempt_id,
                    command_id,
                    device_id: device.id,
                    command: command_kind.as_str().to_string(),
                    sent_at_utc: decision.decided_at_utc,
                },
            )
            .await?;

            Some(CommandView {
                id: command_id,
                command: command_kind,
                message: decision.suggested_message.clone(),
            })
        } else {
            None
        };

        tx.commit().await?;

        Ok(AttemptResult {
            attempt_id,
            org_id,
            area_id: device.area_id,
            device_id: device.id,
            decision: DecisionView {
                result: decision.result,
                reason_code: decision.reason_code.clone(),
                reason_detail: decision.reason_detail.clone(),
                decided_at_utc: decision.decided_at_utc,
                expires_at_utc: decision.expires_at_utc,
            },
            command: command_view,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_default_decision_falls_back_to_allow() {
        assert_eq!(parse_default_decision("ALLOW"), DefaultDecision::Allow);
        assert_eq!(parse_default_decision("deny"), DefaultDecision::Deny);
        assert_eq!(parse_default_decision("nonsense"), DefaultDecision::Allow);
    }
}
