//! Rule CRUD service (/): validation, duplicate detection,
//! state transitions, and `PolicyChanged`/`ChangeRejected` event emission.

use access_db::rules::{fetch_rule, insert_rule, update_rule_state, NewRule, RuleRow};
use access_outbox::write_event;
use access_rules::{validate_local_window, RuleCandidatesCache, RuleStore};
use access_schemas::events::{ChangeRejected, PolicyChanged};
use access_schemas::RuleChangeType;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RuleCrudError {
    #[error("{0}")]
    Validation(String),
    #[error("rule not found")]
    NotFound,
    #[error("a rule with the same matchers and windows already exists")]
    Conflict,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RuleCrudError {
    fn http_status(&self) -> u16 {
        match self {
            RuleCrudError::Validation(_) => 400,
            RuleCrudError::NotFound => 404,
            RuleCrudError::Conflict => 409,
            RuleCrudError::Internal(_) => 500,
        }
    }

    fn reason_code(&self) -> &'static str {
        match self {
            RuleCrudError::Validation(_) => "VALIDATION_ERROR",
            RuleCrudError::NotFound => "NOT_FOUND",
            RuleCrudError::Conflict => "CONFLICT",
            RuleCrudError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRuleInput {
    pub area_id: Uuid,
    pub subject_type: String,
    pub device_id: Option<Uuid>,
    pub pass_direction: Option<String>,
    pub auth_method: Option<String>,
    pub action: String,
    pub valid_from_utc: Option<DateTime<Utc>>,
    pub valid_to_utc: Option<DateTime<Utc>>,
    pub from_local: Option<String>,
    pub to_local: Option<String>,
    pub priority: i32,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SetRuleStateInput {
    pub rule_id: Uuid,
    pub area_id: Option<Uuid>,
    pub target_state: &'static str,
    pub change_type: RuleChangeType,
}

#[derive(Clone)]
pub struct RuleCrudService {
    pub pool: sqlx::PgPool,
    pub store: RuleStore,
    pub cache: RuleCandidatesCache,
}

impl RuleCrudService {
    pub fn new(pool: sqlx::PgPool, cache: RuleCandidatesCache) -> Self {
        Self {
            pool,
            store: RuleStore,
            cache,
        }
    }

    fn validate(input: &NewRuleInput) -> Result<(), RuleCrudError> {
        validate_local_window(input.from_local.as_deref(), input.to_local.as_deref())
            .map_err(|e| RuleCrudError::Validation(e.to_string()))?;

        if let (Some(from), Some(to)) = (&input.from_local, &input.to_local) {
            if from == to {
                return Err(RuleCrudError::Validation(
                    "from_local and to_local must not be equal".to_string(),
                ));
            }
        }

        if let (Some(from), Some(to)) = (input.valid_from_utc, input.valid_to_utc) {
            if from >= to {
                return Err(RuleCrudError::Validation(
                    "valid_from_utc must be before valid_to_utc".to_string(),
                ));
            }
        }

        Ok(())
    }

    async fn device_belongs_to_area(&self, org_id: Uuid, device_id: Uuid, area_id: Uuid) -> Result<bool, RuleCrudError> {
        let device = access_db::device::fetch_device_snapshot(&self.pool, org_id, device_id)
            .await
            .map_err(RuleCrudError::Internal)?;
        Ok(device.map(|d| d.area_id == area_id).unwrap_or(false))
    }

    /// Validate, check device/area membership, check for a logical
    /// duplicate, persist, and emit `PolicyChanged`.
    /// On any rejection where `areaId` is known, best-effort publishes
    /// `ChangeRejected` — a failure to do so is logged, never propagated.
    pub async fn create_rule(
        &self,
        org_id: Uuid,
        input: NewRuleInput,
    ) -> Result<RuleRow, RuleCrudError> {
        if let Err(err) = Self::validate(&input) {
            self.best_effort_reject(org_id, Some(input.area_id), "CREATE_RULE", &err).await;
            return Err(err);
        }

        if let Some(device_id) = input.device_id {
            match self.device_belongs_to_area(org_id, device_id, input.area_id).await {
                Ok(true) => {}
                Ok(false) => {
                    let err = RuleCrudError::Validation(
                        "device does not belong to the given area".to_string(),
                    );
                    self.best_effort_reject(org_id, Some(input.area_id), "CREATE_RULE", &err).await;
                    return Err(err);
                }
                Err(err) => {
                    self.best_effort_reject(org_id, Some(input.area_id), "CREATE_RULE", &err).await;
                    return Err(err);
                }
            }
        }

        let rule_id = Uuid::new_v4();
        let new_rule = NewRule {
            id: rule_id,
            org_id,
            area_id: input.area_id,
            subject_type: input.subject_type.clone(),
            device_id: input.device_id,
            pass_direction: input.pass_direction.clone(),
            auth_method: input.auth_method.clone(),
            action: input.action.clone(),
            valid_from_utc: input.valid_from_utc,
            valid_to_utc: input.valid_to_utc,
            from_local: input.from_local.clone(),
            to_local: input.to_local.clone(),
            priority: input.priority,
            message: input.message.clone(),
        };

        match self.store.exists_duplicate(&self.pool, &new_rule, None).await {
            Ok(true) => {
                let err = RuleCrudError::Conflict;
                self.best_effort_reject(org_id, Some(input.area_id), "CREATE_RULE", &err).await;
                return Err(err);
            }
            Ok(false) => {}
            Err(err) => {
                let err = RuleCrudError::Internal(err);
                self.best_effort_reject(org_id, Some(input.area_id), "CREATE_RULE", &err).await;
                return Err(err);
            }
        }

        let mut tx = self.pool.begin().await.map_err(|e| RuleCrudError::Internal(e.into()))?;
        insert_rule(&mut tx, &new_rule).await.map_err(RuleCrudError::Internal)?;

        write_event(
            &mut tx,
            &PolicyChanged {
                event_id: Uuid::new_v4(),
                org_id,
                area_id: input.area_id,
                rule_id,
                change_type: RuleChangeType::Created.as_str().to_string(),
                occurred_at_utc: Utc::now(),
            },
        )
        .await
        .map_err(RuleCrudError::Internal)?;

        tx.commit().await.map_err(|e| RuleCrudError::Internal(e.into()))?;

        self.cache.invalidate_area(org_id, input.area_id).await;

        fetch_rule(&self.pool, org_id, rule_id)
            .await
            .map_err(RuleCrudError::Internal)?
            .ok_or(RuleCrudError::NotFound)
    }

    /// `updateRuleState` (/): ACTIVATE/INACTIVATE/soft-delete
    /// (soft-delete transitions to INACTIVE, same as an explicit
    /// deactivation — "soft-delete = transition to INACTIVE").
    pub async fn set_state(&self, org_id: Uuid, input: SetRuleStateInput) -> Result<RuleRow, RuleCrudError> {
        let rule = fetch_rule(&self.pool, org_id, input.rule_id)
            .await
            .map_err(RuleCrudError::Internal)?;

        let Some(rule) = rule else {
            let err = RuleCrudError::NotFound;
            self.best_effort_reject(org_id, input.area_id, "SET_RULE_STATE", &err).await;
            return Err(err);
        };

        let mut tx = self.pool.begin().await.map_err(|e| RuleCrudError::Internal(e.into()))?;
        let updated = update_rule_state(&mut tx, org_id, input.rule_id, input.target_state)
            .await
            .map_err(RuleCrudError::Internal)?;

        if !updated {
            tx.rollback().await.ok();
            let err = RuleCrudError::NotFound;
            self.best_effort_reject(org_id, Some(rule.area_id), "SET_RULE_STATE", &err).await;
            return Err(err);
        }

        write_event(
            &mut tx,
            &PolicyChanged {
                event_id: Uuid::new_v4(),
                org_id,
                area_id: rule.area_id,
                rule_id: input.rule_id,
                change_type: input.change_type.as_str().to_string(),
                occurred_at_utc: Utc::now(),
            },
        )
        .await
        .map_err(RuleCrudError::Internal)?;

        tx.commit().await.map_err(|e| RuleCrudError::Internal(e.into()))?;

        self.cache.invalidate_area(org_id, rule.area_id).await;

        fetch_rule(&self.pool, org_id, input.rule_id)
            .await
            .map_err(RuleCrudError::Internal)?
            .ok_or(RuleCrudError::NotFound)
    }

    async fn best_effort_reject(
        &self,
        org_id: Uuid,
        area_id: Option<Uuid>,
        operation: &str,
        err: &RuleCrudError,
    ) {
        let Some(area_id) = area_id else { return };

        let event = ChangeRejected {
            event_id: Uuid::new_v4(),
            org_id,
            area_id,
            operation: operation.to_string(),
            reason_code: err.reason_code().to_string(),
            http_status: err.http_status(),
            message: err.to_string(),
            occurred_at_utc: Utc::now(),
        };

        let result: anyhow::Result<()> = async {
            let mut tx = self.pool.begin().await?;
            write_event(&mut tx, &event).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        if let Err(publish_err) = result {
            tracing::warn!(
                org_id = %org_id,
                operation,
                error = %publish_err,
                "failed to publish ChangeRejected, dropping best-effort"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_and_reason_code_match_error_kind() {
        assert_eq!(RuleCrudError::Validation("x".into()).http_status(), 400);
        assert_eq!(RuleCrudError::NotFound.http_status(), 404);
        assert_eq!(RuleCrudError::Conflict.http_status(), 409);
        assert_eq!(RuleCrudError::Conflict.reason_code(), "CONFLICT");
    }
}
