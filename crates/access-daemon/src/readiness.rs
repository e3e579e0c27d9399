//! Readiness probe: fails when FAILED >= 50, oldest-ready-age
//! exceeds 120s, or oldest-inflight-age exceeds `lockTTL + 30s`.

use access_db::outbox::{health_snapshot, OutboxHealth};
use sqlx::PgPool;

pub const FAILED_THRESHOLD: i64 = 50;
pub const OLDEST_READY_AGE_THRESHOLD_SECONDS: i64 = 120;
pub const OLDEST_INFLIGHT_AGE_SLACK_SECONDS: i64 = 30;

#[derive(Debug, Clone)]
pub struct ReadinessVerdict {
    pub ready: bool,
    pub reasons: Vec<String>,
    pub health: OutboxHealth,
}

pub async fn check_readiness(
    pool: &PgPool,
    outbox_lock_ttl_seconds: i64,
) -> anyhow::Result<ReadinessVerdict> {
    let health = health_snapshot(pool).await?;
    let reasons = evaluate(&health, outbox_lock_ttl_seconds);
    Ok(ReadinessVerdict {
        ready: reasons.is_empty(),
        reasons,
        health,
    })
}

fn evaluate(health: &OutboxHealth, outbox_lock_ttl_seconds: i64) -> Vec<String> {
    let mut reasons = Vec::new();

    if health.failed_count >= FAILED_THRESHOLD {
        reasons.push(format!(
            "outbox FAILED count {} >= threshold {}",
            health.failed_count, FAILED_THRESHOLD
        ));
    }

    if let Some(age) = health.oldest_ready_age_seconds {
        if age > OLDEST_READY_AGE_THRESHOLD_SECONDS {
            reasons.push(format!(
                "oldest-ready age {age}s exceeds threshold {OLDEST_READY_AGE_THRESHOLD_SECONDS}s"
            ));
        }
    }

    if let Some(age) = health.oldest_inflight_age_seconds {
        let max_age = outbox_lock_ttl_seconds + OLDEST_INFLIGHT_AGE_SLACK_SECONDS;
        if age > max_age {
            reasons.push(format!(
                "oldest-inflight age {age}s exceeds lockTTL+{OLDEST_INFLIGHT_AGE_SLACK_SECONDS}s ({max_age}s)"
            ));
        }
    }

    reasons
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(
        failed_count: i64,
        oldest_ready_age_seconds: Option<i64>,
        oldest_inflight_age_seconds: Option<i64>,
    ) -> OutboxHealth {
        OutboxHealth {
            pending_ready: 0,
            pending_inflight: 0,
            oldest_ready_age_seconds,
            oldest_inflight_age_seconds,
            failed_count,
        }
    }

    #[test]
    fn healthy_snapshot_has_no_reasons() {
        let h = health(0, Some(1), Some(1));
        assert!(evaluate(&h, 300).is_empty());
    }

    #[test]
    fn failed_count_at_threshold_fails() {
        let h = health(50, None, None);
        assert_eq!(evaluate(&h, 300).len(), 1);
    }

    #[test]
    fn oldest_ready_age_over_threshold_fails() {
        let h = health(0, Some(121), None);
        assert_eq!(evaluate(&h, 300).len(), 1);
    }

    #[test]
    fn oldest_ready_age_at_threshold_passes() {
        let h = health(0, Some(120), None);
        assert!(evaluate(&h, 300).is_empty());
    }

    #[test]
    fn oldest_inflight_age_respects_lock_ttl_plus_slack() {
        let h = health(0, None, Some(331));
        assert_eq!(evaluate(&h, 300).len(), 1);
        let h = health(0, None, Some(330));
        assert!(evaluate(&h, 300).is_empty());
    }
}
