//! Outbox Dispatcher: claims ready rows, hands each to a [`Sender`],
//! and records the outcome with a fixed backoff table + jitter on failure.

use std::time::Duration;

use access_db::outbox::{claim_batch, mark_failed, mark_published, OutboxRow};
use chrono::Utc;
use rand::Rng as _;
use tracing::{debug, error, info, warn};

use crate::sender::{SendError, Sender};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub batch_size: i64,
    pub max_attempts: i32,
    /// Upper bound applied to a transport-supplied `retry_after`
    /// (default 10 minutes).
    pub max_retry_after: Duration,
    pub owner: String,
    /// How long a claimed row is considered actively held before another
    /// dispatcher is allowed to reclaim it. Passed straight into
    /// `claim_batch`'s lock predicate; must match the ghost-lock sweep's
    /// `lock_ttl` so the two agree on when a lock is stale.
    pub lock_ttl: chrono::Duration,
}

/// Run one dispatch cycle: claim up to `config.batch_size` rows and publish
/// each through `sender`. Returns the number of rows claimed, for the
/// caller's metrics.
pub async fn dispatch_once(
    pool: &sqlx::PgPool,
    sender: &dyn Sender,
    config: &DispatcherConfig,
) -> anyhow::Result<DispatchStats> {
    let rows = claim_batch(pool, config.batch_size, &config.owner, config.lock_ttl).await?;
    let mut stats = DispatchStats {
        claimed: rows.len() as u64,
        ..Default::default()
    };

    for row in rows {
        match sender.send(&row).await {
            Ok(_) => {
                let still_owned = mark_published(pool, row.id, &config.owner).await?;
                if still_owned {
                    stats.published += 1;
                } else {
                    // Ownership was stolen by a ghost-lock sweep between our
                    // claim and this publish; the row will be republished by
                    // whoever holds it now. Not an error for this cycle.
                    debug!(outbox_id = row.id, "publish raced a ghost-lock reclaim, ignoring");
                    stats.stale += 1;
                }
            }
            Err(err) => {
                stats.failed += 1;
                handle_failure(pool, &row, &err, config).await?;
            }
        }
    }

    Ok(stats)
}

async fn handle_failure(
    pool: &sqlx::PgPool,
    row: &OutboxRow,
    err: &SendError,
    config: &DispatcherConfig,
) -> anyhow::Result<()> {
    let attempt_number = row.attempts + 1;
    let terminal = !err.retryable || attempt_number >= config.max_attempts;

    warn!(
        outbox_id = row.id,
        event_type = %row.event_type,
        error_code = %err.code,
        attempt = attempt_number,
        terminal,
        "outbox publish failed"
    );

    let next_attempt_at_utc = if terminal {
        None
    } else {
        let delay = next_delay(row.attempts, err.retry_after, config.max_retry_after);
        Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()))
    };

    let truncated_message: String = err.message.chars().take(600).collect();

    let updated = mark_failed(
        pool,
        row.id,
        &config.owner,
        terminal,
        next_attempt_at_utc,
        &err.code,
        err.http_status,
        &truncated_message,
    )
    .await?;

    if !updated {
        debug!(outbox_id = row.id, "mark_failed raced a ghost-lock reclaim, ignoring");
    } else if terminal {
        error!(outbox_id = row.id, event_type = %row.event_type, "outbox event moved to FAILED (terminal)");
    }

    Ok(())
}

/// Base backoff table keyed by the attempt number that just failed:
/// `{1: 2s, 2: 10s, 3: 30s, 4: 2m, >=5: 5m}`.
fn base_backoff_for_attempt(attempts_before_this_failure: i32) -> Duration {
    match attempts_before_this_failure + 1 {
        1 => Duration::from_secs(2),
        2 => Duration::from_secs(10),
        3 => Duration::from_secs(30),
        4 => Duration::from_secs(2 * 60),
        _ => Duration::from_secs(5 * 60),
    }
}

/// The retry delay for a just-failed attempt: the transport's `retry_after`
/// when supplied (capped at `max_retry_after`), otherwise the base-backoff
/// table multiplied by jitter in `[0.7, 1.3)` and floored to >= 1s.
fn next_delay(
    attempts_before_this_failure: i32,
    retry_after: Option<Duration>,
    max_retry_after: Duration,
) -> Duration {
    if let Some(retry_after) = retry_after {
        return retry_after.min(max_retry_after);
    }

    let base = base_backoff_for_attempt(attempts_before_this_failure);
    let jitter = rand::rng().random_range(0.7..1.3);
    let jittered_millis = (base.as_millis() as f64 * jitter).round().max(1000.0) as u64;
    Duration::from_millis(jittered_millis)
}

#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    pub claimed: u64,
    pub published: u64,
    pub failed: u64,
    pub stale: u64,
}

/// Background loop spawned by the daemon: dispatch on a fixed interval,
/// skipping an overlapping tick if the previous one is still running, via
/// an explicit `try_lock` guard rather than a scheduler annotation.
pub async fn run_dispatch_loop(
    pool: sqlx::PgPool,
    sender: std::sync::Arc<dyn Sender>,
    config: DispatcherConfig,
    every: Duration,
) {
    let running = std::sync::Arc::new(tokio::sync::Mutex::new(()));
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let Ok(_guard) = running.clone().try_lock_owned() else {
            debug!("outbox dispatch tick skipped: previous tick still running");
            continue;
        };
        match dispatch_once(&pool, sender.as_ref(), &config).await {
            Ok(stats) if stats.claimed > 0 => {
                info!(
                    claimed = stats.claimed,
                    published = stats.published,
                    failed = stats.failed,
                    "outbox dispatch cycle complete"
                );
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "outbox dispatch cycle errored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_backoff_matches_fixed_table() {
        assert_eq!(base_backoff_for_attempt(0), Duration::from_secs(2));
        assert_eq!(base_backoff_for_attempt(1), Duration::from_secs(10));
        assert_eq!(base_backoff_for_attempt(2), Duration::from_secs(30));
        assert_eq!(base_backoff_for_attempt(3), Duration::from_secs(120));
        assert_eq!(base_backoff_for_attempt(4), Duration::from_secs(300));
        assert_eq!(base_backoff_for_attempt(99), Duration::from_secs(300));
    }

    #[test]
    fn jittered_delay_for_first_failure_is_within_expected_range() {
        for _ in 0..100 {
            let d = next_delay(0, None, Duration::from_secs(600));
            assert!(d >= Duration::from_millis(1400), "{d:?}");
            assert!(d <= Duration::from_millis(2600), "{d:?}");
        }
    }

    #[test]
    fn retry_after_from_transport_is_capped_at_max() {
        let d = next_delay(0, Some(Duration::from_secs(3600)), Duration::from_secs(600));
        assert_eq!(d, Duration::from_secs(600));
    }

    #[test]
    fn retry_after_under_cap_is_used_verbatim() {
        let d = next_delay(0, Some(Duration::from_secs(5)), Duration::from_secs(600));
        assert_eq!(d, Duration::from_secs(5));
    }
}
