//! Outbox persistence: insert-with-envelope, claim-batch via
//! `FOR UPDATE SKIP LOCKED`, per-event ownership re-assertion, and the
//! ghost-lock maintenance sweep.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub event_id: Uuid,
    pub org_id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub event_id: Uuid,
    pub org_id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: Value,
    pub status: String,
    pub attempts: i32,
    pub created_at_utc: DateTime<Utc>,
    pub next_attempt_at_utc: Option<DateTime<Utc>>,
    pub published_at_utc: Option<DateTime<Utc>>,
    pub locked_at_utc: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
}

fn row_to_outbox(row: sqlx::postgres::PgRow) -> Result<OutboxRow> {
    Ok(OutboxRow {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        org_id: row.try_get("org_id")?,
        event_type: row.try_get("event_type")?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        payload: row.try_get("payload")?,
        status: row.try_get("status")?,
        attempts: row.try_get("attempts")?,
        created_at_utc: row.try_get("created_at_utc")?,
        next_attempt_at_utc: row.try_get("next_attempt_at_utc")?,
        published_at_utc: row.try_get("published_at_utc")?,
        locked_at_utc: row.try_get("locked_at_utc")?,
        locked_by: row.try_get("locked_by")?,
    })
}

const OUTBOX_COLUMNS: &str = r#"
    id, event_id, org_id, event_type, aggregate_type, aggregate_id, payload,
    status, attempts, created_at_utc, next_attempt_at_utc, published_at_utc,
    locked_at_utc, locked_by
"#;

/// Append an event row inside the caller's transaction — outbox writes are
/// part of the same transaction as the domain write they describe. `on
/// conflict do nothing` on `event_id` makes this safe to call with a
/// deterministically-derived event id on retry paths.
pub async fn insert_outbox_event(
    tx: &mut Transaction<'_, Postgres>,
    e: &NewOutboxEvent,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into outbox_events (
            event_id, org_id, event_type, aggregate_type, aggregate_id,
            payload, status, attempts, next_attempt_at_utc
        ) values ($1, $2, $3, $4, $5, $6, 'PENDING', 0, now())
        on conflict (event_id) do nothing
        "#,
    )
    .bind(e.event_id)
    .bind(e.org_id)
    .bind(&e.event_type)
    .bind(&e.aggregate_type)
    .bind(&e.aggregate_id)
    .bind(&e.payload)
    .execute(&mut **tx)
    .await
    .context("insert_outbox_event failed")?;
    Ok(())
}

/// Claim up to `batch_size` ready rows (PENDING, due by `next_attempt_at_utc`,
/// and not currently held by a non-expired lock) for exclusive dispatch by
/// `owner`. Uses `FOR UPDATE SKIP LOCKED` so concurrent dispatchers never
/// claim the same row out of the candidate set in a single statement, but
/// that row lock is released the instant this statement returns — it is the
/// `locked_at_utc`/`lock_ttl` predicate below, not `FOR UPDATE SKIP LOCKED`,
/// that keeps a second dispatcher from re-claiming a row another dispatcher
/// is still actively working within its lock TTL.
///
/// The caller must later call [`mark_published`] or [`mark_failed`] on each
/// claimed row, re-asserting `locked_by = owner` on the update so a row
/// whose lock was stolen by a ghost-lock sweep is not silently overwritten.
pub async fn claim_batch(
    pool: &PgPool,
    batch_size: i64,
    owner: &str,
    lock_ttl: chrono::Duration,
) -> Result<Vec<OutboxRow>> {
    let lock_ttl_secs = lock_ttl.num_seconds().max(0);
    let rows = sqlx::query(&format!(
        r#"
        with to_claim as (
            select id
            from outbox_events
            where status = 'PENDING'
              and (next_attempt_at_utc is null or next_attempt_at_utc <= now())
              and (locked_at_utc is null
                   or locked_at_utc < now() - make_interval(secs => $3::float8))
            order by id asc
            limit $1
            for update skip locked
        )
        update outbox_events
           set locked_at_utc = now(),
               locked_by     = $2
         where id in (select id from to_claim)
        returning {OUTBOX_COLUMNS}
        "#
    ))
    .bind(batch_size)
    .bind(owner)
    .bind(lock_ttl_secs)
    .fetch_all(pool)
    .await
    .context("claim_batch failed")?;

    rows.into_iter().map(row_to_outbox).collect()
}

/// Transition a claimed row to PUBLISHED. The `locked_by = $2` guard is the
/// ownership re-assertion: if a maintenance sweep already reclaimed this row
/// as a ghost lock and handed it to another owner, this update affects zero
/// rows and the caller should treat the publish as stale, not fatal.
pub async fn mark_published(pool: &PgPool, id: i64, owner: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        update outbox_events
           set status           = 'PUBLISHED',
               published_at_utc = now(),
               locked_at_utc    = null,
               locked_by        = null
         where id = $1 and locked_by = $2
        "#,
    )
    .bind(id)
    .bind(owner)
    .execute(pool)
    .await
    .context("mark_published failed")?;
    Ok(result.rows_affected() > 0)
}

/// Record a failed publish attempt: increments `attempts`, stores the error
/// classification, and schedules `next_attempt_at_utc` for retry (or moves
/// the row to FAILED once `max_attempts` is exhausted; the caller computes
/// both the terminal decision and the backoff instant —).
#[allow(clippy::too_many_arguments)]
pub async fn mark_failed(
    pool: &PgPool,
    id: i64,
    owner: &str,
    terminal: bool,
    next_attempt_at_utc: Option<DateTime<Utc>>,
    error_code: &str,
    http_status: Option<i32>,
    error_message: &str,
) -> Result<bool> {
    let status = if terminal { "FAILED" } else { "PENDING" };
    let result = sqlx::query(
        r#"
        update outbox_events
           set status                  = $3,
               attempts                = attempts + 1,
               next_attempt_at_utc     = $4,
               locked_at_utc           = null,
               locked_by               = null,
               last_error_code         = $5,
               last_error_http_status  = $6,
               last_error_message      = $7,
               last_error_at_utc       = now()
         where id = $1 and locked_by = $2
        "#,
    )
    .bind(id)
    .bind(owner)
    .bind(status)
    .bind(next_attempt_at_utc)
    .bind(error_code)
    .bind(http_status)
    .bind(error_message)
    .execute(pool)
    .await
    .context("mark_failed failed")?;
    Ok(result.rows_affected() > 0)
}

/// Ghost-lock maintenance sweep: any row locked for longer than
/// `lock_ttl` is assumed to belong to a dispatcher that crashed mid-publish
/// and is unlocked back to PENDING so another dispatcher can retry it.
/// Returns the number of rows released.
pub async fn release_ghost_locks(pool: &PgPool, lock_ttl: chrono::Duration) -> Result<u64> {
    let cutoff = Utc::now() - lock_ttl;
    let result = sqlx::query(
        r#"
        update outbox_events
           set locked_at_utc = null,
               locked_by     = null
         where status = 'PENDING'
           and locked_at_utc is not null
           and locked_at_utc < $1
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await
    .context("release_ghost_locks failed")?;
    Ok(result.rows_affected())
}

/// Readiness/metrics helper: count rows still awaiting publish.
pub async fn count_pending(pool: &PgPool) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from outbox_events where status = 'PENDING'",
    )
    .fetch_one(pool)
    .await
    .context("count_pending failed")?;
    Ok(n)
}

/// Readiness-probe snapshot ('s failure taxonomy): PENDING rows split
/// into "ready" (due now, unlocked) and "inflight" (currently locked by a
/// dispatcher), the age of the oldest row in each bucket, and the FAILED
/// count. `access-daemon` compares these against the thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboxHealth {
    pub pending_ready: i64,
    pub pending_inflight: i64,
    pub oldest_ready_age_seconds: Option<i64>,
    pub oldest_inflight_age_seconds: Option<i64>,
    pub failed_count: i64,
}

pub async fn health_snapshot(pool: &PgPool) -> Result<OutboxHealth> {
    let row = sqlx::query(
        r#"
        select
            count(*) filter (
                where status = 'PENDING' and locked_by is null
            )::bigint as pending_ready,
            count(*) filter (
                where status = 'PENDING' and locked_by is not null
            )::bigint as pending_inflight,
            extract(epoch from (now() - min(created_at_utc) filter (
                where status = 'PENDING' and locked_by is null
            )))::bigint as oldest_ready_age_seconds,
            extract(epoch from (now() - min(locked_at_utc) filter (
                where status = 'PENDING' and locked_by is not null
            )))::bigint as oldest_inflight_age_seconds,
            count(*) filter (where status = 'FAILED')::bigint as failed_count
        from outbox_events
        "#,
    )
    .fetch_one(pool)
    .await
    .context("health_snapshot failed")?;

    Ok(OutboxHealth {
        pending_ready: row.try_get("pending_ready")?,
        pending_inflight: row.try_get("pending_inflight")?,
        oldest_ready_age_seconds: row.try_get("oldest_ready_age_seconds")?,
        oldest_inflight_age_seconds: row.try_get("oldest_inflight_age_seconds")?,
        failed_count: row.try_get("failed_count")?,
    })
}

pub async fn fetch_by_event_id(pool: &PgPool, event_id: Uuid) -> Result<Option<OutboxRow>> {
    let row = sqlx::query(&format!(
        "select {OUTBOX_COLUMNS} from outbox_events where event_id = $1"
    ))
    .bind(event_id)
    .fetch_optional(pool)
    .await
    .context("fetch_by_event_id failed")?;
    row.map(row_to_outbox).transpose()
}
