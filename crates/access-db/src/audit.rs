//! Audit log persistence: dedup-on-insert via `(org_id, event_key)`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub id: Uuid,
    pub org_id: Uuid,
    pub event_type: String,
    pub aggregate_type: Option<String>,
    pub aggregate_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub occurred_at_utc: DateTime<Utc>,
    pub payload_json: Value,
    pub event_key: String,
}

/// Insert an audit entry, deduping on `(org_id, event_key)`.
/// Returns `true` if a new row was written, `false` if this event_key was
/// already recorded for the org (the consumer treats this as a successful,
/// idempotent no-op rather than an error).
pub async fn insert_audit_entry_dedup(pool: &PgPool, e: &NewAuditEntry) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        insert into audit_log (
            id, org_id, event_type, aggregate_type, aggregate_id,
            correlation_id, occurred_at_utc, payload_json, event_key
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        on conflict (org_id, event_key) do nothing
        returning id
        "#,
    )
    .bind(e.id)
    .bind(e.org_id)
    .bind(&e.event_type)
    .bind(&e.aggregate_type)
    .bind(&e.aggregate_id)
    .bind(e.correlation_id)
    .bind(e.occurred_at_utc)
    .bind(&e.payload_json)
    .bind(&e.event_key)
    .fetch_optional(pool)
    .await
    .context("insert_audit_entry_dedup failed")?;

    Ok(row.is_some())
}

pub async fn exists_by_event_key(pool: &PgPool, org_id: Uuid, event_key: &str) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        "select exists (select 1 from audit_log where org_id = $1 and event_key = $2)",
    )
    .bind(org_id)
    .bind(event_key)
    .fetch_one(pool)
    .await
    .context("exists_by_event_key failed")?;
    Ok(exists)
}

#[derive(Debug, Clone)]
pub struct AuditEntryRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub event_type: String,
    pub aggregate_type: Option<String>,
    pub aggregate_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub occurred_at_utc: DateTime<Utc>,
    pub payload_json: Value,
    pub event_key: String,
}

pub async fn list_audit_for_org(
    pool: &PgPool,
    org_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<AuditEntryRow>> {
    let rows = sqlx::query(
        r#"
        select id, org_id, event_type, aggregate_type, aggregate_id,
               correlation_id, occurred_at_utc, payload_json, event_key
        from audit_log
        where org_id = $1
        order by occurred_at_utc desc
        limit $2 offset $3
        "#,
    )
    .bind(org_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("list_audit_for_org failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(AuditEntryRow {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            event_type: row.try_get("event_type")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            correlation_id: row.try_get("correlation_id")?,
            occurred_at_utc: row.try_get("occurred_at_utc")?,
            payload_json: row.try_get("payload_json")?,
            event_key: row.try_get("event_key")?,
        });
    }
    Ok(out)
}
