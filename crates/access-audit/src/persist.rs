//! Shared envelope-to-`AuditLog` persistence, used by both the primary
//! consumer and the DLQ reprocessor.

use access_db::audit::{insert_audit_entry_dedup, NewAuditEntry};
use access_schemas::AUDIT_EVENT_TYPE_WHITELIST;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::eventkey::derive_event_key;

/// Parse the outer envelope and persist an `AuditLog` row, deduping on
/// `(orgId, eventKey)`. Returns `true` if a new row was written, `false` if
/// this event was already recorded (still a success, not an error).
///
/// Returns `Err` for anything that should route to the DLQ: a whitelist
/// miss is NOT an error here — callers check the whitelist themselves
/// before calling this, since a miss is "ACK and skip", not a DLQ case.
pub async fn persist_envelope(pool: &PgPool, envelope: &Value) -> Result<bool> {
    let org_id: Uuid = envelope
        .get("org_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .context("envelope missing/invalid org_id")?;
    let event_type = envelope
        .get("event_type")
        .and_then(|v| v.as_str())
        .context("envelope missing event_type")?
        .to_string();

    if !AUDIT_EVENT_TYPE_WHITELIST.contains(&event_type.as_str()) {
        bail!("event_type {event_type} is not in the audit whitelist");
    }

    let event_id = envelope
        .get("event_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Uuid>().ok());
    let aggregate_type = envelope.get("aggregate_type").and_then(|v| v.as_str()).map(str::to_string);
    let aggregate_id = envelope.get("aggregate_id").and_then(|v| v.as_str()).unwrap_or("UNKNOWN").to_string();
    let occurred_at_utc = envelope
        .get("created_at_utc")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let payload_json = envelope.get("payload").cloned().context("envelope missing payload")?;

    let event_key = derive_event_key(org_id, &event_type, event_id, &aggregate_id, occurred_at_utc);

    let entry = NewAuditEntry {
        id: Uuid::new_v4(),
        org_id,
        event_type,
        aggregate_type,
        aggregate_id: Some(aggregate_id),
        correlation_id: None,
        occurred_at_utc,
        payload_json,
        event_key,
    };

    insert_audit_entry_dedup(pool, &entry).await
}
