//! Outbox Writer: serialize a domain event and append it to the
//! outbox table inside the caller's transaction.

use access_db::outbox::{insert_outbox_event, NewOutboxEvent};
use access_schemas::events::DomainEvent;
use anyhow::{Context, Result};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// Append `event` to the outbox. Uses `event.event_id` when the event
/// carries its own id (policy events), otherwise mints a fresh one — the
/// attempt-pipeline events are deduplicated by their aggregate id further
/// downstream (the attempt/decision/command rows themselves), not by the
/// outbox row's own identity.
pub async fn write_event<E>(tx: &mut Transaction<'_, Postgres>, event: &E) -> Result<Uuid>
where
    E: DomainEvent + serde::Serialize,
{
    let event_id = event.event_id().unwrap_or_else(Uuid::new_v4);
    let payload = serde_json::to_value(event).context("serialize domain event payload")?;

    let new_event = NewOutboxEvent {
        event_id,
        org_id: event.org_id(),
        event_type: event.event_type().to_string(),
        aggregate_type: event.aggregate_type().to_string(),
        aggregate_id: event.aggregate_id(),
        payload,
    };

    insert_outbox_event(tx, &new_event).await?;
    Ok(event_id)
}
