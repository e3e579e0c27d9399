//! Domain events published through the transactional outbox.
//!
//! No reflection-based introspection for `orgId`/`aggregateId` — every
//! event implements [`DomainEvent`] explicitly instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimal contract the outbox writer needs from any domain event.
/// `event_id` is optional: events that are keyed by a strong aggregate id
/// (attempt/decision/command) don't need one of their own (see the audit
/// consumer's `eventKey` derivation).
pub trait DomainEvent {
    fn org_id(&self) -> Uuid;
    fn aggregate_type(&self) -> &'static str;
    fn aggregate_id(&self) -> String;
    fn event_id(&self) -> Option<Uuid> {
        None
    }
    /// Fully-qualified event type name stored on the outbox row / audit log.
    fn event_type(&self) -> &'static str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRegistered {
    pub org_id: Uuid,
    pub attempt_id: Uuid,
    pub device_id: Uuid,
    pub area_id: Uuid,
    pub occurred_at_utc: DateTime<Utc>,
}

impl DomainEvent for AttemptRegistered {
    fn org_id(&self) -> Uuid {
        self.org_id
    }
    fn aggregate_type(&self) -> &'static str {
        "AccessAttempt"
    }
    fn aggregate_id(&self) -> String {
        self.attempt_id.to_string()
    }
    fn event_type(&self) -> &'static str {
        "access.attempt.AttemptRegistered"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTaken {
    pub org_id: Uuid,
    pub attempt_id: Uuid,
    pub decision_id: Uuid,
    pub result: String,
    pub reason_code: String,
    pub decided_at_utc: DateTime<Utc>,
}

impl DomainEvent for DecisionTaken {
    fn org_id(&self) -> Uuid {
        self.org_id
    }
    fn aggregate_type(&self) -> &'static str {
        "AccessAttempt"
    }
    fn aggregate_id(&self) -> String {
        self.attempt_id.to_string()
    }
    fn event_type(&self) -> &'static str {
        "access.attempt.DecisionTaken"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEmitted {
    pub org_id: Uuid,
    pub attempt_id: Uuid,
    pub command_id: Uuid,
    pub device_id: Uuid,
    pub command: String,
    pub sent_at_utc: DateTime<Utc>,
}

impl DomainEvent for CommandEmitted {
    fn org_id(&self) -> Uuid {
        self.org_id
    }
    fn aggregate_type(&self) -> &'static str {
        "AccessAttempt"
    }
    fn aggregate_id(&self) -> String {
        self.attempt_id.to_string()
    }
    fn event_type(&self) -> &'static str {
        "access.attempt.CommandEmitted"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyChanged {
    pub event_id: Uuid,
    pub org_id: Uuid,
    pub area_id: Uuid,
    pub rule_id: Uuid,
    pub change_type: String,
    pub occurred_at_utc: DateTime<Utc>,
}

impl DomainEvent for PolicyChanged {
    fn org_id(&self) -> Uuid {
        self.org_id
    }
    fn aggregate_type(&self) -> &'static str {
        "Rule"
    }
    fn aggregate_id(&self) -> String {
        self.rule_id.to_string()
    }
    fn event_id(&self) -> Option<Uuid> {
        Some(self.event_id)
    }
    fn event_type(&self) -> &'static str {
        "access.policy.PolicyChanged"
    }
}

/// Best-effort, failure-side counterpart to `PolicyChanged`. Only emitted
/// when `areaId` is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRejected {
    pub event_id: Uuid,
    pub org_id: Uuid,
    pub area_id: Uuid,
    pub operation: String,
    pub reason_code: String,
    pub http_status: u16,
    pub message: String,
    pub occurred_at_utc: DateTime<Utc>,
}

impl DomainEvent for ChangeRejected {
    fn org_id(&self) -> Uuid {
        self.org_id
    }
    fn aggregate_type(&self) -> &'static str {
        "Rule"
    }
    fn aggregate_id(&self) -> String {
        // No rule id exists for a rejected change; default to UNKNOWN.
        "UNKNOWN".to_string()
    }
    fn event_id(&self) -> Option<Uuid> {
        Some(self.event_id)
    }
    fn event_type(&self) -> &'static str {
        "access.policy.ChangeRejected"
    }
}

/// Admin-triggered global cache-flush signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInvalidateAllRequested {
    pub event_id: Uuid,
    pub org_id: Uuid,
    pub occurred_at_utc: DateTime<Utc>,
}

impl DomainEvent for PolicyInvalidateAllRequested {
    fn org_id(&self) -> Uuid {
        self.org_id
    }
    fn aggregate_type(&self) -> &'static str {
        "Organization"
    }
    fn aggregate_id(&self) -> String {
        self.org_id.to_string()
    }
    fn event_id(&self) -> Option<Uuid> {
        Some(self.event_id)
    }
    fn event_type(&self) -> &'static str {
        "access.policy.PolicyInvalidateAllRequested"
    }
}

/// The fixed whitelist the audit consumer accepts.
pub const AUDIT_EVENT_TYPE_WHITELIST: &[&str] = &[
    "access.attempt.AttemptRegistered",
    "access.attempt.DecisionTaken",
    "access.attempt.CommandEmitted",
    "access.policy.PolicyChanged",
    "access.policy.ChangeRejected",
];
