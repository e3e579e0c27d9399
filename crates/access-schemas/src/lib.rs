//! Shared DTOs and enums for the access-control backend.
//!
//! These types cross every component boundary in the workspace. They carry
//! no behavior beyond parsing/formatting and are kept dependency-light so
//! every other crate can depend on `access-schemas` without pulling in I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod events;

pub use events::*;

/// Subject types a device attempt can be made on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectType {
    Resident,
    PreauthorizedVisitor,
    GroupMember,
    Unknown,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Resident => "RESIDENT",
            SubjectType::PreauthorizedVisitor => "PREAUTHORIZED_VISITOR",
            SubjectType::GroupMember => "GROUP_MEMBER",
            SubjectType::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RESIDENT" => Some(SubjectType::Resident),
            "PREAUTHORIZED_VISITOR" => Some(SubjectType::PreauthorizedVisitor),
            "GROUP_MEMBER" => Some(SubjectType::GroupMember),
            "UNKNOWN" => Some(SubjectType::Unknown),
            _ => None,
        }
    }
}

/// Direction of travel through a device (entry/exit gate, turnstile, door).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassDirection {
    In,
    Out,
}

impl PassDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassDirection::In => "IN",
            PassDirection::Out => "OUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN" => Some(PassDirection::In),
            "OUT" => Some(PassDirection::Out),
            _ => None,
        }
    }
}

/// Credential/authentication method presented at the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMethod {
    Card,
    Pin,
    Biometric,
    MobileCredential,
    QrCode,
    Other,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Card => "CARD",
            AuthMethod::Pin => "PIN",
            AuthMethod::Biometric => "BIOMETRIC",
            AuthMethod::MobileCredential => "MOBILE_CREDENTIAL",
            AuthMethod::QrCode => "QR_CODE",
            AuthMethod::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CARD" => Some(AuthMethod::Card),
            "PIN" => Some(AuthMethod::Pin),
            "BIOMETRIC" => Some(AuthMethod::Biometric),
            "MOBILE_CREDENTIAL" => Some(AuthMethod::MobileCredential),
            "QR_CODE" => Some(AuthMethod::QrCode),
            "OTHER" => Some(AuthMethod::Other),
            _ => None,
        }
    }
}

/// Action a rule prescribes when it matches an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    Allow,
    Deny,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Allow => "ALLOW",
            RuleAction::Deny => "DENY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALLOW" => Some(RuleAction::Allow),
            "DENY" => Some(RuleAction::Deny),
            _ => None,
        }
    }
}

/// Lifecycle state of a rule; soft-delete is a transition to `Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleState {
    Active,
    Inactive,
}

impl RuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleState::Active => "ACTIVE",
            RuleState::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(RuleState::Active),
            "INACTIVE" => Some(RuleState::Inactive),
            _ => None,
        }
    }
}

/// Outcome of an access-attempt decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionResult {
    Allow,
    Deny,
    Pending,
    Error,
}

impl DecisionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionResult::Allow => "ALLOW",
            DecisionResult::Deny => "DENY",
            DecisionResult::Pending => "PENDING",
            DecisionResult::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALLOW" => Some(DecisionResult::Allow),
            "DENY" => Some(DecisionResult::Deny),
            "PENDING" => Some(DecisionResult::Pending),
            "ERROR" => Some(DecisionResult::Error),
            _ => None,
        }
    }
}

/// Device command kinds emitted as a side effect of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceCommandKind {
    OpenDoor,
    DenyWithSignal,
}

impl DeviceCommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceCommandKind::OpenDoor => "OPEN_DOOR",
            DeviceCommandKind::DenyWithSignal => "DENY_WITH_SIGNAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN_DOOR" => Some(DeviceCommandKind::OpenDoor),
            "DENY_WITH_SIGNAL" => Some(DeviceCommandKind::DenyWithSignal),
            _ => None,
        }
    }
}

/// Lifecycle of a `DeviceCommand` row. The `Received`/`ExecutedOk`/
/// `ExecutedError`/`Timeout` transitions are driven by a device-confirmation
/// flow that is out of scope for this repository (spec Open Question); only
/// the `Created`/`Sent` transitions are ever written here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandState {
    Created,
    Sent,
    Received,
    ExecutedOk,
    ExecutedError,
    Timeout,
}

impl CommandState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandState::Created => "CREATED",
            CommandState::Sent => "SENT",
            CommandState::Received => "RECEIVED",
            CommandState::ExecutedOk => "EXECUTED_OK",
            CommandState::ExecutedError => "EXECUTED_ERROR",
            CommandState::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(CommandState::Created),
            "SENT" => Some(CommandState::Sent),
            "RECEIVED" => Some(CommandState::Received),
            "EXECUTED_OK" => Some(CommandState::ExecutedOk),
            "EXECUTED_ERROR" => Some(CommandState::ExecutedError),
            "TIMEOUT" => Some(CommandState::Timeout),
            _ => None,
        }
    }
}

/// Outbox row lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OutboxStatus::Pending),
            "PUBLISHED" => Some(OutboxStatus::Published),
            "FAILED" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// Kind of change a rule CRUD operation performed; reported on `PolicyChanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleChangeType {
    Created,
    Updated,
    Activated,
    Inactivated,
    SoftDeleted,
}

impl RuleChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleChangeType::Created => "CREATED",
            RuleChangeType::Updated => "UPDATED",
            RuleChangeType::Activated => "ACTIVATED",
            RuleChangeType::Inactivated => "INACTIVATED",
            RuleChangeType::SoftDeleted => "SOFT_DELETED",
        }
    }
}

/// Immutable device facts needed by the decision engine. Loaded explicitly by
/// the attempt service; never an ORM-managed reference — no lazy relations
/// crossing component boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: Uuid,
    pub org_id: Uuid,
    pub area_id: Uuid,
    pub name: String,
    pub model: Option<String>,
    pub external_id: Option<String>,
    pub active: bool,
}

/// A validity/window-bearing rule snapshot as read from storage, used by
/// both the candidates cache and the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub id: Uuid,
    pub org_id: Uuid,
    pub area_id: Uuid,
    pub subject_type: SubjectType,
    pub device_id: Option<Uuid>,
    pub pass_direction: Option<PassDirection>,
    pub auth_method: Option<AuthMethod>,
    pub action: RuleAction,
    pub valid_from_utc: Option<DateTime<Utc>>,
    pub valid_to_utc: Option<DateTime<Utc>>,
    /// "HH:mm"
    pub from_local: Option<String>,
    /// "HH:mm"
    pub to_local: Option<String>,
    pub priority: i32,
    pub state: RuleState,
    pub message: Option<String>,
    pub updated_at_utc: DateTime<Utc>,
}

impl RuleSnapshot {
    /// Count of non-wildcard matchers and window fields present on this
    /// rule — the specificity ordering tiebreaker used to break priority
    /// ties during rule matching.
    pub fn specificity(&self) -> u32 {
        let mut n = 0u32;
        if self.device_id.is_some() {
            n += 1;
        }
        if self.pass_direction.is_some() {
            n += 1;
        }
        if self.auth_method.is_some() {
            n += 1;
        }
        if self.valid_from_utc.is_some() || self.valid_to_utc.is_some() {
            n += 1;
        }
        if self.from_local.is_some() || self.to_local.is_some() {
            n += 1;
        }
        n
    }
}

/// Request body for `POST /organizations/{orgId}/accesses/attempts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAttemptRequest {
    pub device_id: Uuid,
    pub area_id: Option<Uuid>,
    pub subject_type: SubjectType,
    pub pass_direction: PassDirection,
    pub auth_method: AuthMethod,
    pub subject_reference: Option<String>,
    pub idempotency_key: String,
    pub occurred_at_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionView {
    pub result: DecisionResult,
    pub reason_code: String,
    pub reason_detail: Option<String>,
    pub decided_at_utc: DateTime<Utc>,
    pub expires_at_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandView {
    pub id: Uuid,
    pub command: DeviceCommandKind,
    pub message: Option<String>,
}

/// Response body for `POST /organizations/{orgId}/accesses/attempts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResult {
    pub attempt_id: Uuid,
    pub org_id: Uuid,
    pub area_id: Uuid,
    pub device_id: Uuid,
    pub decision: DecisionView,
    pub command: Option<CommandView>,
}

/// Generic JSON blob carried by an outbox row / bus envelope.
pub type EventPayload = Value;
