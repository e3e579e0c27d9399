//! Request/response and error-envelope types for the access-daemon HTTP
//! surface. No business logic lives here — handlers in
//! `routes.rs` build these from the service-layer results.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

/// `GET /v1/ready` body (failure taxonomy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub reasons: Vec<String>,
    pub outbox_pending_ready: i64,
    pub outbox_pending_inflight: i64,
    pub outbox_oldest_ready_age_seconds: Option<i64>,
    pub outbox_oldest_inflight_age_seconds: Option<i64>,
    pub outbox_failed_count: i64,
}

/// The one error envelope every HTTP error response uses (`{code,
/// message, status, path, timestamp, details?}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub status: u16,
    pub path: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
