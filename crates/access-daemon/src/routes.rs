//! Axum router and HTTP handlers for access-daemon.
//!
//! `build_router` is the single entry point; `main.rs` attaches middleware
//! after this call so tests can use the bare router.

use std::sync::Arc;

use access_attempt::RegisterAttemptError;
use access_schemas::RegisterAttemptRequest;
use axum::{
    extract::{Path, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use crate::api_types::{ErrorEnvelope, HealthResponse, ReadyResponse};
use crate::readiness::check_readiness;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/ready", get(ready))
        .route(
            "/organizations/:org_id/accesses/attempts",
            post(register_attempt),
        )
        .with_state(state)
}

async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

async fn ready(State(st): State<Arc<AppState>>) -> Response {
    match check_readiness(&st.pool, st.outbox_lock_ttl.as_secs() as i64).await {
        Ok(verdict) => {
            let status = if verdict.ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (
                status,
                Json(ReadyResponse {
                    ready: verdict.ready,
                    reasons: verdict.reasons,
                    outbox_pending_ready: verdict.health.pending_ready,
                    outbox_pending_inflight: verdict.health.pending_inflight,
                    outbox_oldest_ready_age_seconds: verdict.health.oldest_ready_age_seconds,
                    outbox_oldest_inflight_age_seconds: verdict.health.oldest_inflight_age_seconds,
                    outbox_failed_count: verdict.health.failed_count,
                }),
            )
                .into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    ready: false,
                    reasons: vec![format!("readiness query failed: {err}")],
                    outbox_pending_ready: 0,
                    outbox_pending_inflight: 0,
                    outbox_oldest_ready_age_seconds: None,
                    outbox_oldest_inflight_age_seconds: None,
                    outbox_failed_count: 0,
                }),
            )
                .into_response()
        }
    }
}

/// `POST /organizations/{orgId}/accesses/attempts` (/): the
/// single write path into the core. Status codes: 200 on accept (including
/// idempotent replay), 400 validation, 404 unknown device/area, 409 only on
/// an idempotency race resolved to the existing row.
async fn register_attempt(
    State(st): State<Arc<AppState>>,
    Path(org_id): Path<Uuid>,
    uri: Uri,
    Json(body): Json<RegisterAttemptRequest>,
) -> Response {
    match st.attempts.register_attempt(org_id, body).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        // The race-conflict path still returns the winning row's body
        // (409 on idempotency race resolved to an existing row),
        // so the caller can recover the decision without a retry.
        Err(RegisterAttemptError::Conflict(existing)) => {
            (StatusCode::CONFLICT, Json(*existing)).into_response()
        }
        Err(err) => register_attempt_error_response(err, uri.path()),
    }
}

fn register_attempt_error_response(err: RegisterAttemptError, path: &str) -> Response {
    let (status, code) = match &err {
        RegisterAttemptError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        RegisterAttemptError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        RegisterAttemptError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        RegisterAttemptError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    if matches!(err, RegisterAttemptError::Internal(_)) {
        tracing::error!(error = %err, path, "register_attempt failed");
    }

    let envelope = ErrorEnvelope {
        code: code.to_string(),
        message: err.to_string(),
        status: status.as_u16(),
        path: path.to_string(),
        timestamp: Utc::now(),
        details: None,
    };

    (status, Json(envelope)).into_response()
}
