//! Shared runtime state for access-daemon.
//!
//! Cloneable (`Arc`-backed); handlers receive `State<Arc<AppState>>`.

use std::time::Duration;

use access_attempt::AttemptService;
use sqlx::PgPool;

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    pub pool: PgPool,
    pub attempts: AttemptService,
    /// `outbox.lock-ttl` from config, used by the readiness probe's
    /// `oldest-inflight-age > lockTTL + 30s` threshold.
    pub outbox_lock_ttl: Duration,
}

impl AppState {
    pub fn new(pool: PgPool, attempts: AttemptService, outbox_lock_ttl: Duration) -> Self {
        Self {
            build: BuildInfo {
                service: "access-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            pool,
            attempts,
            outbox_lock_ttl,
        }
    }
}
