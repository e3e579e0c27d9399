//! Postgres access layer for the access-control backend.
//!
//! Raw `sqlx::query`/`query_as` throughout (no compile-time `query!` macros,
//! so the crate builds without a live DB at compile time). Entities cross
//! component boundaries only as plain structs
//! (`DeviceSnapshot`, `RuleSnapshot`,...) — never as ORM-managed references.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub mod attempt;
pub mod audit;
pub mod device;
pub mod org;
pub mod outbox;
pub mod rules;

pub use attempt::*;
pub use audit::*;
pub use device::*;
pub use org::*;
pub use outbox::*;
pub use rules::*;

pub const ENV_DB_URL: &str = "ACCESS_DATABASE_URL";

/// Connect to Postgres using `ACCESS_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Test helper: connect via `ACCESS_DATABASE_URL` and ensure migrations ran.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Connectivity + schema-presence status, used by the readiness probe.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    Ok(DbStatus { ok: one == 1 })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
}

/// Detect a Postgres unique-constraint violation by name.
pub fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

/// Detect *any* Postgres unique-constraint violation (used where the caller
/// doesn't need to distinguish which constraint fired, e.g. idempotency
/// races that recover by re-reading the row).
pub fn is_any_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}
