//! Shared test scaffolding: Postgres pool bootstrap and fixture builders for
//! Organization/Area/Device/Rule. Used only from other crates' `tests/`
//! directories (`[dev-dependencies]`), never from non-test code.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Connect via `ACCESS_DATABASE_URL` and run migrations. Panics with a
/// descriptive message if the env var is unset — callers should gate their
/// own test with `#[ignore]` rather than rely on this to skip gracefully.
pub async fn db_pool() -> Result<PgPool> {
    let url = std::env::var(access_db::ENV_DB_URL).with_context(|| {
        format!(
            "DB-backed tests require {}; run with --include-ignored against a live Postgres",
            access_db::ENV_DB_URL
        )
    })?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await?;
    access_db::migrate(&pool).await?;
    Ok(pool)
}

/// A clock that always returns the same instant, for deterministic fixture
/// timestamps and engine `now_utc` injection in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub struct OrgFixture {
    pub id: Uuid,
    pub timezone_id: String,
}

pub async fn insert_organization(pool: &PgPool, name: &str, timezone_id: &str) -> Result<OrgFixture> {
    let id = Uuid::new_v4();
    sqlx::query(
        "insert into organizations (id, name, state, timezone_id) values ($1, $2, 'ACTIVE', $3)",
    )
    .bind(id)
    .bind(name)
    .bind(timezone_id)
    .execute(pool)
    .await
    .context("insert_organization failed")?;

    Ok(OrgFixture {
        id,
        timezone_id: timezone_id.to_string(),
    })
}

pub struct AreaFixture {
    pub id: Uuid,
    pub org_id: Uuid,
}

pub async fn insert_area(
    pool: &PgPool,
    org_id: Uuid,
    name: &str,
    timezone_id: Option<&str>,
) -> Result<AreaFixture> {
    let id = Uuid::new_v4();
    sqlx::query("insert into areas (id, org_id, name, timezone_id) values ($1, $2, $3, $4)")
        .bind(id)
        .bind(org_id)
        .bind(name)
        .bind(timezone_id)
        .execute(pool)
        .await
        .context("insert_area failed")?;

    Ok(AreaFixture { id, org_id })
}

pub struct DeviceFixture {
    pub id: Uuid,
    pub org_id: Uuid,
    pub area_id: Uuid,
}

pub async fn insert_device(
    pool: &PgPool,
    org_id: Uuid,
    area_id: Uuid,
    name: &str,
    active: bool,
) -> Result<DeviceFixture> {
    let id = Uuid::new_v4();
    sqlx::query(
        "insert into devices (id, org_id, area_id, name, active) values ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(org_id)
    .bind(area_id)
    .bind(name)
    .bind(active)
    .execute(pool)
    .await
    .context("insert_device failed")?;

    Ok(DeviceFixture { id, org_id, area_id })
}

/// Minimal rule fixture covering the columns most scenario tests vary.
/// Any field left `None` is stored as SQL NULL (a wildcard matcher).
#[allow(clippy::too_many_arguments)]
pub async fn insert_rule(
    pool: &PgPool,
    org_id: Uuid,
    area_id: Uuid,
    subject_type: &str,
    device_id: Option<Uuid>,
    action: &str,
    priority: i32,
    from_local: Option<&str>,
    to_local: Option<&str>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        insert into rules (
            id, org_id, area_id, subject_type, device_id, action, priority,
            from_local, to_local, state
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'ACTIVE')
        "#,
    )
    .bind(id)
    .bind(org_id)
    .bind(area_id)
    .bind(subject_type)
    .bind(device_id)
    .bind(action)
    .bind(priority)
    .bind(from_local)
    .bind(to_local)
    .execute(pool)
    .await
    .context("insert_rule failed")?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_returns_same_instant_every_call() {
        let t = Utc::now();
        let clock = FixedClock(t);
        assert_eq!(clock.now(), t);
        assert_eq!(clock.now(), clock.now());
    }
}
