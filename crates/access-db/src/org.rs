//! Organization / Area reads needed by the Tenant-Zone Provider and the
//! attempt pipeline. Full Organization/Area CRUD is an external collaborator
//! — only the read paths the core needs live here.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrganizationRow {
    pub id: Uuid,
    pub name: String,
    pub state: String,
    pub timezone_id: String,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

pub async fn fetch_organization(pool: &PgPool, org_id: Uuid) -> Result<Option<OrganizationRow>> {
    let row = sqlx::query(
        r#"
        select id, name, state, timezone_id, created_at_utc, updated_at_utc
        from organizations
        where id = $1
        "#,
    )
    .bind(org_id)
    .fetch_optional(pool)
    .await
    .context("fetch_organization failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(OrganizationRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        state: row.try_get("state")?,
        timezone_id: row.try_get("timezone_id")?,
        created_at_utc: row.try_get("created_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
    }))
}

#[derive(Debug, Clone)]
pub struct AreaRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub image_path: Option<String>,
    pub timezone_id: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

pub async fn fetch_area(pool: &PgPool, org_id: Uuid, area_id: Uuid) -> Result<Option<AreaRow>> {
    let row = sqlx::query(
        r#"
        select id, org_id, name, image_path, timezone_id, created_at_utc, updated_at_utc
        from areas
        where id = $1 and org_id = $2
        "#,
    )
    .bind(area_id)
    .bind(org_id)
    .fetch_optional(pool)
    .await
    .context("fetch_area failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(AreaRow {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        name: row.try_get("name")?,
        image_path: row.try_get("image_path")?,
        timezone_id: row.try_get("timezone_id")?,
        created_at_utc: row.try_get("created_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
    }))
}
