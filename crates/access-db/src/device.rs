//! Device load for the attempt pipeline.

use anyhow::{Context, Result};
use access_schemas::DeviceSnapshot;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Fetch a device scoped to its org and build an immutable snapshot. Returns
/// `Ok(None)` for both "no such device" and "device belongs to another
/// tenant" — the two are indistinguishable by design.
pub async fn fetch_device_snapshot(
    pool: &PgPool,
    org_id: Uuid,
    device_id: Uuid,
) -> Result<Option<DeviceSnapshot>> {
    let row = sqlx::query(
        r#"
        select id, org_id, area_id, name, model, external_id, active
        from devices
        where id = $1 and org_id = $2
        "#,
    )
    .bind(device_id)
    .bind(org_id)
    .fetch_optional(pool)
    .await
    .context("fetch_device_snapshot failed")?;

    let Some(row) = row else { return Ok(None) };

    Ok(Some(DeviceSnapshot {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        area_id: row.try_get("area_id")?,
        name: row.try_get("name")?,
        model: row.try_get("model")?,
        external_id: row.try_get("external_id")?,
        active: row.try_get("active")?,
    }))
}
