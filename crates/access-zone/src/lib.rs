//! Tenant-Zone Provider: resolves the effective IANA timezone for an
//! org or an org/area pair, cached per process with explicit invalidation.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use chrono_tz::Tz;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const FALLBACK_ZONE: Tz = chrono_tz::UTC;

/// Validate and parse an IANA timezone id, falling back to UTC on absence
/// or an unrecognized value. Callers that care should log/metric the
/// fallback themselves ("emits a metric" on invalid value).
pub fn parse_zone_or_fallback(id: Option<&str>) -> Tz {
    id.and_then(|s| Tz::from_str(s).ok()).unwrap_or(FALLBACK_ZONE)
}

#[derive(Default)]
struct ZoneCacheInner {
    org: HashMap<Uuid, Tz>,
    area: HashMap<(Uuid, Uuid), Tz>,
}

/// Explicit get/invalidate cache for resolved zones, no annotation-driven
/// caching. Cloneable handle around shared interior state.
#[derive(Clone)]
pub struct ZoneCache {
    inner: Arc<RwLock<ZoneCacheInner>>,
}

impl Default for ZoneCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ZoneCacheInner::default())),
        }
    }

    /// Resolve the effective zone for an org, caching the result.
    pub async fn zone_for_org(&self, pool: &sqlx::PgPool, org_id: Uuid) -> Result<Tz> {
        if let Some(tz) = self.inner.read().await.org.get(&org_id) {
            return Ok(*tz);
        }

        let org = access_db::fetch_organization(pool, org_id).await?;
        let tz = match org {
            Some(row) => {
                let resolved = parse_zone_or_fallback(Some(&row.timezone_id));
                if resolved == FALLBACK_ZONE && row.timezone_id != "UTC" {
                    tracing::warn!(
                        org_id = %org_id,
                        timezone_id = %row.timezone_id,
                        "organization timezone_id is not a recognized IANA zone; falling back to UTC"
                    );
                }
                resolved
            }
            None => FALLBACK_ZONE,
        };

        self.inner.write().await.org.insert(org_id, tz);
        Ok(tz)
    }

    /// Resolve the effective zone for an area: its own override wins,
    /// otherwise inherits the org's zone.
    pub async fn zone_for_area(
        &self,
        pool: &sqlx::PgPool,
        org_id: Uuid,
        area_id: Uuid,
    ) -> Result<Tz> {
        if let Some(tz) = self.inner.read().await.area.get(&(org_id, area_id)) {
            return Ok(*tz);
        }

        let area = access_db::fetch_area(pool, org_id, area_id).await?;
        let tz = match area {
            Some(row) => match row.timezone_id {
                Some(id) => {
                    let resolved = parse_zone_or_fallback(Some(&id));
                    if resolved == FALLBACK_ZONE && id != "UTC" {
                        tracing::warn!(
                            org_id = %org_id,
                            area_id = %area_id,
                            timezone_id = %id,
                            "area timezone_id override is not a recognized IANA zone; falling back to UTC"
                        );
                    }
                    resolved
                }
                None => self.zone_for_org(pool, org_id).await?,
            },
            None => self.zone_for_org(pool, org_id).await?,
        };

        self.inner.write().await.area.insert((org_id, area_id), tz);
        Ok(tz)
    }

    /// Invalidate the `(orgId)` entry, and every `(orgId, *)` area entry
    /// that inherited it — called on Organization CRUD and on `PolicyChanged`
    /// events touching zone configuration.
    pub async fn invalidate_org(&self, org_id: Uuid) {
        let mut guard = self.inner.write().await;
        guard.org.remove(&org_id);
        guard.area.retain(|(o, _), _| *o != org_id);
    }

    /// Invalidate a single `(orgId, areaId)` entry — called on Area CRUD.
    pub async fn invalidate_area(&self, org_id: Uuid, area_id: Uuid) {
        self.inner.write().await.area.remove(&(org_id, area_id));
    }

    /// Drop every cached entry (admin-triggered full invalidation).
    pub async fn invalidate_all(&self) {
        let mut guard = self.inner.write().await;
        guard.org.clear();
        guard.area.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_zone_or_fallback_accepts_valid_iana_id() {
        assert_eq!(
            parse_zone_or_fallback(Some("America/Bogota")),
            Tz::America__Bogota
        );
    }

    #[test]
    fn parse_zone_or_fallback_falls_back_on_invalid_id() {
        assert_eq!(parse_zone_or_fallback(Some("Not/AZone")), FALLBACK_ZONE);
    }

    #[test]
    fn parse_zone_or_fallback_falls_back_on_absence() {
        assert_eq!(parse_zone_or_fallback(None), FALLBACK_ZONE);
    }
}
