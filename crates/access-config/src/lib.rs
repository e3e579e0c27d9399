//! Configuration loading for the access-control backend.
//!
//! Layered YAML + env-var override with deep-merge, key-sorted
//! canonicalization, and a content hash for audit trails, producing the
//! typed [`AppConfig`] below.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Load + merge YAML files in order (later files override earlier ones via
/// deep-merge), canonicalize to JSON with sorted keys, and hash the result.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

fn cfg_str<'a>(v: &'a Value, ptr: &str) -> Option<&'a str> {
    v.pointer(ptr).and_then(|x| x.as_str())
}

fn cfg_u64(v: &Value, ptr: &str) -> Option<u64> {
    v.pointer(ptr).and_then(|x| x.as_u64())
}

/// Typed application configuration. Every field carries a sensible default;
/// `from_env_and_json` layers env vars over an optional YAML document.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub outbox_dispatch_every: Duration,
    pub outbox_maintenance_every: Duration,
    pub outbox_lock_ttl: Duration,
    pub outbox_batch_size: i64,
    pub outbox_max_attempts: i32,
    pub outbox_max_retry_after: Duration,
    /// Stable identifier of this running process; used as outbox lock owner
    /// and in logs. Empty config -> a fresh UUID is minted once per process.
    pub instance_id: String,
    pub bus_bootstrap: String,
    pub default_org_timezone: String,
    /// Fallback decision when no rule survives evaluation, a
    /// per-org-overridable knob: `"ALLOW"` or `"DENY"`. Kept as a string
    /// rather than an enum so this crate doesn't need to depend on
    /// access-engine; callers parse it themselves.
    pub default_decision: String,
    pub http_cors_allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            outbox_dispatch_every: Duration::from_secs(2),
            outbox_maintenance_every: Duration::from_secs(5 * 60),
            outbox_lock_ttl: Duration::from_secs(300),
            outbox_batch_size: 50,
            outbox_max_attempts: 5,
            outbox_max_retry_after: Duration::from_secs(10 * 60),
            instance_id: String::new(),
            bus_bootstrap: "localhost:9092".to_string(),
            default_org_timezone: "UTC".to_string(),
            default_decision: "ALLOW".to_string(),
            http_cors_allowed_origins: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Build configuration from an optional merged YAML document plus
    /// environment-variable overrides (`ACCESS_*`). Env vars always win.
    pub fn from_env_and_json(doc: Option<&Value>) -> Self {
        let mut cfg = Self::default();

        if let Some(doc) = doc {
            if let Some(ms) = cfg_u64(doc, "/outbox/dispatch/every_ms") {
                cfg.outbox_dispatch_every = Duration::from_millis(ms);
            }
            if let Some(ms) = cfg_u64(doc, "/outbox/maintenance/every_ms") {
                cfg.outbox_maintenance_every = Duration::from_millis(ms);
            }
            if let Some(secs) = cfg_u64(doc, "/outbox/lock-ttl") {
                cfg.outbox_lock_ttl = Duration::from_secs(secs);
            }
            if let Some(n) = cfg_u64(doc, "/outbox/batch-size") {
                cfg.outbox_batch_size = n as i64;
            }
            if let Some(n) = cfg_u64(doc, "/outbox/max-attempts") {
                cfg.outbox_max_attempts = n as i32;
            }
            if let Some(secs) = cfg_u64(doc, "/outbox/max-retry-after") {
                cfg.outbox_max_retry_after = Duration::from_secs(secs);
            }
            if let Some(s) = cfg_str(doc, "/instance-id") {
                cfg.instance_id = s.to_string();
            }
            if let Some(s) = cfg_str(doc, "/bus/bootstrap") {
                cfg.bus_bootstrap = s.to_string();
            }
            if let Some(s) = cfg_str(doc, "/default-org-timezone") {
                cfg.default_org_timezone = s.to_string();
            }
            if let Some(s) = cfg_str(doc, "/default-decision") {
                cfg.default_decision = s.to_string();
            }
            if let Some(origins) = doc.pointer("/http/cors-allowed-origins").and_then(|v| v.as_array()) {
                cfg.http_cors_allowed_origins = origins
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
            }
        }

        if let Ok(ms) = std::env::var("ACCESS_OUTBOX_DISPATCH_EVERY_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                cfg.outbox_dispatch_every = Duration::from_millis(ms);
            }
        }
        if let Ok(ms) = std::env::var("ACCESS_OUTBOX_MAINTENANCE_EVERY_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                cfg.outbox_maintenance_every = Duration::from_millis(ms);
            }
        }
        if let Ok(secs) = std::env::var("ACCESS_OUTBOX_LOCK_TTL_SECONDS") {
            if let Ok(secs) = secs.parse::<u64>() {
                cfg.outbox_lock_ttl = Duration::from_secs(secs);
            }
        }
        if let Ok(n) = std::env::var("ACCESS_OUTBOX_BATCH_SIZE") {
            if let Ok(n) = n.parse::<i64>() {
                cfg.outbox_batch_size = n;
            }
        }
        if let Ok(n) = std::env::var("ACCESS_OUTBOX_MAX_ATTEMPTS") {
            if let Ok(n) = n.parse::<i32>() {
                cfg.outbox_max_attempts = n;
            }
        }
        if let Ok(secs) = std::env::var("ACCESS_OUTBOX_MAX_RETRY_AFTER_SECONDS") {
            if let Ok(secs) = secs.parse::<u64>() {
                cfg.outbox_max_retry_after = Duration::from_secs(secs);
            }
        }
        if let Ok(s) = std::env::var("ACCESS_INSTANCE_ID") {
            cfg.instance_id = s;
        }
        if let Ok(s) = std::env::var("ACCESS_BUS_BOOTSTRAP") {
            cfg.bus_bootstrap = s;
        }
        if let Ok(s) = std::env::var("ACCESS_DEFAULT_ORG_TIMEZONE") {
            cfg.default_org_timezone = s;
        }
        if let Ok(s) = std::env::var("ACCESS_DEFAULT_DECISION") {
            cfg.default_decision = s;
        }
        if let Ok(s) = std::env::var("ACCESS_HTTP_CORS_ALLOWED_ORIGINS") {
            cfg.http_cors_allowed_origins =
                s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        }

        cfg
    }

    /// Resolve the effective instance id: configured value, or a fresh UUID
    /// minted once for the lifetime of this process.
    pub fn resolve_instance_id(&self) -> String {
        if self.instance_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            self.instance_id.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_the_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.outbox_dispatch_every, Duration::from_secs(2));
        assert_eq!(cfg.outbox_maintenance_every, Duration::from_secs(300));
        assert_eq!(cfg.outbox_lock_ttl, Duration::from_secs(300));
        assert_eq!(cfg.outbox_batch_size, 50);
        assert_eq!(cfg.outbox_max_attempts, 5);
        assert_eq!(cfg.outbox_max_retry_after, Duration::from_secs(600));
        assert_eq!(cfg.default_org_timezone, "UTC");
    }

    #[test]
    fn env_overrides_win_over_json() {
        std::env::set_var("ACCESS_OUTBOX_BATCH_SIZE", "7");
        let doc = serde_json::json!({"outbox": {"batch-size": 99}});
        let cfg = AppConfig::from_env_and_json(Some(&doc));
        assert_eq!(cfg.outbox_batch_size, 7);
        std::env::remove_var("ACCESS_OUTBOX_BATCH_SIZE");
    }

    #[test]
    fn empty_instance_id_mints_fresh_uuid_each_call() {
        let cfg = AppConfig::default();
        let a = cfg.resolve_instance_id();
        let b = cfg.resolve_instance_id();
        assert_ne!(a, b);
    }

    #[test]
    fn layered_yaml_merge_and_hash_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        let override_f = dir.path().join("override.yaml");
        fs::write(&base, "outbox:\n  batch-size: 50\n  max-attempts: 5\n").unwrap();
        fs::write(&override_f, "outbox:\n  batch-size: 10\n").unwrap();

        let loaded = load_layered_yaml(&[base.to_str().unwrap(), override_f.to_str().unwrap()])
            .unwrap();
        assert_eq!(
            loaded.config_json.pointer("/outbox/batch-size").unwrap(),
            10
        );
        assert_eq!(
            loaded.config_json.pointer("/outbox/max-attempts").unwrap(),
            5
        );

        let loaded_again =
            load_layered_yaml(&[base.to_str().unwrap(), override_f.to_str().unwrap()]).unwrap();
        assert_eq!(loaded.config_hash, loaded_again.config_hash);
    }
}
