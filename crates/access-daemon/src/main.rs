//! access-daemon entry point.
//!
//! Thin by design: load config, build the shared state and service
//! collaborators, spawn the background loops, wire HTTP middleware, serve.
//! All route handlers live in `routes.rs`; all shared state in `state.rs`.

use std::{collections::BTreeSet, net::SocketAddr, sync::Arc};

use access_attempt::{parse_default_decision, AttemptService};
use access_audit::{run_audit_consumer_loop, run_dlq_reprocessor_loop, DlqPublisher};
use access_config::AppConfig;
use access_daemon::{routes, state};
use access_outbox::dispatcher::DispatcherConfig;
use access_outbox::sender::{topic_for_event_type, KafkaSender};
use access_outbox::{run_dispatch_loop, run_maintenance_loop};
use access_policy::run_policy_consumer_loop;
use access_rules::RuleCandidatesCache;
use access_schemas::events::AUDIT_EVENT_TYPE_WHITELIST;
use access_zone::ZoneCache;
use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev-time convenience; silent if the file does not exist.
    // Production injects env vars directly instead.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = AppConfig::from_env_and_json(None);
    let instance_id = config.resolve_instance_id();

    let pool = access_db::connect_from_env()
        .await
        .context("failed to connect to Postgres")?;
    access_db::migrate(&pool).await.context("migrations failed")?;

    let zone_cache = ZoneCache::new();
    let rule_cache = RuleCandidatesCache::new();
    let default_decision = parse_default_decision(&config.default_decision);

    let attempts = AttemptService::new(pool.clone(), zone_cache, rule_cache.clone(), default_decision);

    let sender = Arc::new(
        KafkaSender::new(&config.bus_bootstrap).context("failed to construct Kafka sender")?,
    );
    let dlq = DlqPublisher::new(&config.bus_bootstrap).context("failed to construct DLQ publisher")?;

    spawn_background_loops(&config, &instance_id, pool.clone(), rule_cache, sender, dlq);

    let shared = Arc::new(state::AppState::new(
        pool,
        attempts,
        config.outbox_lock_ttl,
    ));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_from_config(&config));

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));
    info!(instance_id = %instance_id, "access-daemon listening on http://{addr}");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

/// Spawn the five scheduler-driven background loops ("N
/// scheduler-driven background loops", //): outbox dispatch,
/// outbox maintenance, the policy-change consumer, the audit consumer, and
/// the DLQ reprocessor. Spawned from `main`, never from a request handler.
fn spawn_background_loops(
    config: &AppConfig,
    instance_id: &str,
    pool: sqlx::PgPool,
    rule_cache: RuleCandidatesCache,
    sender: Arc<KafkaSender>,
    dlq: DlqPublisher,
) {
    let lock_ttl = chrono::Duration::from_std(config.outbox_lock_ttl)
        .unwrap_or_else(|_| chrono::Duration::seconds(300));

    let dispatch_config = DispatcherConfig {
        batch_size: config.outbox_batch_size,
        max_attempts: config.outbox_max_attempts,
        max_retry_after: config.outbox_max_retry_after,
        owner: instance_id.to_string(),
        lock_ttl,
    };
    {
        let pool = pool.clone();
        let every = config.outbox_dispatch_every;
        tokio::spawn(async move {
            run_dispatch_loop(pool, sender, dispatch_config, every).await;
        });
    }

    {
        let pool = pool.clone();
        let every = config.outbox_maintenance_every;
        tokio::spawn(async move {
            run_maintenance_loop(pool, lock_ttl, every).await;
        });
    }

    {
        let bootstrap = config.bus_bootstrap.clone();
        let topic = topic_for_event_type("access.policy.PolicyChanged");
        let group_id = format!("access-policy-consumer-{instance_id}");
        tokio::spawn(async move {
            if let Err(err) = run_policy_consumer_loop(bootstrap, topic, group_id, rule_cache).await
            {
                tracing::error!(error = %err, "policy consumer loop exited");
            }
        });
    }

    {
        let pool = pool.clone();
        let bootstrap = config.bus_bootstrap.clone();
        let topics = audit_consumer_topics();
        let group_id = format!("access-audit-consumer-{instance_id}");
        let dlq = dlq.clone();
        tokio::spawn(async move {
            if let Err(err) = run_audit_consumer_loop(pool, bootstrap, topics, group_id, dlq).await
            {
                tracing::error!(error = %err, "audit consumer loop exited");
            }
        });
    }

    {
        let bootstrap = config.bus_bootstrap.clone();
        let group_id = format!("access-audit-dlq-reprocessor-{instance_id}");
        tokio::spawn(async move {
            if let Err(err) = run_dlq_reprocessor_loop(pool, bootstrap, group_id, dlq).await {
                tracing::error!(error = %err, "dlq reprocessor loop exited");
            }
        });
    }
}

/// The distinct bus topics the whitelisted audit event types publish to
/// (derived from the sender's own topic-derivation rule, so this never
/// drifts from what the dispatcher actually publishes).
fn audit_consumer_topics() -> Vec<String> {
    AUDIT_EVENT_TYPE_WHITELIST
        .iter()
        .map(|event_type| topic_for_event_type(event_type))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("ACCESS_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only the configured origin allow-list. This is a backend
/// API with real external callers, so the allow-list comes from config
/// rather than a fixed dev-only origin.
fn cors_from_config(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .http_cors_allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    if origins.is_empty() {
        return CorsLayer::new();
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
