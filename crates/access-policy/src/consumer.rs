//! Policy-change consumer: subscribes to the policy events topic and turns
//! `PolicyChanged`/`PolicyInvalidateAllRequested` into local cache
//! invalidation, so every process converges on the same rule set without a
//! distributed cache ("cluster-wide consistency is achieved by
//! every node consuming the same `PolicyChanged` stream").

use access_rules::RuleCandidatesCache;
use futures_util::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message};
use serde::Deserialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct PolicyChangedPayload {
    org_id: Uuid,
    area_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct InvalidateAllPayload {
    org_id: Uuid,
}

pub async fn run_policy_consumer_loop(
    bootstrap_servers: String,
    topic: String,
    group_id: String,
    cache: RuleCandidatesCache,
) -> anyhow::Result<()> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &bootstrap_servers)
        .set("group.id", &group_id)
        .set("enable.partition.eof", "false")
        .create()?;
    consumer.subscribe(&[topic.as_str()])?;

    let mut stream = consumer.stream();
    while let Some(message) = stream.next().await {
        match message {
            Ok(borrowed) => {
                let Some(Ok(payload)) = borrowed.payload_view::<str>() else {
                    warn!("policy consumer: message with no/invalid utf8 payload, skipping");
                    continue;
                };
                handle_payload(payload, &cache).await;
            }
            Err(err) => error!(error = %err, "policy consumer: kafka poll error"),
        }
    }

    Ok(())
}

async fn handle_payload(raw: &str, cache: &RuleCandidatesCache) {
    let envelope: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "policy consumer: failed to parse event envelope");
            return;
        }
    };

    let event_type = envelope
        .get("event_type")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let Some(payload) = envelope.get("payload").cloned() else {
        warn!(event_type = %event_type, "policy consumer: envelope missing payload field");
        return;
    };

    match event_type.as_str() {
        "access.policy.PolicyChanged" => match serde_json::from_value::<PolicyChangedPayload>(payload) {
            Ok(p) => {
                cache.invalidate_area(p.org_id, p.area_id).await;
                debug!(org_id = %p.org_id, area_id = %p.area_id, "rule cache invalidated for area");
            }
            Err(err) => warn!(error = %err, "policy consumer: malformed PolicyChanged payload"),
        },
        "access.policy.PolicyInvalidateAllRequested" => {
            match serde_json::from_value::<InvalidateAllPayload>(payload) {
                Ok(p) => {
                    cache.invalidate_all().await;
                    debug!(org_id = %p.org_id, "rule cache fully invalidated");
                }
                Err(err) => warn!(error = %err, "policy consumer: malformed PolicyInvalidateAllRequested payload"),
            }
        }
        other => debug!(event_type = other, "policy consumer: ignoring unrelated event type"),
    }
}
