//! Audit Consumer: reads the outbox bus topic(s), filters against the
//! whitelist, persists a deduplicated audit trail, and routes unrecoverable
//! messages to the DLQ.

use access_schemas::AUDIT_EVENT_TYPE_WHITELIST;
use futures_util::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message, TopicPartitionList};
use tracing::{debug, error, warn};

use crate::dlq::{DlqPublisher, DlqRecord, DLQ_TOPIC};
use crate::persist::persist_envelope;

/// Run the primary audit consumer loop against `topics` (the
/// `audit-*` topics). Every message is ACKed (offset committed) regardless
/// of outcome — a persist failure routes to the DLQ instead of blocking
/// redelivery ("ACK the original to prevent infinite
/// redelivery").
pub async fn run_audit_consumer_loop(
    pool: sqlx::PgPool,
    bootstrap_servers: String,
    topics: Vec<String>,
    group_id: String,
    dlq: DlqPublisher,
) -> anyhow::Result<()> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &bootstrap_servers)
        .set("group.id", &group_id)
        .set("enable.auto.commit", "false")
        .set("enable.partition.eof", "false")
        .create()?;

    let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
    consumer.subscribe(&topic_refs)?;

    let mut stream = consumer.stream();
    while let Some(message) = stream.next().await {
        let borrowed = match message {
            Ok(m) => m,
            Err(err) => {
                error!(error = %err, "audit consumer: kafka poll error");
                continue;
            }
        };

        let source_topic = borrowed.topic().to_string();
        let source_partition = borrowed.partition();
        let source_offset = borrowed.offset();

        if let Some(Ok(payload)) = borrowed.payload_view::<str>() {
            handle_message(&pool, &dlq, payload, &source_topic, source_partition, source_offset)
                .await;
        } else {
            warn!("audit consumer: message with no/invalid utf8 payload, skipping");
        }

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &source_topic,
            source_partition,
            rdkafka::Offset::Offset(source_offset + 1),
        )?;
        if let Err(err) = consumer.commit(&tpl, CommitMode::Async) {
            warn!(error = %err, "audit consumer: offset commit failed");
        }
    }

    Ok(())
}

async fn handle_message(
    pool: &sqlx::PgPool,
    dlq: &DlqPublisher,
    raw: &str,
    source_topic: &str,
    source_partition: i32,
    source_offset: i64,
) {
    let envelope: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(err) => {
            route_to_dlq(dlq, raw, "EnvelopeDeserializationError", &err.to_string(), source_topic, source_partition, source_offset).await;
            return;
        }
    };

    let event_type = envelope.get("event_type").and_then(|v| v.as_str()).unwrap_or_default();
    if !AUDIT_EVENT_TYPE_WHITELIST.contains(&event_type) {
        debug!(event_type, "audit consumer: event type not in whitelist, ack+skip");
        return;
    }

    match persist_envelope(pool, &envelope).await {
        Ok(true) => debug!(event_type, "audit consumer: persisted new audit row"),
        Ok(false) => debug!(event_type, "audit consumer: duplicate event_key, dedup skip"),
        Err(err) => {
            route_to_dlq(dlq, raw, "AuditPersistError", &err.to_string(), source_topic, source_partition, source_offset).await;
        }
    }
}

async fn route_to_dlq(
    dlq: &DlqPublisher,
    raw: &str,
    error_type: &str,
    error_message: &str,
    source_topic: &str,
    source_partition: i32,
    source_offset: i64,
) {
    let original_envelope: serde_json::Value =
        serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "raw": raw }));
    let record = DlqRecord {
        original_envelope: &original_envelope,
        error_type,
        error_message,
        source_topic,
        source_partition,
        source_offset,
        failed_at_utc: chrono::Utc::now(),
    };
    if let Err(publish_err) = dlq.publish(DLQ_TOPIC, &record).await {
        error!(
            error = %publish_err,
            source_topic,
            source_offset,
            "audit consumer: failed to publish to DLQ, message dropped after ack"
        );
    }
}
