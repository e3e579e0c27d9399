//! DLQ reprocessor: replays `audit-dlq` messages through the
//! same persist path once more; a second failure is terminal and routes to
//! the parking-lot topic for human review.

use futures_util::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message, TopicPartitionList};
use tracing::{debug, error, warn};

use crate::dlq::{DlqPublisher, DlqRecord, DLQ_TOPIC, PARKING_LOT_TOPIC};
use crate::persist::persist_envelope;

pub async fn run_dlq_reprocessor_loop(
    pool: sqlx::PgPool,
    bootstrap_servers: String,
    group_id: String,
    dlq: DlqPublisher,
) -> anyhow::Result<()> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &bootstrap_servers)
        .set("group.id", &group_id)
        .set("enable.auto.commit", "false")
        .set("enable.partition.eof", "false")
        .create()?;
    consumer.subscribe(&[DLQ_TOPIC])?;

    let mut stream = consumer.stream();
    while let Some(message) = stream.next().await {
        let borrowed = match message {
            Ok(m) => m,
            Err(err) => {
                error!(error = %err, "dlq reprocessor: kafka poll error");
                continue;
            }
        };

        let source_partition = borrowed.partition();
        let source_offset = borrowed.offset();

        if let Some(Ok(payload)) = borrowed.payload_view::<str>() {
            reprocess_one(&pool, &dlq, payload, source_partition, source_offset).await;
        } else {
            warn!("dlq reprocessor: message with no/invalid utf8 payload, skipping");
        }

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(DLQ_TOPIC, source_partition, rdkafka::Offset::Offset(source_offset + 1))?;
        if let Err(err) = consumer.commit(&tpl, CommitMode::Async) {
            warn!(error = %err, "dlq reprocessor: offset commit failed");
        }
    }

    Ok(())
}

async fn reprocess_one(
    pool: &sqlx::PgPool,
    dlq: &DlqPublisher,
    raw: &str,
    source_partition: i32,
    source_offset: i64,
) {
    let dlq_record: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(err) => {
            park(dlq, raw, "DlqRecordDeserializationError", &err.to_string(), source_partition, source_offset).await;
            return;
        }
    };

    let Some(original_envelope) = dlq_record.get("original_envelope").cloned() else {
        park(dlq, raw, "MissingOriginalEnvelope", "dlq record has no original_envelope field", source_partition, source_offset).await;
        return;
    };

    match persist_envelope(pool, &original_envelope).await {
        Ok(_) => debug!("dlq reprocessor: reprocessed message successfully"),
        Err(err) => park(dlq, raw, "AuditPersistError", &err.to_string(), source_partition, source_offset).await,
    }
}

async fn park(
    dlq: &DlqPublisher,
    raw: &str,
    error_type: &str,
    error_message: &str,
    source_partition: i32,
    source_offset: i64,
) {
    let original_envelope: serde_json::Value =
        serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "raw": raw }));
    let record = DlqRecord {
        original_envelope: &original_envelope,
        error_type,
        error_message,
        source_topic: DLQ_TOPIC,
        source_partition,
        source_offset,
        failed_at_utc: chrono::Utc::now(),
    };
    if let Err(publish_err) = dlq.publish(PARKING_LOT_TOPIC, &record).await {
        error!(
            error = %publish_err,
            source_offset,
            "dlq reprocessor: failed to publish to parking lot, message dropped after ack"
        );
    } else {
        warn!(source_offset, "dlq reprocessor: message parked for human review");
    }
}
