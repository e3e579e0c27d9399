//! DLQ / Parking-Lot Publisher: best-effort side channel for
//! consumer messages that fail to persist. DLQ messages are retried once;
//! the parking lot is terminal.

use chrono::{DateTime, Utc};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

pub const DLQ_TOPIC: &str = "audit-dlq";
pub const PARKING_LOT_TOPIC: &str = "audit-parking-lot";

#[derive(Debug, Serialize)]
pub struct DlqRecord<'a> {
    pub original_envelope: &'a Value,
    pub error_type: &'a str,
    pub error_message: &'a str,
    pub source_topic: &'a str,
    pub source_partition: i32,
    pub source_offset: i64,
    pub failed_at_utc: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DlqPublisher {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl DlqPublisher {
    pub fn new(bootstrap_servers: &str) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("client.id", "access-audit-dlq-publisher")
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()?;
        Ok(Self {
            producer,
            send_timeout: Duration::from_secs(10),
        })
    }

    pub async fn publish(&self, topic: &str, record: &DlqRecord<'_>) -> anyhow::Result<()> {
        let key = record.source_topic;
        let body = serde_json::to_string(record)?;
        let future_record = FutureRecord::to(topic).key(key).payload(&body);
        self.producer
            .send(future_record, self.send_timeout)
            .await
            .map(|_| ())
            .map_err(|(err, _)| anyhow::anyhow!("dlq publish to {topic} failed: {err}"))
    }
}
