//! Bus Sender: publishes a claimed outbox row to the message bus and
//! classifies transport failures as retryable/terminal.
//!
//! Mirrors the pack's identity-service outbox consumer (rdkafka
//! `FutureProducer`, topic-per-aggregate-type convention) behind a `Sender`
//! trait so the dispatcher never depends on rdkafka directly — tests
//! substitute an in-memory sender instead of standing up a broker.

use std::time::Duration;

use access_db::outbox::OutboxRow;
use async_trait::async_trait;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::Serialize;

/// Fixed on-wire envelope: carries the original payload verbatim alongside
/// event metadata, so a consumer can dispatch on `event_type` without a
/// second database lookup.
#[derive(Debug, Serialize)]
struct EventEnvelope<'a> {
    event_id: uuid::Uuid,
    org_id: uuid::Uuid,
    event_type: &'a str,
    aggregate_type: &'a str,
    aggregate_id: &'a str,
    created_at_utc: chrono::DateTime<chrono::Utc>,
    attempts: i32,
    payload: &'a serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
}

/// The classification a `Sender` reports back to the dispatcher for every
/// failed publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendError {
    pub code: String,
    pub http_status: Option<i32>,
    pub message: String,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
}

impl SendError {
    fn new(code: &str, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.to_string(),
            http_status: None,
            message: message.into(),
            retryable,
            retry_after: None,
        }
    }
}

/// Transport used by the dispatcher to hand a claimed row to the bus. The
/// topic is derived from `event_type`'s leading `access.<segment>` prefix
/// ("publishes to the topic for that event type").
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, row: &OutboxRow) -> Result<SendOutcome, SendError>;
}

pub fn topic_for_event_type(event_type: &str) -> String {
    let segment = event_type.split('.').nth(1).unwrap_or("unknown");
    format!("access.{segment}.events")
}

/// Classify an rdkafka publish failure: timeout and network/disconnect
/// errors are retryable with a distinct code; oversize or malformed-record
/// errors are terminal; anything unrecognized is retried conservatively.
fn classify_kafka_error(err: &KafkaError) -> (&'static str, bool) {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageTimedOut) | Some(RDKafkaErrorCode::RequestTimedOut) => {
            ("TIMEOUT", true)
        }
        Some(RDKafkaErrorCode::AllBrokersDown)
        | Some(RDKafkaErrorCode::BrokerTransportFailure)
        | Some(RDKafkaErrorCode::NetworkException)
        | Some(RDKafkaErrorCode::TransportError) => ("CONNECTION", true),
        Some(RDKafkaErrorCode::MessageSizeTooLarge) | Some(RDKafkaErrorCode::InvalidMessage) => {
            ("MESSAGE_REJECTED", false)
        }
        Some(_) => ("TRANSPORT", true),
        None => ("UNKNOWN", true),
    }
}

pub struct KafkaSender {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaSender {
    pub fn new(bootstrap_servers: &str) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("client.id", "access-outbox-dispatcher")
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("retries", "3")
            .create()?;

        Ok(Self {
            producer,
            send_timeout: Duration::from_secs(10),
        })
    }
}

#[async_trait]
impl Sender for KafkaSender {
    async fn send(&self, row: &OutboxRow) -> Result<SendOutcome, SendError> {
        let topic = topic_for_event_type(&row.event_type);
        let key = row.org_id.to_string();
        let envelope = EventEnvelope {
            event_id: row.event_id,
            org_id: row.org_id,
            event_type: &row.event_type,
            aggregate_type: &row.aggregate_type,
            aggregate_id: &row.aggregate_id,
            created_at_utc: row.created_at_utc,
            attempts: row.attempts,
            payload: &row.payload,
        };
        let body = serde_json::to_string(&envelope).map_err(|err| {
            SendError::new("JSON_SERIALIZATION", err.to_string(), false)
        })?;

        let record = FutureRecord::to(&topic).key(&key).payload(&body);

        self.producer
            .send(record, self.send_timeout)
            .await
            .map(|_| SendOutcome::Sent)
            .map_err(|(err, _)| {
                let (code, retryable) = classify_kafka_error(&err);
                SendError::new(code, err.to_string(), retryable)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_derived_from_event_type_segment() {
        assert_eq!(
            topic_for_event_type("access.attempt.AttemptRegistered"),
            "access.attempt.events"
        );
        assert_eq!(
            topic_for_event_type("access.policy.PolicyChanged"),
            "access.policy.events"
        );
        assert_eq!(topic_for_event_type("malformed"), "access.unknown.events");
    }

    #[test]
    fn timeout_and_connection_errors_classify_retryable() {
        assert_eq!(
            classify_kafka_error(&KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut)),
            ("TIMEOUT", true)
        );
        assert_eq!(
            classify_kafka_error(&KafkaError::MessageProduction(RDKafkaErrorCode::AllBrokersDown)),
            ("CONNECTION", true)
        );
    }

    #[test]
    fn oversize_record_classifies_terminal() {
        assert_eq!(
            classify_kafka_error(&KafkaError::MessageProduction(
                RDKafkaErrorCode::MessageSizeTooLarge
            )),
            ("MESSAGE_REJECTED", false)
        );
    }
}
