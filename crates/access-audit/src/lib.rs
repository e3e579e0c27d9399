//! Audit pipeline: consumes the outbox bus topic, dedupes and
//! persists an audit trail, and routes unrecoverable messages through a
//! DLQ with a parking-lot terminal channel.

pub mod consumer;
pub mod dlq;
pub mod eventkey;
pub mod persist;
pub mod reprocessor;

pub use consumer::run_audit_consumer_loop;
pub use dlq::{DlqPublisher, DlqRecord, DLQ_TOPIC, PARKING_LOT_TOPIC};
pub use eventkey::derive_event_key;
pub use persist::persist_envelope;
pub use reprocessor::run_dlq_reprocessor_loop;
