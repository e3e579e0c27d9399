//! Transactional Outbox: writer, dispatcher, bus sender, and
//! the ghost-lock maintenance sweep, grounded on the pack's identity-service
//! outbox consumer (`CircuitBreakerKafkaPublisher`/claim-batch/backoff/DLQ
//! shape) and `access-db::outbox`'s `FOR UPDATE SKIP LOCKED` persistence.

pub mod dispatcher;
pub mod maintenance;
pub mod sender;
pub mod writer;

pub use dispatcher::{dispatch_once, run_dispatch_loop, DispatchStats, DispatcherConfig};
pub use maintenance::run_maintenance_loop;
pub use sender::{KafkaSender, SendError, SendOutcome, Sender};
pub use writer::write_event;
