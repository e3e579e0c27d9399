//! Policy-Change Dispatcher: the rule CRUD service that produces
//! `PolicyChanged`/`ChangeRejected` outbox events, plus the consumer that
//! turns `PolicyChanged`/`PolicyInvalidateAllRequested` back into cache
//! invalidation on every node.

pub mod consumer;
pub mod rule;

pub use consumer::run_policy_consumer_loop;
pub use rule::{NewRuleInput, RuleCrudError, RuleCrudService, SetRuleStateInput};
