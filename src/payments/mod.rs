//! Payment attempts: the record model, its storage, the gateway contract and
//! the engine that keeps the two in agreement.

pub mod amount;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod model;
pub mod notifier;
pub mod query;
pub mod store;

#[cfg(test)]
pub mod fake;

pub use engine::{Confirmation, CreateIntent, CreatedPayment, ReconciliationEngine, WebhookAck};
pub use error::PaymentError;
pub use gateway::PaymentGateway;
pub use notifier::{StatusNotifier, StatusUpdate};
pub use query::PaymentQueries;
pub use store::{PaymentStore, RedbPaymentStore};
