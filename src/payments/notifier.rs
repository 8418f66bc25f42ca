// Status change broadcasting for payment attempts

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::model::{ChangeOrigin, PaymentStatus};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Update message sent to subscribers, once per applied transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub payment_id: Uuid,
    pub payment_intent_id: String,
    pub from: PaymentStatus,
    pub status: PaymentStatus,
    pub origin: ChangeOrigin,
}

/// Fan-out of status transitions to in-process listeners
pub struct StatusNotifier {
    tx: broadcast::Sender<StatusUpdate>,
}

impl StatusNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }

    /// Publish a transition; returns the number of subscribers reached
    pub fn publish(&self, update: StatusUpdate) -> usize {
        match self.tx.send(update) {
            Ok(count) => count,
            Err(e) => {
                debug!(
                    payment_intent_id = %e.0.payment_intent_id,
                    "No subscribers for payment status update"
                );
                0
            }
        }
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}
