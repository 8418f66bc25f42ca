// Read-only payment lookups

use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::error::PaymentError;
use super::model::PaymentAttempt;
use super::store::PaymentStore;

#[derive(Clone)]
pub struct PaymentQueries {
    store: Arc<dyn PaymentStore>,
}

impl PaymentQueries {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: Uuid) -> Result<PaymentAttempt, PaymentError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| PaymentError::not_found(id))
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub async fn get_by_user(&self, user_id: &str) -> Result<Vec<PaymentAttempt>, PaymentError> {
        Ok(self.store.find_all_by_user(user_id).await?)
    }
}
