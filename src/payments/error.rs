// Error taxonomy surfaced by payment operations

use thiserror::Error;

use super::amount::AmountError;
use super::gateway::{GatewayError, WebhookError};
use super::store::StoreError;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("payment operation failed: {0}")]
    Gateway(#[from] GatewayError),
    #[error("webhook signature verification failed: {0}")]
    SignatureInvalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PaymentError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        PaymentError::NotFound(format!("Payment not found: {what}"))
    }

    /// HTTP status code equivalent
    pub fn status_code(&self) -> u16 {
        match self {
            PaymentError::Validation(_) => 400,
            PaymentError::NotFound(_) => 404,
            PaymentError::Gateway(_) => 400,
            PaymentError::SignatureInvalid(_) => 401,
            PaymentError::Store(_) => 500,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Validation(_) => "validation_error",
            PaymentError::NotFound(_) => "not_found",
            PaymentError::Gateway(_) => "gateway_error",
            PaymentError::SignatureInvalid(_) => "signature_invalid",
            PaymentError::Store(_) => "internal_error",
        }
    }
}

impl From<AmountError> for PaymentError {
    fn from(e: AmountError) -> Self {
        PaymentError::Validation(e.to_string())
    }
}

impl From<WebhookError> for PaymentError {
    fn from(e: WebhookError) -> Self {
        if e.is_verification_failure() {
            PaymentError::SignatureInvalid(e.to_string())
        } else {
            PaymentError::Validation(e.to_string())
        }
    }
}
