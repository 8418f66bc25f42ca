//! Contract of the external payment gateway consumed by the reconciliation engine.
//!
//! The engine only sees these types; the Stripe REST adapter in `crate::stripe`
//! converts its wire DTOs and errors into them at the boundary.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use super::model::PaymentStatus;

/// Failure reported by the gateway or by the transport to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{raw_kind}: {message}")]
pub struct GatewayError {
    pub message: String,
    /// Gateway error category, e.g. `card_error`, `http`, `timeout`.
    pub raw_kind: String,
}

impl GatewayError {
    pub fn new(raw_kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw_kind: raw_kind.into(),
        }
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new("timeout", format!("{operation} timed out"))
    }
}

/// Webhook verification and parsing failures.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("timestamp tolerance exceeded: {0}")]
    TimestampTolerance(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("missing webhook secret")]
    MissingSecret,
    #[error("missing signature header")]
    MissingSignature,
}

impl WebhookError {
    /// True when the payload must not be trusted at all.
    pub fn is_verification_failure(&self) -> bool {
        !matches!(self, WebhookError::MalformedPayload(_))
    }
}

/// Status of an intent as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    Other(String),
}

impl IntentStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "requires_payment_method" => IntentStatus::RequiresPaymentMethod,
            "requires_confirmation" => IntentStatus::RequiresConfirmation,
            "requires_action" => IntentStatus::RequiresAction,
            "processing" => IntentStatus::Processing,
            "requires_capture" => IntentStatus::RequiresCapture,
            "canceled" => IntentStatus::Canceled,
            "succeeded" => IntentStatus::Succeeded,
            other => IntentStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::RequiresConfirmation => "requires_confirmation",
            IntentStatus::RequiresAction => "requires_action",
            IntentStatus::Processing => "processing",
            IntentStatus::RequiresCapture => "requires_capture",
            IntentStatus::Canceled => "canceled",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Other(s) => s.as_str(),
        }
    }

    /// The intent still needs a confirm call before it can progress.
    pub fn awaits_confirmation(&self) -> bool {
        matches!(
            self,
            IntentStatus::RequiresPaymentMethod | IntentStatus::RequiresConfirmation
        )
    }

    /// Local status mirroring this gateway status, if there is one.
    pub fn mirror(&self) -> Option<PaymentStatus> {
        match self {
            IntentStatus::Succeeded => Some(PaymentStatus::Succeeded),
            IntentStatus::Processing | IntentStatus::RequiresAction | IntentStatus::RequiresCapture => {
                Some(PaymentStatus::Processing)
            }
            IntentStatus::Canceled => Some(PaymentStatus::Canceled),
            IntentStatus::RequiresPaymentMethod | IntentStatus::RequiresConfirmation => {
                Some(PaymentStatus::Pending)
            }
            IntentStatus::Other(_) => None,
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewCustomer {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    /// Sent as `Idempotency-Key`; reused across client retries of the same call.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerProfile {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewIntent {
    pub amount_minor: i64,
    /// Lower-case, as the gateway expects.
    pub currency: String,
    pub customer_id: String,
    pub description: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub payment_method: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedIntent {
    pub intent_id: String,
    pub client_secret: String,
    pub status: IntentStatus,
}

/// Intent as last read from the gateway, with the raw JSON for echoing back to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentSnapshot {
    pub id: String,
    pub status: IntentStatus,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub intent_id: String,
    /// `None` refunds the full captured amount.
    pub amount_minor: Option<i64>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundReceipt {
    pub refund_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    IntentSucceeded,
    IntentFailed,
    IntentCanceled,
    Other(String),
}

impl EventKind {
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "payment_intent.succeeded" => EventKind::IntentSucceeded,
            "payment_intent.payment_failed" => EventKind::IntentFailed,
            "payment_intent.canceled" => EventKind::IntentCanceled,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::IntentSucceeded => "payment_intent.succeeded",
            EventKind::IntentFailed => "payment_intent.payment_failed",
            EventKind::IntentCanceled => "payment_intent.canceled",
            EventKind::Other(s) => s.as_str(),
        }
    }
}

/// A verified webhook event, reduced to what reconciliation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    pub id: String,
    pub kind: EventKind,
    pub intent_id: Option<String>,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_customer(&self, customer: NewCustomer) -> Result<String, GatewayError>;

    async fn retrieve_customer(&self, customer_id: &str) -> Result<CustomerProfile, GatewayError>;

    async fn create_intent(&self, intent: NewIntent) -> Result<CreatedIntent, GatewayError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentSnapshot, GatewayError>;

    async fn confirm_intent(
        &self,
        intent_id: &str,
        payment_method: Option<&str>,
    ) -> Result<IntentSnapshot, GatewayError>;

    async fn create_refund(&self, refund: RefundRequest) -> Result<RefundReceipt, GatewayError>;

    /// Verifies the signature header against the raw payload and parses the event.
    fn construct_event(&self, payload: &[u8], signature: &str) -> Result<GatewayEvent, WebhookError>;
}
