// Minimal Stripe API DTOs
// Only the fields reconciliation reads are typed; everything else stays in the raw JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::payments::gateway::{CustomerProfile, EventKind, GatewayEvent};

// PaymentIntent minimal shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastPaymentError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Customer {
    pub fn into_profile(self, raw: serde_json::Value) -> CustomerProfile {
        CustomerProfile {
            id: self.id,
            email: self.email,
            name: self.name,
            metadata: self.metadata,
            raw,
        }
    }
}

// Refund minimal shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent: Option<String>,
}

/// Stripe webhook event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub livemode: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

impl StripeEvent {
    /// Intent id and failure message are read only for `payment_intent.*` events.
    pub fn into_gateway_event(self) -> GatewayEvent {
        let kind = EventKind::parse(&self.event_type);
        let is_intent = self.data.object.get("object").and_then(|o| o.as_str())
            == Some("payment_intent")
            || self.event_type.starts_with("payment_intent.");

        let (intent_id, error_message) = if is_intent {
            let intent_id = self
                .data
                .object
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let error_message = self
                .data
                .object
                .pointer("/last_payment_error/message")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            (intent_id, error_message)
        } else {
            (None, None)
        };

        GatewayEvent {
            id: self.id,
            kind,
            intent_id,
            error_message,
        }
    }
}
