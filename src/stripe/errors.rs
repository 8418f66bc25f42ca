// Stripe-specific error types and mappings

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payments::gateway::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StripeErrorType {
    ApiConnectionError,
    ApiError,
    AuthenticationError,
    CardError,
    IdempotencyError,
    InvalidRequestError,
    RateLimitError,
    ValidationError,
    Unknown,
}

impl StripeErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StripeErrorType::ApiConnectionError => "api_connection_error",
            StripeErrorType::ApiError => "api_error",
            StripeErrorType::AuthenticationError => "authentication_error",
            StripeErrorType::CardError => "card_error",
            StripeErrorType::IdempotencyError => "idempotency_error",
            StripeErrorType::InvalidRequestError => "invalid_request_error",
            StripeErrorType::RateLimitError => "rate_limit_error",
            StripeErrorType::ValidationError => "validation_error",
            StripeErrorType::Unknown => "unknown",
        }
    }
}

impl From<&str> for StripeErrorType {
    fn from(s: &str) -> Self {
        match s {
            "api_connection_error" => StripeErrorType::ApiConnectionError,
            "api_error" => StripeErrorType::ApiError,
            "authentication_error" => StripeErrorType::AuthenticationError,
            "card_error" => StripeErrorType::CardError,
            "idempotency_error" => StripeErrorType::IdempotencyError,
            "invalid_request_error" => StripeErrorType::InvalidRequestError,
            "rate_limit_error" => StripeErrorType::RateLimitError,
            "validation_error" => StripeErrorType::ValidationError,
            _ => StripeErrorType::Unknown,
        }
    }
}

// Stripe REST error envelope: { error: { type, code, decline_code, message, param } }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeErrorEnvelope {
    pub error: StripeErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeErrorDetails {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl StripeErrorEnvelope {
    pub fn to_api_error_with_status(self, status: Option<u16>) -> StripeApiError {
        StripeApiError::Stripe {
            type_: StripeErrorType::from(self.error.type_.as_str()),
            message: self.error.message,
            code: self.error.code,
            param: self.error.param,
            status,
        }
    }
}

#[derive(Debug, Error)]
pub enum StripeApiError {
    #[error("http error: {0}")]
    Http(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("stripe error: {type_:?} message={message:?} code={code:?} param={param:?}")]
    Stripe {
        type_: StripeErrorType,
        message: Option<String>,
        code: Option<String>,
        param: Option<String>,
        status: Option<u16>,
    },
    #[error("precondition failed: {0}")]
    Precondition(&'static str),
}

// Stripe's own message is what callers see; the error type travels as the raw kind.
impl From<StripeApiError> for GatewayError {
    fn from(e: StripeApiError) -> Self {
        match e {
            StripeApiError::Http(msg) => GatewayError::new("api_connection_error", msg),
            StripeApiError::Decode(msg) => GatewayError::new("decode_error", msg),
            StripeApiError::Stripe {
                type_,
                message,
                code,
                ..
            } => {
                let message = message
                    .or(code)
                    .unwrap_or_else(|| "Stripe request failed".to_string());
                GatewayError::new(type_.as_str(), message)
            }
            StripeApiError::Precondition(msg) => GatewayError::new("precondition_failed", msg),
        }
    }
}

// Helper indicating whether an error is likely transient (api_error or 5xx)
pub fn is_transient(http_status: Option<u16>, type_: Option<&StripeErrorType>) -> bool {
    if let Some(s) = http_status {
        if (500..600).contains(&s) {
            return true;
        }
    }
    if let Some(t) = type_ {
        matches!(
            t,
            StripeErrorType::ApiConnectionError
                | StripeErrorType::ApiError
                | StripeErrorType::RateLimitError
        )
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_maps_to_gateway_error() {
        let body = r#"{"error":{"type":"card_error","code":"card_declined","message":"Your card was declined."}}"#;
        let env: StripeErrorEnvelope = serde_json::from_str(body).unwrap();
        let err: GatewayError = env.to_api_error_with_status(Some(402)).into();
        assert_eq!(err.raw_kind, "card_error");
        assert_eq!(err.message, "Your card was declined.");
    }

    #[test]
    fn test_message_falls_back_to_code() {
        let err: GatewayError = StripeApiError::Stripe {
            type_: StripeErrorType::InvalidRequestError,
            message: None,
            code: Some("resource_missing".to_string()),
            param: None,
            status: Some(404),
        }
        .into();
        assert_eq!(err.message, "resource_missing");
        assert_eq!(err.raw_kind, "invalid_request_error");
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(Some(502), None));
        assert!(is_transient(Some(429), Some(&StripeErrorType::RateLimitError)));
        assert!(!is_transient(Some(402), Some(&StripeErrorType::CardError)));
        assert!(!is_transient(None, None));
    }
}
