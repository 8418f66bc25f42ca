// Stripe webhook signature verification and event parsing

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::payments::gateway::{GatewayEvent, WebhookError};
use crate::stripe::types::StripeEvent;

type HmacSha256 = Hmac<Sha256>;

/// Verify and parse a delivery. The payload is only decoded after the signature checks out.
pub fn construct_event(
    payload: &[u8],
    signature_header: &str,
    webhook_secret: &str,
    tolerance_seconds: i64,
) -> Result<GatewayEvent, WebhookError> {
    verify_signature(payload, signature_header, webhook_secret, tolerance_seconds)?;
    parse_event(payload)
}

pub fn parse_event(payload: &[u8]) -> Result<GatewayEvent, WebhookError> {
    let evt: StripeEvent = serde_json::from_slice(payload)
        .map_err(|e| WebhookError::MalformedPayload(format!("JSON parse error: {}", e)))?;
    Ok(evt.into_gateway_event())
}

/// Verify Stripe webhook signature using HMAC SHA-256
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    webhook_secret: &str,
    tolerance_seconds: i64,
) -> Result<(), WebhookError> {
    if webhook_secret.is_empty() {
        return Err(WebhookError::MissingSecret);
    }
    if signature_header.trim().is_empty() {
        return Err(WebhookError::MissingSignature);
    }

    // t=timestamp,v1=signature[,v1=signature2,...]
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        WebhookError::InvalidSignature("Missing timestamp in signature header".to_string())
    })?;

    if signatures.is_empty() {
        return Err(WebhookError::InvalidSignature(
            "No v1 signature found".to_string(),
        ));
    }

    let current_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| WebhookError::InvalidSignature(format!("System time error: {}", e)))?
        .as_secs() as i64;

    let time_diff = current_time.saturating_sub(timestamp).saturating_abs();
    if time_diff > tolerance_seconds {
        return Err(WebhookError::TimestampTolerance(format!(
            "Timestamp {} differs from current time {} by {} seconds (tolerance: {})",
            timestamp, current_time, time_diff, tolerance_seconds
        )));
    }

    let expected_signature = sign(payload, timestamp, webhook_secret)?;

    // Constant-time comparison
    let signature_valid = signatures.iter().any(|sig| {
        expected_signature.len() == sig.len()
            && expected_signature
                .as_bytes()
                .iter()
                .zip(sig.as_bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    });

    if !signature_valid {
        return Err(WebhookError::InvalidSignature(
            "No signatures found matching the expected signature for payload".to_string(),
        ));
    }

    debug!(
        timestamp = timestamp,
        time_diff = time_diff,
        "Webhook signature verified successfully"
    );

    Ok(())
}

/// Hex HMAC over `"{timestamp}.{payload}"`.
pub(crate) fn sign(payload: &[u8], timestamp: i64, secret: &str) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::InvalidSignature(format!("HMAC init error: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
