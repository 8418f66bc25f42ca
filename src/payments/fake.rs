// Recording in-memory gateway used by engine and server tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use super::gateway::{
    CreatedIntent, CustomerProfile, EventKind, GatewayError, GatewayEvent, IntentSnapshot,
    IntentStatus, NewCustomer, NewIntent, PaymentGateway, RefundReceipt, RefundRequest,
    WebhookError,
};

pub const VALID_SIGNATURE: &str = "t=1,v1=valid";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateCustomer(String),
    RetrieveCustomer(String),
    CreateIntent { amount_minor: i64, currency: String, customer_id: String },
    RetrieveIntent(String),
    ConfirmIntent { intent_id: String, payment_method: Option<String> },
    CreateRefund { intent_id: String, amount_minor: Option<i64>, idempotency_key: String },
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    idempotency_keys: Vec<String>,
    intents: HashMap<String, IntentStatus>,
    confirm_result: Option<IntentStatus>,
    fail_next: Option<GatewayError>,
    next_customer: u32,
    next_intent: u32,
    next_refund: u32,
}

/// Gateway double: customer ids `cus_N`, intent ids `pi_N`, refund ids `re_N`.
/// Webhook payloads are JSON `{"id","type","intent","error"}`, accepted only
/// with [`VALID_SIGNATURE`].
#[derive(Default)]
pub struct FakeGateway {
    inner: Mutex<Inner>,
    delay: Option<Duration>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            inner: Mutex::default(),
            delay: Some(delay),
        }
    }

    pub fn set_intent_status(&self, intent_id: &str, status: IntentStatus) {
        self.inner
            .lock()
            .unwrap()
            .intents
            .insert(intent_id.to_string(), status);
    }

    /// Status an intent moves to when confirmed (default `succeeded`).
    pub fn set_confirm_result(&self, status: IntentStatus) {
        self.inner.lock().unwrap().confirm_result = Some(status);
    }

    pub fn fail_next(&self, error: GatewayError) {
        self.inner.lock().unwrap().fail_next = Some(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Keys sent with create-customer, create-intent and refund calls, in order.
    pub fn idempotency_keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().idempotency_keys.clone()
    }

    pub fn confirm_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::ConfirmIntent { .. }))
            .count()
    }

    pub fn webhook_payload(
        event_id: &str,
        event_type: &str,
        intent_id: &str,
        error: Option<&str>,
    ) -> Vec<u8> {
        serde_json::json!({
            "id": event_id,
            "type": event_type,
            "intent": intent_id,
            "error": error,
        })
        .to_string()
        .into_bytes()
    }

    async fn record(&self, call: Call) -> Result<(), GatewayError> {
        self.record_keyed(call, None).await
    }

    async fn record_keyed(&self, call: Call, idempotency_key: Option<String>) -> Result<(), GatewayError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call);
        inner.idempotency_keys.extend(idempotency_key);
        match inner.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn snapshot(id: &str, status: IntentStatus) -> IntentSnapshot {
        IntentSnapshot {
            id: id.to_string(),
            raw: serde_json::json!({ "id": id, "object": "payment_intent", "status": status.as_str() }),
            status,
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_customer(&self, customer: NewCustomer) -> Result<String, GatewayError> {
        self.record_keyed(Call::CreateCustomer(customer.user_id), Some(customer.idempotency_key))
            .await?;
        let mut inner = self.inner.lock().unwrap();
        inner.next_customer += 1;
        Ok(format!("cus_{}", inner.next_customer))
    }

    async fn retrieve_customer(&self, customer_id: &str) -> Result<CustomerProfile, GatewayError> {
        self.record(Call::RetrieveCustomer(customer_id.to_string())).await?;
        Ok(CustomerProfile {
            id: customer_id.to_string(),
            email: Some("test@mail.com".to_string()),
            name: None,
            metadata: BTreeMap::new(),
            raw: serde_json::json!({ "id": customer_id, "email": "test@mail.com" }),
        })
    }

    async fn create_intent(&self, intent: NewIntent) -> Result<CreatedIntent, GatewayError> {
        self.record_keyed(
            Call::CreateIntent {
                amount_minor: intent.amount_minor,
                currency: intent.currency,
                customer_id: intent.customer_id,
            },
            Some(intent.idempotency_key),
        )
        .await?;
        let mut inner = self.inner.lock().unwrap();
        inner.next_intent += 1;
        let intent_id = format!("pi_{}", inner.next_intent);
        inner
            .intents
            .insert(intent_id.clone(), IntentStatus::RequiresPaymentMethod);
        Ok(CreatedIntent {
            client_secret: format!("{intent_id}_secret"),
            intent_id,
            status: IntentStatus::RequiresPaymentMethod,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentSnapshot, GatewayError> {
        self.record(Call::RetrieveIntent(intent_id.to_string())).await?;
        let inner = self.inner.lock().unwrap();
        let status = inner
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| GatewayError::new("invalid_request_error", "No such payment_intent"))?;
        Ok(Self::snapshot(intent_id, status))
    }

    async fn confirm_intent(
        &self,
        intent_id: &str,
        payment_method: Option<&str>,
    ) -> Result<IntentSnapshot, GatewayError> {
        self.record(Call::ConfirmIntent {
            intent_id: intent_id.to_string(),
            payment_method: payment_method.map(str::to_string),
        })
        .await?;
        let mut inner = self.inner.lock().unwrap();
        if inner.intents.get(intent_id) == Some(&IntentStatus::Succeeded) {
            return Err(GatewayError::new(
                "invalid_request_error",
                "This PaymentIntent has already succeeded",
            ));
        }
        let status = inner
            .confirm_result
            .clone()
            .unwrap_or(IntentStatus::Succeeded);
        inner.intents.insert(intent_id.to_string(), status.clone());
        Ok(Self::snapshot(intent_id, status))
    }

    async fn create_refund(&self, refund: RefundRequest) -> Result<RefundReceipt, GatewayError> {
        self.record_keyed(
            Call::CreateRefund {
                intent_id: refund.intent_id,
                amount_minor: refund.amount_minor,
                idempotency_key: refund.idempotency_key.clone(),
            },
            Some(refund.idempotency_key),
        )
        .await?;
        let mut inner = self.inner.lock().unwrap();
        inner.next_refund += 1;
        Ok(RefundReceipt {
            refund_id: format!("re_{}", inner.next_refund),
            status: "succeeded".to_string(),
        })
    }

    fn construct_event(&self, payload: &[u8], signature: &str) -> Result<GatewayEvent, WebhookError> {
        if signature.is_empty() {
            return Err(WebhookError::MissingSignature);
        }
        if signature != VALID_SIGNATURE {
            return Err(WebhookError::InvalidSignature("Signature mismatch".to_string()));
        }
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
        let text = |key: &str| value.get(key).and_then(|v| v.as_str()).map(str::to_string);
        Ok(GatewayEvent {
            id: text("id").unwrap_or_default(),
            kind: EventKind::parse(&text("type").unwrap_or_default()),
            intent_id: text("intent"),
            error_message: text("error"),
        })
    }
}
