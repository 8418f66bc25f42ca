// Stripe provider module

pub mod errors;
pub mod rest;
pub mod types;
pub mod webhook;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::payments::gateway::{
    CreatedIntent, CustomerProfile, GatewayError, GatewayEvent, IntentSnapshot, IntentStatus,
    NewCustomer, NewIntent, PaymentGateway, RefundReceipt, RefundRequest, WebhookError,
};
use crate::settings::StripeSettings;
use self::errors::StripeApiError;
use self::rest::StripeRestClient;
use self::types::PaymentIntent;

#[derive(Clone)]
pub struct StripeProvider {
    pub(crate) cfg: StripeSettings,
    pub(crate) rest: StripeRestClient,
}

impl StripeProvider {
    // Build reqwest client with rustls and timeout from cfg, store cfg clone.
    pub fn new(cfg: StripeSettings) -> Result<Self, StripeApiError> {
        if cfg.api_key.trim().is_empty() {
            return Err(StripeApiError::Precondition("Stripe secret key is not configured"));
        }
        let timeout = std::time::Duration::from_millis(if cfg.timeout_ms > 0 { cfg.timeout_ms } else { 15_000 });
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| StripeApiError::Http(e.to_string()))?;

        let rest = StripeRestClient::new(http, cfg.api_key.clone())
            .with_account(if cfg.account_id.is_empty() { None } else { Some(cfg.account_id.clone()) })
            .with_version(if cfg.stripe_version.is_empty() { None } else { Some(cfg.stripe_version.clone()) })
            .with_retry(cfg.max_retries, 100, 2_000);

        Ok(Self { cfg, rest })
    }

    fn snapshot(intent: PaymentIntent, raw: serde_json::Value) -> IntentSnapshot {
        IntentSnapshot {
            status: IntentStatus::parse(&intent.status),
            id: intent.id,
            raw,
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_customer(&self, customer: NewCustomer) -> Result<String, GatewayError> {
        let created = self
            .rest
            .create_customer(
                &customer.user_id,
                customer.email.as_deref(),
                customer.name.as_deref(),
                &customer.idempotency_key,
            )
            .await?;
        debug!(customer_id = %created.id, "Stripe customer created");
        Ok(created.id)
    }

    async fn retrieve_customer(&self, customer_id: &str) -> Result<CustomerProfile, GatewayError> {
        let (customer, raw) = self.rest.retrieve_customer(customer_id).await?;
        Ok(customer.into_profile(raw))
    }

    async fn create_intent(&self, intent: NewIntent) -> Result<CreatedIntent, GatewayError> {
        let created = self
            .rest
            .create_payment_intent(
                intent.amount_minor,
                &intent.currency,
                &intent.customer_id,
                intent.description.as_deref(),
                &intent.metadata,
                intent.payment_method.as_deref(),
                &intent.idempotency_key,
            )
            .await?;
        let client_secret = created.client_secret.ok_or_else(|| {
            GatewayError::new("decode_error", "payment intent has no client secret")
        })?;
        Ok(CreatedIntent {
            status: IntentStatus::parse(&created.status),
            intent_id: created.id,
            client_secret,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentSnapshot, GatewayError> {
        let (intent, raw) = self.rest.retrieve_intent(intent_id).await?;
        Ok(Self::snapshot(intent, raw))
    }

    async fn confirm_intent(
        &self,
        intent_id: &str,
        payment_method: Option<&str>,
    ) -> Result<IntentSnapshot, GatewayError> {
        let (intent, raw) = self.rest.confirm_intent(intent_id, payment_method).await?;
        Ok(Self::snapshot(intent, raw))
    }

    async fn create_refund(&self, refund: RefundRequest) -> Result<RefundReceipt, GatewayError> {
        let created = self
            .rest
            .create_refund(&refund.intent_id, refund.amount_minor, &refund.idempotency_key)
            .await?;
        Ok(RefundReceipt {
            refund_id: created.id,
            status: created.status,
        })
    }

    fn construct_event(&self, payload: &[u8], signature: &str) -> Result<GatewayEvent, WebhookError> {
        webhook::construct_event(
            payload,
            signature,
            &self.cfg.webhook_secret,
            self.cfg.webhook_tolerance_seconds,
        )
    }
}
