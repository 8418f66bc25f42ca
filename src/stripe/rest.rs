// Stripe REST client
// Form-encoded requests with idempotency header propagation and bounded retries on transient errors.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::histogram_observe_ms;
use crate::stripe::errors::{is_transient, StripeApiError, StripeErrorEnvelope};
use crate::stripe::types::{Customer, PaymentIntent, Refund};

const STRIPE_API_BASE: &str = "https://api.stripe.com";

type Form = Vec<(String, String)>;

#[derive(Clone)]
pub struct StripeRestClient {
    pub(crate) http: Client,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) account_id: Option<String>,
    pub(crate) stripe_version: Option<String>,
    pub(crate) max_retries: u32,
    pub(crate) base_delay_ms: u64,
    pub(crate) max_delay_ms: u64,
}

impl StripeRestClient {
    pub fn new(http: Client, api_key: String) -> Self {
        Self {
            http,
            api_key,
            base_url: STRIPE_API_BASE.to_string(),
            account_id: None,
            stripe_version: None,
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }

    pub fn with_account(mut self, acct: impl Into<Option<String>>) -> Self {
        self.account_id = acct.into();
        self
    }

    pub fn with_version(mut self, ver: impl Into<Option<String>>) -> Self {
        self.stripe_version = ver.into();
        self
    }

    pub fn with_retry(mut self, max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.base_delay_ms = base_delay_ms.max(1);
        self.max_delay_ms = max_delay_ms.max(self.base_delay_ms);
        self
    }

    fn apply_common_headers(
        &self,
        req: reqwest::RequestBuilder,
        idempotency_key: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut req = req.bearer_auth(&self.api_key);
        if let Some(k) = idempotency_key {
            req = req.header("Idempotency-Key", k);
        }
        if let Some(v) = self.stripe_version.as_deref().filter(|v| !v.is_empty()) {
            req = req.header("Stripe-Version", v);
        }
        if let Some(acct) = self.account_id.as_deref().filter(|a| !a.is_empty()) {
            req = req.header("Stripe-Account", acct);
        }
        req
    }

    fn map_error(status: StatusCode, body: &str) -> StripeApiError {
        if let Ok(env) = serde_json::from_str::<StripeErrorEnvelope>(body) {
            env.to_api_error_with_status(Some(status.as_u16()))
        } else {
            StripeApiError::Http(format!("status={} body={}", status.as_u16(), body))
        }
    }

    fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(20));
        let cap = exp.min(self.max_delay_ms);
        if cap > self.base_delay_ms {
            SmallRng::from_entropy().gen_range(self.base_delay_ms..=cap)
        } else {
            self.base_delay_ms
        }
    }

    async fn with_retries<F, Fut, T>(
        &self,
        desc: &str,
        max_retries: u32,
        mut op: F,
    ) -> Result<T, StripeApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StripeApiError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let (http_status, err_type) = match &e {
                        StripeApiError::Stripe { status, type_, .. } => (*status, Some(type_)),
                        StripeApiError::Http(_) => (Some(503), None),
                        _ => (None, None),
                    };
                    if !is_transient(http_status, err_type) || attempt >= max_retries {
                        return Err(e);
                    }

                    let delay_ms = self.backoff_delay_ms(attempt);
                    warn!(
                        target: "stripe",
                        desc = %desc,
                        attempt = attempt + 1,
                        max_retries = max_retries,
                        http_status = ?http_status,
                        error_type = ?err_type,
                        next_delay_ms = delay_ms,
                        "retrying transient Stripe error"
                    );

                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Sends one request (with retries) and returns both the typed and the raw body.
    async fn execute<T: DeserializeOwned>(
        &self,
        desc: &'static str,
        method: Method,
        path: &str,
        form: Option<&Form>,
        idempotency_key: Option<&str>,
        max_retries: u32,
    ) -> Result<(T, serde_json::Value), StripeApiError> {
        info!(
            target: "stripe",
            method = %method,
            path = %path,
            idempotency_key = idempotency_key.unwrap_or(""),
            "stripe request"
        );

        let started = Instant::now();
        let req_builder = || {
            let url = format!("{}{}", self.base_url, path);
            let mut req = self.http.request(method.clone(), url);
            if let Some(form) = form {
                req = req.form(form);
            }
            let req = self.apply_common_headers(req, idempotency_key);
            async move {
                let resp = req.send().await.map_err(|e| StripeApiError::Http(e.to_string()))?;
                let status = resp.status();
                let text = resp.text().await.map_err(|e| StripeApiError::Decode(e.to_string()))?;
                if !status.is_success() {
                    return Err(Self::map_error(status, &text));
                }
                let raw: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| StripeApiError::Decode(e.to_string()))?;
                let typed = serde_json::from_value::<T>(raw.clone())
                    .map_err(|e| StripeApiError::Decode(e.to_string()))?;
                Ok((typed, raw))
            }
        };
        let result = self.with_retries(desc, max_retries, req_builder).await;
        histogram_observe_ms!(
            "stripe.request.duration_ms",
            started.elapsed().as_millis() as u64,
            "operation" => desc,
            "ok" => result.is_ok()
        );
        result
    }

    // POST /v1/customers
    #[instrument(skip(self, email, name), fields(method = "POST", path = "/v1/customers"))]
    pub async fn create_customer(
        &self,
        user_id: &str,
        email: Option<&str>,
        name: Option<&str>,
        idempotency_key: &str,
    ) -> Result<Customer, StripeApiError> {
        let mut form: Form = vec![("metadata[userId]".into(), user_id.to_string())];
        if let Some(email) = email {
            form.push(("email".into(), email.to_string()));
        }
        if let Some(name) = name {
            form.push(("name".into(), name.to_string()));
        }
        let (customer, _) = self
            .execute(
                "create_customer",
                Method::POST,
                "/v1/customers",
                Some(&form),
                Some(idempotency_key),
                self.max_retries,
            )
            .await?;
        Ok(customer)
    }

    // GET /v1/customers/{id}
    #[instrument(skip(self), fields(method = "GET", path = "/v1/customers/{id}"))]
    pub async fn retrieve_customer(
        &self,
        customer_id: &str,
    ) -> Result<(Customer, serde_json::Value), StripeApiError> {
        let path = format!("/v1/customers/{customer_id}");
        // Keep retrieve lightweight: single retry only
        self.execute("retrieve_customer", Method::GET, &path, None, None, 1)
            .await
    }

    // POST /v1/payment_intents
    #[instrument(skip(self, metadata, description, payment_method), fields(method = "POST", path = "/v1/payment_intents"))]
    pub async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        customer_id: &str,
        description: Option<&str>,
        metadata: &BTreeMap<String, String>,
        payment_method: Option<&str>,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, StripeApiError> {
        if amount_minor <= 0 {
            return Err(StripeApiError::Precondition("amount must be positive"));
        }

        let mut form: Form = vec![
            ("amount".into(), amount_minor.to_string()),
            ("currency".into(), currency.to_ascii_lowercase()),
            ("customer".into(), customer_id.to_string()),
        ];
        if let Some(d) = description {
            form.push(("description".into(), d.to_string()));
        }
        for (k, v) in metadata {
            form.push((format!("metadata[{k}]"), v.clone()));
        }
        match payment_method {
            Some(pm) => form.push(("payment_method".into(), pm.to_string())),
            None => form.push(("automatic_payment_methods[enabled]".into(), "true".into())),
        }

        let (intent, _) = self
            .execute(
                "create_payment_intent",
                Method::POST,
                "/v1/payment_intents",
                Some(&form),
                Some(idempotency_key),
                self.max_retries,
            )
            .await?;
        Ok(intent)
    }

    // GET /v1/payment_intents/{id}
    #[instrument(skip(self), fields(method = "GET", path = "/v1/payment_intents/{id}"))]
    pub async fn retrieve_intent(
        &self,
        intent_id: &str,
    ) -> Result<(PaymentIntent, serde_json::Value), StripeApiError> {
        let path = format!("/v1/payment_intents/{intent_id}");
        self.execute("retrieve_intent", Method::GET, &path, None, None, 1)
            .await
    }

    // POST /v1/payment_intents/{id}/confirm
    #[instrument(skip(self), fields(method = "POST", path = "/v1/payment_intents/{id}/confirm"))]
    pub async fn confirm_intent(
        &self,
        intent_id: &str,
        payment_method: Option<&str>,
    ) -> Result<(PaymentIntent, serde_json::Value), StripeApiError> {
        let path = format!("/v1/payment_intents/{intent_id}/confirm");
        let mut form: Form = Vec::new();
        if let Some(pm) = payment_method {
            form.push(("payment_method".into(), pm.to_string()));
        }
        // Never retried.
        self.execute("confirm_intent", Method::POST, &path, Some(&form), None, 0)
            .await
    }

    // POST /v1/refunds
    #[instrument(skip(self), fields(method = "POST", path = "/v1/refunds"))]
    pub async fn create_refund(
        &self,
        intent_id: &str,
        amount_minor: Option<i64>,
        idempotency_key: &str,
    ) -> Result<Refund, StripeApiError> {
        let mut form: Form = vec![("payment_intent".into(), intent_id.to_string())];
        if let Some(amount) = amount_minor {
            form.push(("amount".into(), amount.to_string()));
        }
        let (refund, _) = self
            .execute(
                "create_refund",
                Method::POST,
                "/v1/refunds",
                Some(&form),
                Some(idempotency_key),
                self.max_retries,
            )
            .await?;
        Ok(refund)
    }
}
