//! Reconciliation engine.
//!
//! Owns the two update entry points of a payment attempt: the synchronous
//! confirm/refund calls and the asynchronous webhook events. Both derive a
//! [`StatusChange`] from gateway state and funnel it through [`ReconciliationEngine::reconcile`],
//! which applies it with compare-and-set against the store. The gateway is the
//! source of truth; the local record is overwritten, never incremented.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::amount::{normalize_currency, to_minor_units, validate_amount};
use super::error::PaymentError;
use super::gateway::{
    CustomerProfile, EventKind, GatewayError, GatewayEvent, IntentSnapshot, IntentStatus,
    NewCustomer, NewIntent, PaymentGateway, RefundReceipt, RefundRequest,
};
use super::model::{
    ChangeOrigin, NewPaymentAttempt, PaymentAttempt, PaymentStatus, RefundEntry, StatusChange,
    Transition,
};
use super::notifier::{StatusNotifier, StatusUpdate};
use super::store::{PaymentStore, StoreError};
use crate::counter_inc;

const MAX_UPDATE_ATTEMPTS: usize = 5;
const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(20);
const PAYMENT_METHOD_REQUIRED: &str = "Payment method required";
const GENERIC_FAILURE_REASON: &str = "Payment failed";

/// Input of the create-intent operation.
#[derive(Debug, Clone)]
pub struct CreateIntent {
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub payment_method_id: Option<String>,
    pub customer_id: Option<String>,
}

impl CreateIntent {
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.user_id.trim().is_empty() {
            return Err(PaymentError::Validation("userId is required".to_string()));
        }
        let currency = normalize_currency(&self.currency)?;
        validate_amount(self.amount, &currency)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPayment {
    pub payment_id: Uuid,
    pub client_secret: String,
    #[serde(rename = "paymentIntentId")]
    pub external_intent_id: String,
    pub customer_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    /// Raw gateway intent, echoed back to the caller.
    #[serde(rename = "paymentIntent")]
    pub intent: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

impl WebhookAck {
    fn received() -> Self {
        Self { received: true }
    }
}

pub struct ReconciliationEngine {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn PaymentStore>,
    notifier: Arc<StatusNotifier>,
    gateway_timeout: Duration,
}

impl ReconciliationEngine {
    pub fn new(gateway: Arc<dyn PaymentGateway>, store: Arc<dyn PaymentStore>) -> Self {
        Self {
            gateway,
            store,
            notifier: Arc::new(StatusNotifier::new()),
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<StatusNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn notifier(&self) -> Arc<StatusNotifier> {
        Arc::clone(&self.notifier)
    }

    /// Creates the gateway intent (and customer when none is given), then persists a
    /// `pending` record. Nothing is written if any gateway call fails.
    #[instrument(skip(self, input), fields(user_id = %input.user_id, amount = %input.amount, currency = %input.currency))]
    pub async fn create_intent(&self, input: CreateIntent) -> Result<CreatedPayment, PaymentError> {
        input.validate()?;
        let currency = normalize_currency(&input.currency)?;
        let amount_minor = to_minor_units(input.amount, &currency)?;

        let customer_id = match input.customer_id.filter(|c| !c.trim().is_empty()) {
            Some(existing) => existing,
            None => {
                self.call_gateway(
                    "create_customer",
                    self.gateway.create_customer(NewCustomer {
                        user_id: input.user_id.clone(),
                        email: None,
                        name: None,
                        idempotency_key: idempotency_key("customer"),
                    }),
                )
                .await?
            }
        };

        let intent = self
            .call_gateway(
                "create_intent",
                self.gateway.create_intent(NewIntent {
                    amount_minor,
                    currency: currency.to_ascii_lowercase(),
                    customer_id: customer_id.clone(),
                    description: input.description.clone(),
                    metadata: input.metadata.clone(),
                    payment_method: input.payment_method_id.clone(),
                    idempotency_key: idempotency_key("intent"),
                }),
            )
            .await?;

        let record = PaymentAttempt::new(
            NewPaymentAttempt {
                user_id: input.user_id,
                amount: input.amount,
                currency,
                external_intent_id: intent.intent_id.clone(),
                external_customer_id: Some(customer_id.clone()),
                description: input.description,
                metadata: input.metadata,
            },
            Utc::now(),
        );
        let record = self.store.insert(record).await.map_err(|e| {
            error!(payment_intent_id = %intent.intent_id, error = %e, "Failed to persist payment");
            PaymentError::from(e)
        })?;

        info!(
            payment_id = %record.id,
            payment_intent_id = %record.external_intent_id,
            amount_minor = amount_minor,
            "Payment intent created"
        );
        counter_inc!("payments.intent.created", "currency" => record.currency.as_str());

        Ok(CreatedPayment {
            payment_id: record.id,
            client_secret: intent.client_secret,
            external_intent_id: record.external_intent_id,
            customer_id,
        })
    }

    /// Reads the intent from the gateway before deciding whether a confirm call is safe.
    #[instrument(skip(self, payment_method), fields(payment_intent_id = %intent_id))]
    pub async fn confirm(
        &self,
        intent_id: &str,
        payment_method: Option<&str>,
    ) -> Result<Confirmation, PaymentError> {
        let record = self.require_by_intent(intent_id).await?;

        let current = self
            .call_gateway("retrieve_intent", self.gateway.retrieve_intent(intent_id))
            .await?;

        if record.status.is_terminal() {
            debug!(
                payment_id = %record.id,
                status = %record.status,
                gateway_status = %current.status,
                "Payment already final, skipping confirmation"
            );
            return Ok(Confirmation {
                payment_id: record.id,
                status: record.status,
                intent: current.raw,
            });
        }

        let (intent, change) = match &current.status {
            IntentStatus::Succeeded => {
                let change = StatusChange::new(PaymentStatus::Succeeded, ChangeOrigin::Confirmation);
                (current, Some(change))
            }
            status if status.awaits_confirmation() => {
                let confirmed = self
                    .call_gateway(
                        "confirm_intent",
                        self.gateway.confirm_intent(intent_id, payment_method),
                    )
                    .await?;
                let change = confirmation_change(&confirmed.status);
                (confirmed, change)
            }
            other => {
                let change = other
                    .mirror()
                    .map(|s| StatusChange::new(s, ChangeOrigin::Confirmation));
                (current, change)
            }
        };

        let record = match change {
            Some(change) => self.reconcile(record, &change).await?,
            None => {
                warn!(gateway_status = %intent.status, "Unmapped gateway status, record left as is");
                record
            }
        };

        Ok(Confirmation {
            payment_id: record.id,
            status: record.status,
            intent: intent.raw,
        })
    }

    /// Verifies and applies a webhook delivery. Unknown event kinds and unknown
    /// intents are acknowledged without effect so the gateway stops retrying.
    #[instrument(skip(self, payload, signature))]
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookAck, PaymentError> {
        let event = self.gateway.construct_event(payload, signature).map_err(|e| {
            warn!(error = %e, "Rejected webhook delivery");
            counter_inc!("payments.webhook.rejected");
            PaymentError::from(e)
        })?;

        counter_inc!("payments.webhook.received", "event_type" => event.kind.as_str());

        let Some(change) = webhook_change(&event) else {
            info!(event_id = %event.id, event_type = %event.kind.as_str(), "Ignoring unhandled event type");
            counter_inc!("payments.webhook.ignored", "event_type" => event.kind.as_str());
            return Ok(WebhookAck::received());
        };

        let Some(intent_id) = event.intent_id.as_deref() else {
            warn!(event_id = %event.id, "Payment event without intent id");
            return Ok(WebhookAck::received());
        };

        let Some(record) = self.store.find_by_external_intent_id(intent_id).await? else {
            info!(
                event_id = %event.id,
                payment_intent_id = %intent_id,
                "No local payment for webhook event"
            );
            counter_inc!("payments.webhook.unmatched");
            return Ok(WebhookAck::received());
        };

        self.reconcile(record, &change).await?;
        Ok(WebhookAck::received())
    }

    /// Refunds through the gateway and cancels the attempt. The record is untouched
    /// if the gateway refuses.
    ///
    /// A caller that retries the same refund passes the same `request_key`; without
    /// one every call is a distinct refund.
    #[instrument(skip(self), fields(payment_intent_id = %intent_id))]
    pub async fn refund(
        &self,
        intent_id: &str,
        amount: Option<Decimal>,
        request_key: Option<&str>,
    ) -> Result<RefundReceipt, PaymentError> {
        let record = self.require_by_intent(intent_id).await?;

        let amount_minor = match amount {
            Some(amount) => {
                validate_amount(amount, &record.currency)?;
                Some(to_minor_units(amount, &record.currency)?)
            }
            None => None,
        };

        let idempotency_key = match request_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => key.to_string(),
            None => idempotency_key(&format!("refund_{intent_id}")),
        };

        let receipt = self
            .call_gateway(
                "create_refund",
                self.gateway.create_refund(RefundRequest {
                    intent_id: intent_id.to_string(),
                    amount_minor,
                    idempotency_key,
                }),
            )
            .await?;

        let change = StatusChange::new(PaymentStatus::Canceled, ChangeOrigin::Refund);
        let entry = RefundEntry {
            refund_id: receipt.refund_id.clone(),
            amount_minor,
            status: receipt.status.clone(),
            created_at: Utc::now(),
        };
        self.reconcile_with(record, &change, Some(entry)).await?;

        info!(refund_id = %receipt.refund_id, amount_minor = ?amount_minor, "Payment refunded");
        counter_inc!("payments.refund.created", "partial" => amount_minor.is_some());

        Ok(receipt)
    }

    #[instrument(skip(self, email, name))]
    pub async fn create_customer(
        &self,
        user_id: &str,
        email: Option<String>,
        name: Option<String>,
    ) -> Result<String, PaymentError> {
        if user_id.trim().is_empty() {
            return Err(PaymentError::Validation("userId is required".to_string()));
        }
        self.call_gateway(
            "create_customer",
            self.gateway.create_customer(NewCustomer {
                user_id: user_id.to_string(),
                email,
                name,
                idempotency_key: idempotency_key("customer"),
            }),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_customer(&self, customer_id: &str) -> Result<CustomerProfile, PaymentError> {
        self.call_gateway(
            "retrieve_customer",
            self.gateway.retrieve_customer(customer_id),
        )
        .await
    }

    async fn require_by_intent(&self, intent_id: &str) -> Result<PaymentAttempt, PaymentError> {
        self.store
            .find_by_external_intent_id(intent_id)
            .await?
            .ok_or_else(|| PaymentError::not_found(intent_id))
    }

    /// Applies `change` to the record, re-reading and retrying on concurrent modification.
    async fn reconcile(
        &self,
        record: PaymentAttempt,
        change: &StatusChange,
    ) -> Result<PaymentAttempt, PaymentError> {
        self.reconcile_with(record, change, None).await
    }

    async fn reconcile_with(
        &self,
        mut record: PaymentAttempt,
        change: &StatusChange,
        refund: Option<RefundEntry>,
    ) -> Result<PaymentAttempt, PaymentError> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let now = Utc::now();
            let transition = record.apply(change, now);
            let ledger_changed = match &refund {
                Some(entry) => record.record_refund(entry.clone(), now),
                None => false,
            };

            match transition {
                Transition::Applied { .. } => {}
                Transition::Unchanged | Transition::Duplicate if !ledger_changed => {
                    debug!(
                        payment_id = %record.id,
                        status = %record.status,
                        outcome = ?transition,
                        "Payment already reconciled"
                    );
                    return Ok(record);
                }
                Transition::Rejected { from, to } if !ledger_changed => {
                    warn!(
                        payment_id = %record.id,
                        from = %from,
                        to = %to,
                        origin = ?change.origin,
                        "Ignoring status change out of final state"
                    );
                    counter_inc!("payments.transition.rejected", "from" => from, "to" => to);
                    return Ok(record);
                }
                _ => {}
            }

            match self.store.update(record.clone()).await {
                Ok(saved) => {
                    if let Transition::Applied { from, to } = transition {
                        info!(
                            payment_id = %saved.id,
                            payment_intent_id = %saved.external_intent_id,
                            from = %from,
                            to = %to,
                            origin = ?change.origin,
                            "Payment status updated"
                        );
                        self.notifier.publish(StatusUpdate {
                            payment_id: saved.id,
                            payment_intent_id: saved.external_intent_id.clone(),
                            from,
                            status: to,
                            origin: change.origin,
                        });
                    }
                    return Ok(saved);
                }
                Err(StoreError::Conflict { .. }) => {
                    let id = record.id;
                    debug!(payment_id = %id, attempt, "Concurrent update, retrying");
                    record = self
                        .store
                        .find_by_id(id)
                        .await?
                        .ok_or_else(|| PaymentError::not_found(id))?;
                }
                Err(e) => {
                    error!(payment_id = %record.id, error = %e, "Failed to persist payment update");
                    return Err(e.into());
                }
            }
        }

        Err(StoreError::Contended(record.id).into())
    }

    async fn call_gateway<T, F>(&self, operation: &'static str, fut: F) -> Result<T, PaymentError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        let result = match tokio::time::timeout(self.gateway_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(operation)),
        };
        result.map_err(|e| {
            error!(
                gateway = self.gateway.name(),
                operation,
                kind = %e.raw_kind,
                error = %e.message,
                "Gateway call failed"
            );
            counter_inc!("payments.gateway.error", "operation" => operation, "kind" => e.raw_kind.as_str());
            PaymentError::Gateway(e)
        })
    }
}

/// Fresh key for one gateway write; client retries of that write reuse it.
fn idempotency_key(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Local change implied by the intent status returned from a confirm call.
fn confirmation_change(status: &IntentStatus) -> Option<StatusChange> {
    match status {
        IntentStatus::Succeeded => Some(StatusChange::new(
            PaymentStatus::Succeeded,
            ChangeOrigin::Confirmation,
        )),
        IntentStatus::RequiresPaymentMethod => Some(
            StatusChange::new(PaymentStatus::Failed, ChangeOrigin::Confirmation)
                .with_failure_reason(PAYMENT_METHOD_REQUIRED),
        ),
        IntentStatus::RequiresAction => Some(StatusChange::new(
            PaymentStatus::Processing,
            ChangeOrigin::Confirmation,
        )),
        other => other
            .mirror()
            .map(|s| StatusChange::new(s, ChangeOrigin::Confirmation)),
    }
}

fn webhook_change(event: &GatewayEvent) -> Option<StatusChange> {
    let change = match &event.kind {
        EventKind::IntentSucceeded => StatusChange::new(PaymentStatus::Succeeded, ChangeOrigin::Webhook),
        EventKind::IntentFailed => StatusChange::new(PaymentStatus::Failed, ChangeOrigin::Webhook)
            .with_failure_reason(
                event
                    .error_message
                    .clone()
                    .unwrap_or_else(|| GENERIC_FAILURE_REASON.to_string()),
            ),
        EventKind::IntentCanceled => StatusChange::new(PaymentStatus::Canceled, ChangeOrigin::Webhook),
        EventKind::Other(_) => return None,
    };
    Some(if event.id.is_empty() {
        change
    } else {
        change.with_event_id(event.id.clone())
    })
}
