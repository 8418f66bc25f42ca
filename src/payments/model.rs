// Payment attempt record and its status state machine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Local status of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded | PaymentStatus::Failed | PaymentStatus::Canceled
        )
    }

    /// Whether `self -> next` is an edge of the state machine for a change of the given origin.
    pub fn can_transition(&self, next: PaymentStatus, origin: ChangeOrigin) -> bool {
        use PaymentStatus::*;
        match (self, next) {
            (Pending, Processing | Succeeded | Failed | Canceled) => true,
            (Processing, Succeeded | Failed | Canceled) => true,
            // A refund cancels a captured payment; nothing else leaves `succeeded`.
            (Succeeded, Canceled) => origin == ChangeOrigin::Refund,
            _ => false,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which channel produced a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Confirmation,
    Webhook,
    Refund,
}

/// A requested status change, as derived from gateway state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: PaymentStatus,
    pub origin: ChangeOrigin,
    pub failure_reason: Option<String>,
    pub event_id: Option<String>,
}

impl StatusChange {
    pub fn new(status: PaymentStatus, origin: ChangeOrigin) -> Self {
        Self {
            status,
            origin,
            failure_reason: None,
            event_id: None,
        }
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }
}

/// Result of applying a [`StatusChange`] to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status changed; the record must be persisted.
    Applied { from: PaymentStatus, to: PaymentStatus },
    /// The record already has the requested status.
    Unchanged,
    /// The same webhook event was already applied.
    Duplicate,
    /// Not an edge of the state machine (e.g. leaving a terminal status).
    Rejected { from: PaymentStatus, to: PaymentStatus },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundEntry {
    pub refund_id: String,
    /// `None` for a full refund.
    pub amount_minor: Option<i64>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub external_intent_id: String,
    pub external_customer_id: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub failure_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refunds: Vec<RefundEntry>,
}

/// Everything needed to persist a freshly created intent.
#[derive(Debug, Clone)]
pub struct NewPaymentAttempt {
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub external_intent_id: String,
    pub external_customer_id: Option<String>,
    pub description: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl PaymentAttempt {
    pub fn new(input: NewPaymentAttempt, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            amount: input.amount,
            currency: input.currency,
            status: PaymentStatus::Pending,
            external_intent_id: input.external_intent_id,
            external_customer_id: input.external_customer_id,
            description: input.description,
            metadata: input.metadata,
            failure_reason: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
            last_event_id: None,
            refunds: Vec::new(),
        }
    }

    /// Applies a change in place. Only `Transition::Applied` mutates the record.
    pub fn apply(&mut self, change: &StatusChange, now: DateTime<Utc>) -> Transition {
        if let (Some(event_id), Some(last)) = (&change.event_id, &self.last_event_id) {
            if event_id == last {
                return Transition::Duplicate;
            }
        }

        let from = self.status;
        let to = change.status;
        if from == to {
            return Transition::Unchanged;
        }
        if !from.can_transition(to, change.origin) {
            return Transition::Rejected { from, to };
        }

        self.status = to;
        if to == PaymentStatus::Failed {
            self.failure_reason = change.failure_reason.clone();
        }
        // processed_at never moves backwards, even if the clock does.
        self.processed_at = Some(match self.processed_at {
            Some(prev) if prev > now => prev,
            _ => now,
        });
        self.updated_at = now;
        if change.event_id.is_some() {
            self.last_event_id = change.event_id.clone();
        }

        Transition::Applied { from, to }
    }

    /// Inserts or replaces a ledger entry keyed by refund id. Returns true if it was new.
    pub fn record_refund(&mut self, entry: RefundEntry, now: DateTime<Utc>) -> bool {
        self.updated_at = now;
        match self.refunds.iter_mut().find(|r| r.refund_id == entry.refund_id) {
            Some(existing) => {
                existing.status = entry.status;
                false
            }
            None => {
                self.refunds.push(entry);
                true
            }
        }
    }
}
