//! Transaction domain entity.
//! A customer's payment for one purchase, potentially covering several targets.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::metadata::TransactionMetadata;

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Processing,
    #[serde(alias = "canceled")]
    Cancelled,
    Error,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Approved => "approved",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Error => "error",
            TransactionStatus::Refunded => "refunded",
        }
    }

    /// Allowed edges of the state machine. Self-transitions are not edges.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, next) {
            (Pending, Approved) | (Pending, Cancelled) | (Pending, Error) => true,
            // a payment confirmed after the deadline still has to be honoured
            (Cancelled, Approved) => true,
            (Approved, Processing) | (Approved, Error) | (Approved, Refunded) => true,
            (Processing, Approved) | (Processing, Error) | (Processing, Refunded) => true,
            (Error, Processing) | (Error, Refunded) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Cancelled | TransactionStatus::Refunded
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transaction status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for TransactionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "approved" => Ok(TransactionStatus::Approved),
            "processing" => Ok(TransactionStatus::Processing),
            // legacy rows carry both spellings; only "cancelled" is ever written
            "cancelled" | "canceled" => Ok(TransactionStatus::Cancelled),
            "error" => Ok(TransactionStatus::Error),
            "refunded" => Ok(TransactionStatus::Refunded),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Domain entity representing a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub status: TransactionStatus,
    pub payment_id: Option<String>,
    pub amount: BigDecimal,
    pub target_username: String,
    pub metadata: TransactionMetadata,
    pub is_processed: bool,
    pub order_created: bool,
    pub processing_attempts: i32,
    pub idempotency_key: Option<String>,
    pub needs_admin_attention: bool,
    pub last_processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        amount: BigDecimal,
        target_username: String,
        payment_id: Option<String>,
        metadata: TransactionMetadata,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: TransactionStatus::Pending,
            payment_id,
            amount,
            target_username,
            metadata,
            is_processed: false,
            order_created: false,
            processing_attempts: 0,
            idempotency_key,
            needs_admin_attention: false,
            last_processing_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moment after which an unpaid transaction is cancelled. An explicit deadline
    /// recorded with the payment wins over the default window.
    pub fn payment_deadline(&self, default_window: Duration) -> DateTime<Utc> {
        self.metadata
            .payment
            .as_ref()
            .and_then(|p| p.expires_at)
            .unwrap_or(self.created_at + default_window)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, default_window: Duration) -> bool {
        self.status == TransactionStatus::Pending && self.payment_deadline(default_window) < now
    }

    /// Whether a normal (non-forced) processing attempt may dispatch orders.
    pub fn is_eligible_for_processing(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Approved | TransactionStatus::Processing
        ) && !self.is_processed
    }
}
