//! Order domain entity: one unit of work submitted to a provider for a single
//! target of a transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::metadata::{ErrorCategory, OrderError, OrderMetadata};
use super::transaction::UnknownStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Error,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Error => "error",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Error | OrderStatus::Cancelled
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "processing" | "in_progress" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            "error" | "failed" => Ok(OrderStatus::Error),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub external_order_id: Option<String>,
    pub status: OrderStatus,
    /// Quantity the customer paid for on this target.
    pub quantity: i32,
    pub target_link: String,
    pub target_username: Option<String>,
    pub provider_id: String,
    pub needs_admin_attention: bool,
    pub metadata: OrderMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        transaction_id: Uuid,
        provider_id: String,
        target_link: String,
        target_username: Option<String>,
        quantity: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            external_order_id: None,
            status: OrderStatus::Pending,
            quantity,
            target_link,
            target_username,
            provider_id,
            needs_admin_attention: false,
            metadata: OrderMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The provider accepted this order.
    pub fn is_dispatched(&self) -> bool {
        self.external_order_id.is_some()
    }

    pub fn error_category(&self) -> Option<ErrorCategory> {
        self.metadata.error.as_ref().map(|e| e.category)
    }

    /// A failed order that must wait for a human before it is resubmitted.
    pub fn awaits_admin(&self) -> bool {
        self.status == OrderStatus::Error
            && self.needs_admin_attention
            && !self
                .error_category()
                .map(|c| c.is_retryable())
                .unwrap_or(false)
    }

    /// Never reached the provider because of a transient failure, with
    /// submissions left.
    pub fn awaits_resubmission(&self, max_submit_attempts: i32) -> bool {
        self.external_order_id.is_none()
            && self.status == OrderStatus::Error
            && self.error_category().map(|c| c.is_retryable()).unwrap_or(false)
            && self.metadata.submit_attempts < max_submit_attempts
    }

    pub fn record_error(&mut self, category: ErrorCategory, message: impl Into<String>) {
        self.status = OrderStatus::Error;
        self.needs_admin_attention = true;
        self.metadata.error = Some(OrderError {
            category,
            message: message.into(),
        });
        self.updated_at = Utc::now();
    }
}
