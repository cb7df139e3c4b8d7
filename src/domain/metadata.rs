//! Typed metadata carried by transactions and orders.
//!
//! Every concern gets its own sub-record; anything a provider or an older writer
//! adds that we do not model lands in the flattened `extra` map and survives a
//! read-modify-write cycle untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What kind of engagement a service delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Followers,
    Likes,
    Comments,
    Views,
    Reels,
}

impl ServiceKind {
    /// Followers are delivered to a profile; everything else to a post or reel.
    pub fn targets_profile(&self) -> bool {
        matches!(self, ServiceKind::Followers)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: ServiceKind,
    pub provider_id: String,
    /// Service code on the provider side.
    pub external_service_id: String,
    /// Total purchased quantity across all targets.
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// One piece of content (post, reel or profile) the purchase applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetItem {
    pub link: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub quantity: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub provider: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    pub at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    #[serde(default)]
    pub service: Option<ServiceInfo>,
    #[serde(default)]
    pub customer: Option<CustomerInfo>,
    #[serde(default)]
    pub items: Vec<TargetItem>,
    #[serde(default)]
    pub payment: Option<PaymentInfo>,
    #[serde(default)]
    pub cancellation: Option<Cancellation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Why an order needs attention. Consumed by admin tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NetworkError,
    ProviderRejected,
    InvalidLink,
    BelowMinimum,
    AuthError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::ProviderRejected => "provider_rejected",
            ErrorCategory::InvalidLink => "invalid_link",
            ErrorCategory::BelowMinimum => "below_minimum",
            ErrorCategory::AuthError => "auth_error",
        }
    }

    /// Only transport failures are worth resubmitting unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::NetworkError)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderError {
    pub category: ErrorCategory,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualResolution {
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
    pub original_status: String,
    #[serde(default)]
    pub original_error: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderMetadata {
    #[serde(default)]
    pub service_kind: Option<ServiceKind>,
    /// Payload sent to the provider on the last submission.
    #[serde(default)]
    pub request: Option<Value>,
    /// Raw provider answer to the last submission.
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub error: Option<OrderError>,
    #[serde(default)]
    pub quantity_adjusted: bool,
    /// Quantity actually sent to the provider when it differs from the paid one.
    #[serde(default)]
    pub submitted_quantity: Option<i32>,
    #[serde(default)]
    pub provider_minimum: Option<i64>,
    #[serde(default)]
    pub remains: Option<i64>,
    #[serde(default)]
    pub start_count: Option<i64>,
    #[serde(default)]
    pub provider_status: Option<String>,
    #[serde(default)]
    pub last_status_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub submit_attempts: i32,
    #[serde(default)]
    pub manual_resolution: Option<ManualResolution>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
