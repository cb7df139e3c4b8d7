//! Provider Router: the only way the core talks to fulfillment providers.
//!
//! Each provider sits behind a [`ProviderClient`]; the router picks one by id,
//! bounds the call with a timeout and hands back normalized results so the rest
//! of the pipeline never sees provider-specific payloads.

pub mod client;
pub mod router;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::ErrorCategory;

pub use client::HttpProviderClient;
pub use router::ProviderRouter;

/// Wire format a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestFlavor {
    /// Classic SMM panel API: form-encoded `key/action/...`, answers `{"order": ..}`.
    Panel,
    /// REST JSON API with a bearer key and camelCase fields.
    Json,
}

impl FromStr for RequestFlavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "panel" | "form" => Ok(RequestFlavor::Panel),
            "json" => Ok(RequestFlavor::Json),
            other => Err(format!("unknown provider flavor: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    pub api_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub flavor: RequestFlavor,
}

/// One submission: deliver `quantity` units of `service` to `link`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRequest {
    /// Service code on the provider side.
    pub service: String,
    pub link: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResponse {
    pub external_id: String,
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOrderStatus {
    Pending,
    Processing,
    Completed,
    /// Finished with a shortfall; `remains` says how much.
    Partial,
    Cancelled,
    Failed,
}

impl ProviderOrderStatus {
    /// Maps the status strings seen across panels. `None` for anything unknown.
    pub fn from_provider(raw: &str) -> Option<Self> {
        let s = raw.trim().to_ascii_lowercase().replace(&['_', '-'][..], " ");
        match s.as_str() {
            "pending" | "queued" | "awaiting" => Some(ProviderOrderStatus::Pending),
            "in progress" | "inprogress" | "processing" | "active" => {
                Some(ProviderOrderStatus::Processing)
            }
            "completed" | "complete" | "success" | "done" => Some(ProviderOrderStatus::Completed),
            "partial" => Some(ProviderOrderStatus::Partial),
            "canceled" | "cancelled" | "refunded" => Some(ProviderOrderStatus::Cancelled),
            "failed" | "fail" | "error" => Some(ProviderOrderStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedStatus {
    pub status: ProviderOrderStatus,
    /// Status string exactly as the provider sent it.
    pub provider_status: String,
    pub remains: Option<i64>,
    pub start_count: Option<i64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Timeouts, connection failures, 5xx and an open circuit.
    #[error("network error: {0}")]
    Network(String),
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("quantity below provider minimum of {minimum}: {message}")]
    BelowMinimum { minimum: i64, message: String },
    #[error("invalid link: {0}")]
    InvalidLink(String),
    #[error("provider authentication failed: {0}")]
    Auth(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl ProviderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Network(_) => ErrorCategory::NetworkError,
            ProviderError::Rejected(_) => ErrorCategory::ProviderRejected,
            ProviderError::BelowMinimum { .. } => ErrorCategory::BelowMinimum,
            ProviderError::InvalidLink(_) => ErrorCategory::InvalidLink,
            ProviderError::Auth(_) | ProviderError::UnknownProvider(_) => ErrorCategory::AuthError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Turns a provider's error text into the matching variant.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("api key")
            || lower.contains("incorrect key")
            || lower.contains("invalid key")
            || lower.contains("unauthorized")
        {
            return ProviderError::Auth(message.to_string());
        }
        if let Some(minimum) = extract_minimum(&lower) {
            return ProviderError::BelowMinimum {
                minimum,
                message: message.to_string(),
            };
        }
        if lower.contains("link") || lower.contains("url") || lower.contains("username") {
            return ProviderError::InvalidLink(message.to_string());
        }
        ProviderError::Rejected(message.to_string())
    }
}

/// Finds the number following "minimum", "minimal", "min" or "at least".
fn extract_minimum(lower: &str) -> Option<i64> {
    ["minimum", "minimal", "min ", "min.", "min:", "at least"]
        .iter()
        .filter_map(|kw| lower.find(kw).map(|pos| &lower[pos + kw.len()..]))
        .find_map(|rest| {
            let digits: String = rest
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit() || *c == ',')
                .filter(|c| c.is_ascii_digit())
                .collect();
            digits.parse::<i64>().ok()
        })
}

impl fmt::Display for ProviderOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderOrderStatus::Pending => "pending",
            ProviderOrderStatus::Processing => "processing",
            ProviderOrderStatus::Completed => "completed",
            ProviderOrderStatus::Partial => "partial",
            ProviderOrderStatus::Cancelled => "cancelled",
            ProviderOrderStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Adapter for one provider account.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn submit(&self, request: &ProviderRequest) -> Result<NormalizedResponse, ProviderError>;

    async fn status(&self, external_order_id: &str) -> Result<NormalizedStatus, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_minimum_messages() {
        assert_eq!(
            ProviderError::classify("Quantity less than minimal 100"),
            ProviderError::BelowMinimum {
                minimum: 100,
                message: "Quantity less than minimal 100".to_string()
            }
        );
        match ProviderError::classify("Order must be at least 1,000 units") {
            ProviderError::BelowMinimum { minimum, .. } => assert_eq!(minimum, 1000),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_link_auth_and_generic() {
        assert!(matches!(
            ProviderError::classify("Incorrect link"),
            ProviderError::InvalidLink(_)
        ));
        assert!(matches!(
            ProviderError::classify("Invalid API key"),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            ProviderError::classify("Not enough funds on balance"),
            ProviderError::Rejected(_)
        ));
    }

    #[test]
    fn test_categories() {
        assert!(ProviderError::Network("timeout".into()).is_retryable());
        assert!(!ProviderError::Auth("x".into()).is_retryable());
        assert_eq!(
            ProviderError::UnknownProvider("p".into()).category(),
            ErrorCategory::AuthError
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProviderOrderStatus::from_provider("In progress"),
            Some(ProviderOrderStatus::Processing)
        );
        assert_eq!(
            ProviderOrderStatus::from_provider("Canceled"),
            Some(ProviderOrderStatus::Cancelled)
        );
        assert_eq!(
            ProviderOrderStatus::from_provider("Partial"),
            Some(ProviderOrderStatus::Partial)
        );
        assert_eq!(ProviderOrderStatus::from_provider("teleported"), None);
    }

    #[test]
    fn test_flavor_parse() {
        assert_eq!("panel".parse::<RequestFlavor>().unwrap(), RequestFlavor::Panel);
        assert_eq!("JSON".parse::<RequestFlavor>().unwrap(), RequestFlavor::Json);
        assert!("soap".parse::<RequestFlavor>().is_err());
    }
}
