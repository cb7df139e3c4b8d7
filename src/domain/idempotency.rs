//! Append-only log of payment-intent attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptResult {
    New,
    Existing,
    Error,
}

impl AttemptResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptResult::New => "new",
            AttemptResult::Existing => "existing",
            AttemptResult::Error => "error",
        }
    }
}

impl fmt::Display for AttemptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub idempotency_key: String,
    pub transaction_id: Option<Uuid>,
    pub result: AttemptResult,
    pub request_data: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(
        idempotency_key: &str,
        transaction_id: Option<Uuid>,
        result: AttemptResult,
        request_data: serde_json::Value,
        error_message: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            idempotency_key: idempotency_key.to_string(),
            transaction_id,
            result,
            request_data,
            error_message,
            created_at: Utc::now(),
        }
    }
}
