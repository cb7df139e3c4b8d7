//! Collapses duplicate payment-intent requests onto one transaction.
//!
//! The key is a SHA-256 over the fields that identify a purchase plus a
//! one-minute time bucket: a double click lands on the same transaction, the same
//! purchase a day later does not.

use std::sync::Arc;

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    AttemptResult, CustomerInfo, IdempotencyRecord, PaymentInfo, ServiceInfo, TargetItem,
    Transaction, TransactionMetadata,
};
use crate::ports::{RepositoryError, Store};

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("invalid payment intent: {0}")]
    Invalid(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A customer's request to pay for a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRequest {
    pub service: ServiceInfo,
    pub customer: CustomerInfo,
    pub target_username: String,
    pub amount: BigDecimal,
    #[serde(default)]
    pub items: Vec<TargetItem>,
    #[serde(default)]
    pub payment_provider: Option<String>,
    #[serde(default)]
    pub payment_id: Option<String>,
}

impl IntentRequest {
    fn validate(&self) -> Result<(), IdempotencyError> {
        if self.amount <= BigDecimal::zero() {
            return Err(IdempotencyError::Invalid("amount must be positive".into()));
        }
        if self.service.quantity <= 0 {
            return Err(IdempotencyError::Invalid("quantity must be positive".into()));
        }
        if self.customer.email.trim().is_empty() {
            return Err(IdempotencyError::Invalid("customer email is required".into()));
        }
        if self.target_username.trim().is_empty() && self.items.is_empty() {
            return Err(IdempotencyError::Invalid(
                "a target username or at least one item is required".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentOutcome {
    pub transaction: Transaction,
    pub result: AttemptResult,
    pub idempotency_key: String,
}

/// Pure: same purchase in the same minute, same key.
pub fn compute_key(request: &IntentRequest, at: DateTime<Utc>) -> String {
    let fingerprint = json!({
        "service_id": request.service.service_id,
        "email": request.customer.email.trim().to_lowercase(),
        "username": request.target_username.trim().trim_start_matches('@').to_lowercase(),
        "amount": request.amount.with_scale(2).to_string(),
        "bucket": at.timestamp().div_euclid(60),
    });
    hex::encode(Sha256::digest(fingerprint.to_string().as_bytes()))
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn Store>,
    window: Duration,
    payment_window: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn Store>, window: Duration, payment_window: Duration) -> Self {
        Self {
            store,
            window,
            payment_window,
        }
    }

    pub async fn check_existing(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, IdempotencyError> {
        Ok(self
            .store
            .find_by_idempotency_key(key, now - self.window)
            .await?)
    }

    /// Appends to the attempt log. Failures are logged and otherwise ignored;
    /// the log is diagnostic and must never fail a payment.
    pub async fn record_attempt(
        &self,
        key: &str,
        transaction_id: Option<Uuid>,
        result: AttemptResult,
        request_data: Value,
        error: Option<String>,
    ) {
        let record = IdempotencyRecord::new(key, transaction_id, result, request_data, error);
        if let Err(e) = self.store.insert_attempt(&record).await {
            tracing::warn!(idempotency_key = %key, error = %e, "Failed to log idempotency attempt");
        }
    }

    pub async fn create_or_get(&self, request: &IntentRequest) -> Result<IntentOutcome, IdempotencyError> {
        self.create_or_get_at(request, Utc::now()).await
    }

    pub async fn create_or_get_at(
        &self,
        request: &IntentRequest,
        now: DateTime<Utc>,
    ) -> Result<IntentOutcome, IdempotencyError> {
        request.validate()?;
        let key = compute_key(request, now);
        let snapshot = serde_json::to_value(request).unwrap_or(Value::Null);

        if let Some(existing) = self.check_existing(&key, now).await? {
            tracing::info!(
                transaction_id = %existing.id,
                idempotency_key = %key,
                "Duplicate payment intent collapsed"
            );
            self.record_attempt(&key, Some(existing.id), AttemptResult::Existing, snapshot, None)
                .await;
            return Ok(IntentOutcome {
                transaction: existing,
                result: AttemptResult::Existing,
                idempotency_key: key,
            });
        }

        let tx = self.build_transaction(request, &key, now);
        match self.store.insert_transaction(&tx).await {
            Ok(created) => {
                tracing::info!(
                    transaction_id = %created.id,
                    amount = %created.amount,
                    "Transaction created"
                );
                self.record_attempt(&key, Some(created.id), AttemptResult::New, snapshot, None)
                    .await;
                Ok(IntentOutcome {
                    transaction: created,
                    result: AttemptResult::New,
                    idempotency_key: key,
                })
            }
            // Lost the race to an identical request; the winner's row is the answer.
            Err(RepositoryError::Conflict(_)) => {
                let winner = self.check_existing(&key, now).await?.ok_or_else(|| {
                    RepositoryError::NotFound(format!("transaction for idempotency key {}", key))
                })?;
                self.record_attempt(&key, Some(winner.id), AttemptResult::Existing, snapshot, None)
                    .await;
                Ok(IntentOutcome {
                    transaction: winner,
                    result: AttemptResult::Existing,
                    idempotency_key: key,
                })
            }
            Err(e) => {
                self.record_attempt(&key, None, AttemptResult::Error, snapshot, Some(e.to_string()))
                    .await;
                Err(e.into())
            }
        }
    }

    fn build_transaction(&self, request: &IntentRequest, key: &str, now: DateTime<Utc>) -> Transaction {
        let metadata = TransactionMetadata {
            service: Some(request.service.clone()),
            customer: Some(request.customer.clone()),
            items: request.items.clone(),
            payment: Some(PaymentInfo {
                provider: request
                    .payment_provider
                    .clone()
                    .unwrap_or_else(|| "default".to_string()),
                expires_at: Some(now + self.payment_window),
                status: Some("pending".to_string()),
            }),
            ..Default::default()
        };
        let mut tx = Transaction::new(
            request.amount.with_scale(2),
            request.target_username.trim().trim_start_matches('@').to_string(),
            request.payment_id.clone(),
            metadata,
            Some(key.to_string()),
        );
        tx.created_at = now;
        tx.updated_at = now;
        tx
    }
}
