//! Payment confirmation source and the entry points that react to it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::idempotency::{IdempotencyError, IdempotencyGuard, IntentOutcome, IntentRequest};
use super::transaction_processor::{ProcessError, ProcessResult, TransactionProcessor, Trigger};
use crate::domain::TransactionStatus;
use crate::ports::{RepositoryError, Store};

#[derive(Debug, Error)]
pub enum PaymentGatewayError {
    #[error("payment {0} not found at gateway")]
    NotFound(String),
    #[error("payment gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected payment gateway response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("no transaction for payment {0}")]
    UnknownPayment(String),
    #[error(transparent)]
    Gateway(#[from] PaymentGatewayError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Intent(#[from] IdempotencyError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Refunded,
    Unknown,
}

impl PaymentStatus {
    /// Maps gateway vocabulary ("paid", "in_process", "charged_back", ...).
    pub fn from_gateway(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" | "paid" | "succeeded" | "completed" | "confirmed" => PaymentStatus::Approved,
            "pending" | "in_process" | "in_mediation" | "authorized" | "waiting" => {
                PaymentStatus::Pending
            }
            "rejected" | "failed" | "declined" => PaymentStatus::Rejected,
            "cancelled" | "canceled" | "expired" => PaymentStatus::Cancelled,
            "refunded" | "charged_back" | "chargeback" => PaymentStatus::Refunded,
            _ => PaymentStatus::Unknown,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatus, PaymentGatewayError>;
}

#[derive(Debug, Deserialize)]
struct GatewayPayment {
    status: String,
}

/// REST gateway client: `GET {base}/v1/payments/{id}` with a bearer token.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, token: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            token,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatus, PaymentGatewayError> {
        let url = format!(
            "{}/v1/payments/{}",
            self.base_url.trim_end_matches('/'),
            payment_id
        );
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(PaymentGatewayError::NotFound(payment_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(PaymentGatewayError::InvalidResponse(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }

        let payment = response.json::<GatewayPayment>().await?;
        Ok(PaymentStatus::from_gateway(&payment.status))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentCheck {
    pub transaction_id: Uuid,
    pub payment_status: PaymentStatus,
    pub transaction_status: TransactionStatus,
    pub process: Option<ProcessResult>,
}

pub struct PaymentService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    processor: Arc<TransactionProcessor>,
    guard: IdempotencyGuard,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        processor: Arc<TransactionProcessor>,
        guard: IdempotencyGuard,
    ) -> Self {
        Self {
            store,
            gateway,
            processor,
            guard,
        }
    }

    pub async fn create_intent(&self, request: &IntentRequest) -> Result<IntentOutcome, PaymentError> {
        Ok(self.guard.create_or_get(request).await?)
    }

    /// Payment confirmed: approve, then convert to orders. Safe to call any number
    /// of times for the same transaction.
    pub async fn on_payment_confirmed(
        &self,
        transaction_id: Uuid,
        trigger: Trigger,
    ) -> Result<ProcessResult, PaymentError> {
        self.processor.mark_approved(transaction_id).await?;
        Ok(self.processor.process(transaction_id, trigger, false).await?)
    }

    /// Asks the gateway for the truth about a payment and applies it.
    pub async fn check_payment_status(&self, payment_id: &str) -> Result<PaymentCheck, PaymentError> {
        self.check_with_trigger(payment_id, Trigger::PaymentCheck).await
    }

    pub async fn check_with_trigger(
        &self,
        payment_id: &str,
        trigger: Trigger,
    ) -> Result<PaymentCheck, PaymentError> {
        let tx = self
            .store
            .find_by_payment_id(payment_id)
            .await?
            .ok_or_else(|| PaymentError::UnknownPayment(payment_id.to_string()))?;

        let payment_status = self.gateway.payment_status(payment_id).await?;
        tracing::info!(
            transaction_id = %tx.id,
            payment_id,
            payment_status = ?payment_status,
            "Payment status checked"
        );

        let process = match payment_status {
            PaymentStatus::Approved => Some(self.on_payment_confirmed(tx.id, trigger).await?),
            PaymentStatus::Refunded => {
                self.processor.mark_refunded(tx.id).await?;
                None
            }
            PaymentStatus::Rejected | PaymentStatus::Cancelled => {
                self.processor.mark_payment_failed(tx.id).await?;
                None
            }
            PaymentStatus::Pending | PaymentStatus::Unknown => None,
        };

        let transaction_status = self
            .store
            .get_transaction(tx.id)
            .await?
            .map(|t| t.status)
            .unwrap_or(tx.status);

        Ok(PaymentCheck {
            transaction_id: tx.id,
            payment_status,
            transaction_status,
            process,
        })
    }
}
