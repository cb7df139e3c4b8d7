//! Drives a transaction through its lifecycle and converts it into orders at
//! most once, whatever mix of webhooks, cron ticks and admin actions asks for it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::dispatcher::{DispatchError, DispatchReport, OrderDispatcher};
use super::lock_manager::{LockError, LockManager};
use crate::domain::{Transaction, TransactionStatus};
use crate::ports::{RepositoryError, Store};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Who asked for processing. Logged with every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Webhook,
    PaymentCheck,
    Retry,
    Admin,
    Cli,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Webhook => "webhook",
            Trigger::PaymentCheck => "payment_check",
            Trigger::Retry => "retry",
            Trigger::Admin => "admin",
            Trigger::Cli => "cli",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// At least one target has a provider order.
    Processed,
    /// Another worker holds the lock; it will do the work.
    SkippedLocked,
    AlreadyProcessed,
    NotEligible,
    AttemptsExhausted,
    /// Nothing was delivered this time.
    Failed,
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub transaction_id: Uuid,
    pub outcome: ProcessOutcome,
    pub success: bool,
    pub needs_retry: bool,
    pub error: Option<String>,
    pub report: Option<DispatchReport>,
}

impl ProcessResult {
    fn new(transaction_id: Uuid, outcome: ProcessOutcome) -> Self {
        let success = matches!(
            outcome,
            ProcessOutcome::Processed | ProcessOutcome::SkippedLocked | ProcessOutcome::AlreadyProcessed
        );
        Self {
            transaction_id,
            outcome,
            success,
            needs_retry: false,
            error: None,
            report: None,
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

const APPROVABLE: [TransactionStatus; 2] = [TransactionStatus::Pending, TransactionStatus::Cancelled];
const REFUNDABLE: [TransactionStatus; 3] = [
    TransactionStatus::Approved,
    TransactionStatus::Processing,
    TransactionStatus::Error,
];
const PROCESSABLE: [TransactionStatus; 2] = [TransactionStatus::Approved, TransactionStatus::Processing];
const FORCE_PROCESSABLE: [TransactionStatus; 3] = [
    TransactionStatus::Approved,
    TransactionStatus::Processing,
    TransactionStatus::Error,
];

pub struct TransactionProcessor {
    store: Arc<dyn Store>,
    locks: LockManager,
    dispatcher: OrderDispatcher,
    max_attempts: i32,
    payment_window: Duration,
}

impl TransactionProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        locks: LockManager,
        dispatcher: OrderDispatcher,
        max_attempts: i32,
        payment_window: Duration,
    ) -> Self {
        Self {
            store,
            locks,
            dispatcher,
            max_attempts,
            payment_window,
        }
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn max_submit_attempts(&self) -> i32 {
        self.dispatcher.max_submit_attempts()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[TransactionStatus],
        to: TransactionStatus,
    ) -> Result<bool, ProcessError> {
        debug_assert!(from.iter().all(|s| s.can_transition_to(to)));
        let moved = self.store.transition_status(id, from, to, Utc::now()).await?;
        if moved {
            tracing::info!(transaction_id = %id, status = %to, "Transaction status changed");
        }
        Ok(moved)
    }

    /// Confirmed payment. A transaction cancelled for lateness is revived, since
    /// the money arrived anyway.
    pub async fn mark_approved(&self, id: Uuid) -> Result<bool, ProcessError> {
        self.transition(id, &APPROVABLE, TransactionStatus::Approved).await
    }

    pub async fn mark_refunded(&self, id: Uuid) -> Result<bool, ProcessError> {
        self.transition(id, &REFUNDABLE, TransactionStatus::Refunded).await
    }

    /// Payment source reported the payment as rejected or cancelled.
    pub async fn mark_payment_failed(&self, id: Uuid) -> Result<bool, ProcessError> {
        self.transition(id, &[TransactionStatus::Pending], TransactionStatus::Cancelled)
            .await
    }

    pub async fn mark_expired(&self, id: Uuid) -> Result<bool, ProcessError> {
        self.mark_expired_at(id, Utc::now()).await
    }

    /// No-op unless the transaction is still pending past its deadline.
    pub async fn mark_expired_at(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, ProcessError> {
        let expired = self
            .store
            .expire_if_pending(
                id,
                self.payment_window.num_seconds(),
                "payment deadline passed",
                now,
            )
            .await?;
        if expired {
            tracing::info!(transaction_id = %id, "Unpaid transaction cancelled");
        }
        Ok(expired)
    }

    pub async fn expire_stale(&self, now: DateTime<Utc>, limit: i64) -> Result<u64, ProcessError> {
        let stale = self
            .store
            .list_expired_pending(self.payment_window.num_seconds(), now, limit)
            .await?;
        let mut expired = 0;
        for tx in stale {
            if self.mark_expired_at(tx.id, now).await? {
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Converts the transaction into orders under its processing lock. Contention
    /// and replays come back as successful outcomes, never as errors.
    pub async fn process(
        &self,
        id: Uuid,
        trigger: Trigger,
        force: bool,
    ) -> Result<ProcessResult, ProcessError> {
        let grant = self.locks.acquire(id).await?;
        let Some(token) = grant.lock_token.filter(|_| grant.granted) else {
            tracing::info!(
                transaction_id = %id,
                trigger = trigger.as_str(),
                "Transaction is being processed elsewhere"
            );
            return Ok(ProcessResult::new(id, ProcessOutcome::SkippedLocked));
        };

        let result = self.process_locked(id, trigger, force).await;

        if let Err(e) = self.locks.release(id, &token).await {
            tracing::error!(transaction_id = %id, error = %e, "Failed to release processing lock");
        }
        result
    }

    /// A processed transaction only goes back to the provider for targets whose
    /// submission failed transiently. The transaction row is left as is.
    async fn redeliver(&self, tx: Transaction, trigger: Trigger) -> Result<ProcessResult, ProcessError> {
        let id = tx.id;
        if tx.status != TransactionStatus::Processing {
            return Ok(ProcessResult::new(id, ProcessOutcome::AlreadyProcessed));
        }
        let cap = self.dispatcher.max_submit_attempts();
        let orders = self.store.list_orders_for_transaction(id).await?;
        if !orders.iter().any(|o| o.awaits_resubmission(cap)) {
            return Ok(ProcessResult::new(id, ProcessOutcome::AlreadyProcessed));
        }

        tracing::info!(
            transaction_id = %id,
            trigger = trigger.as_str(),
            "Resubmitting targets that failed transiently"
        );
        let report = match self.dispatcher.dispatch(&tx, false).await {
            Ok(report) => report,
            Err(DispatchError::Invalid(reason)) => {
                return Ok(ProcessResult::new(id, ProcessOutcome::Failed).with_error(reason));
            }
            Err(DispatchError::Repository(e)) => return Err(e.into()),
        };

        let mut result = ProcessResult::new(id, ProcessOutcome::Processed);
        if report.failed() > 0 {
            tracing::warn!(transaction_id = %id, summary = %report.summary(), "Redelivery incomplete");
            result.error = Some(report.summary());
            result.needs_retry = report.has_retryable_failures();
        }
        result.report = Some(report);
        Ok(result)
    }

    async fn process_locked(
        &self,
        id: Uuid,
        trigger: Trigger,
        force: bool,
    ) -> Result<ProcessResult, ProcessError> {
        let Some(tx) = self.store.get_transaction(id).await? else {
            return Ok(ProcessResult::new(id, ProcessOutcome::NotFound));
        };

        if tx.is_processed && !force {
            return self.redeliver(tx, trigger).await;
        }
        if !force && tx.processing_attempts >= self.max_attempts {
            let message = format!("attempt cap of {} reached", self.max_attempts);
            // Surface a capped transaction to an admin instead of leaving it approved.
            self.store.record_failure(id, &message, true, Utc::now()).await?;
            return Ok(ProcessResult::new(id, ProcessOutcome::AttemptsExhausted).with_error(message));
        }

        let (eligible, require_unprocessed): (&[TransactionStatus], bool) = if force {
            (&FORCE_PROCESSABLE[..], false)
        } else {
            (&PROCESSABLE[..], true)
        };
        let Some(tx) = self
            .store
            .begin_processing(id, eligible, require_unprocessed, Utc::now())
            .await?
        else {
            return Ok(ProcessResult::new(id, ProcessOutcome::NotEligible)
                .with_error(format!("status {} is not processable", tx.status)));
        };

        tracing::info!(
            transaction_id = %id,
            trigger = trigger.as_str(),
            attempt = tx.processing_attempts,
            force,
            "Processing transaction"
        );

        let report = match self.dispatcher.dispatch(&tx, force).await {
            Ok(report) => report,
            Err(DispatchError::Invalid(reason)) => {
                tracing::error!(transaction_id = %id, reason = %reason, "Transaction cannot be dispatched");
                self.store.record_failure(id, &reason, true, Utc::now()).await?;
                return Ok(ProcessResult::new(id, ProcessOutcome::Failed).with_error(reason));
            }
            Err(DispatchError::Repository(e)) => {
                // Leave it retryable; already-stored orders are skipped next time.
                if let Err(record_err) = self
                    .store
                    .record_failure(id, &e.to_string(), false, Utc::now())
                    .await
                {
                    tracing::warn!(
                        transaction_id = %id,
                        error = %record_err,
                        "Failed to record dispatch failure"
                    );
                }
                return Err(e.into());
            }
        };

        let now = Utc::now();
        if report.delivered() > 0 {
            if !self.store.mark_processed(id, now).await? {
                tracing::debug!(transaction_id = %id, "Transaction was already marked processed");
            }
            let mut result = ProcessResult::new(id, ProcessOutcome::Processed);
            if report.failed() > 0 {
                result.error = Some(report.summary());
                result.needs_retry = report.has_retryable_failures();
            }
            result.report = Some(report);
            return Ok(result);
        }

        let escalate = tx.processing_attempts >= self.max_attempts || report.only_permanent_failures();
        let summary = report.summary();
        self.store.record_failure(id, &summary, escalate, now).await?;
        if escalate {
            tracing::error!(
                transaction_id = %id,
                attempts = tx.processing_attempts,
                summary = %summary,
                "Transaction needs admin attention"
            );
        } else {
            tracing::warn!(
                transaction_id = %id,
                attempts = tx.processing_attempts,
                summary = %summary,
                "Dispatch failed, will retry"
            );
        }

        let mut result = ProcessResult::new(id, ProcessOutcome::Failed).with_error(summary);
        result.needs_retry = !escalate;
        result.report = Some(report);
        Ok(result)
    }
}
