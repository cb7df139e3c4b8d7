//! One reconciliation pass: provider order statuses, stale payments and
//! transactions that still owe orders.

use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;

use super::payment::{PaymentService, PaymentStatus};
use super::transaction_processor::{ProcessOutcome, TransactionProcessor, Trigger};
use crate::config::ReconcileSettings;
use crate::domain::{ErrorCategory, Order, OrderError, OrderStatus};
use crate::ports::{RepositoryError, Store};
use crate::provider::{NormalizedStatus, ProviderError, ProviderOrderStatus, ProviderRouter};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Orders asked about.
    pub polled: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Changed under us between read and write.
    pub skipped: usize,
    /// Provider unreachable; left for the next tick.
    pub unknown: usize,
    pub escalated: usize,
    pub expired: u64,
    pub rechecked: usize,
    pub approved: usize,
    pub retried: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Updated,
    Unchanged,
    Skipped,
    Unknown,
    Escalated,
}

/// What the stored order should become given a provider answer.
fn next_state(order: &Order, status: &NormalizedStatus, now: DateTime<Utc>) -> (OrderStatus, bool, Order) {
    let mut next = order.clone();
    next.metadata.provider_status = Some(status.provider_status.clone());
    next.metadata.last_status_check = Some(now);
    if status.remains.is_some() {
        next.metadata.remains = status.remains;
    }
    if status.start_count.is_some() {
        next.metadata.start_count = status.start_count;
    }

    let (new_status, attention) = match status.status {
        ProviderOrderStatus::Pending => (OrderStatus::Pending, order.needs_admin_attention),
        ProviderOrderStatus::Processing => (OrderStatus::Processing, order.needs_admin_attention),
        ProviderOrderStatus::Completed => (OrderStatus::Completed, order.needs_admin_attention),
        // short delivery: someone has to decide about the shortfall
        ProviderOrderStatus::Partial => (OrderStatus::Completed, true),
        ProviderOrderStatus::Cancelled => (OrderStatus::Cancelled, true),
        ProviderOrderStatus::Failed => {
            next.metadata.error = Some(OrderError {
                category: ErrorCategory::ProviderRejected,
                message: status
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("provider reported {}", status.provider_status)),
            });
            (OrderStatus::Error, true)
        }
    };
    (new_status, attention, next)
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    router: Arc<ProviderRouter>,
    processor: Arc<TransactionProcessor>,
    payments: Arc<PaymentService>,
    limiter: DefaultDirectRateLimiter,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        router: Arc<ProviderRouter>,
        processor: Arc<TransactionProcessor>,
        payments: Arc<PaymentService>,
        settings: ReconcileSettings,
    ) -> Self {
        let rate = NonZeroU32::new(settings.provider_rate_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            store,
            router,
            processor,
            payments,
            limiter: RateLimiter::direct(Quota::per_minute(rate)),
            settings,
        }
    }

    /// Runs every stage. A failing stage is logged and counted; the others still run.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        if let Err(e) = self.poll_orders(now, &mut report).await {
            tracing::error!(error = %e, "Order status polling failed");
            report.errors += 1;
        }

        match self
            .processor
            .expire_stale(now, self.settings.status_batch_size)
            .await
        {
            Ok(n) => report.expired = n,
            Err(e) => {
                tracing::error!(error = %e, "Expiring unpaid transactions failed");
                report.errors += 1;
            }
        }

        if let Err(e) = self.recheck_payments(now, &mut report).await {
            tracing::error!(error = %e, "Payment re-check failed");
            report.errors += 1;
        }

        if let Err(e) = self.retry_unprocessed(now, &mut report).await {
            tracing::error!(error = %e, "Retry sweep failed");
            report.errors += 1;
        }

        tracing::info!(
            polled = report.polled,
            updated = report.updated,
            escalated = report.escalated,
            expired = report.expired,
            rechecked = report.rechecked,
            retried = report.retried,
            errors = report.errors,
            "Reconciliation tick finished"
        );
        report
    }

    async fn poll_orders(&self, now: DateTime<Utc>, report: &mut TickReport) -> Result<(), RepositoryError> {
        let orders = self
            .store
            .list_orders_to_poll(now - self.settings.status_grace(), self.settings.status_batch_size)
            .await?;
        report.polled = orders.len();

        let outcomes: Vec<Result<PollOutcome, RepositoryError>> = stream::iter(orders)
            .map(|order| self.poll_one(order, now))
            .buffer_unordered(self.settings.provider_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(PollOutcome::Updated) => report.updated += 1,
                Ok(PollOutcome::Unchanged) => report.unchanged += 1,
                Ok(PollOutcome::Skipped) => report.skipped += 1,
                Ok(PollOutcome::Unknown) => report.unknown += 1,
                Ok(PollOutcome::Escalated) => {
                    report.updated += 1;
                    report.escalated += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to store order status");
                    report.errors += 1;
                }
            }
        }
        Ok(())
    }

    async fn poll_one(&self, order: Order, now: DateTime<Utc>) -> Result<PollOutcome, RepositoryError> {
        let Some(external_id) = order.external_order_id.clone() else {
            return Ok(PollOutcome::Skipped);
        };
        self.limiter.until_ready().await;
        let answer = self.router.check_status(&order.provider_id, &external_id).await;
        self.apply_status(&order, answer, now).await
    }

    async fn apply_status(
        &self,
        order: &Order,
        answer: Result<NormalizedStatus, ProviderError>,
        now: DateTime<Utc>,
    ) -> Result<PollOutcome, RepositoryError> {
        let (status, attention, next) = match answer {
            Ok(status) => next_state(order, &status, now),
            Err(ProviderError::Network(message)) => {
                tracing::warn!(order_id = %order.id, error = %message, "Provider unreachable, status unknown");
                return Ok(PollOutcome::Unknown);
            }
            Err(e) => {
                tracing::error!(
                    order_id = %order.id,
                    provider_id = %order.provider_id,
                    category = e.category().as_str(),
                    error = %e,
                    "Provider refused status check"
                );
                let mut next = order.clone();
                next.metadata.last_status_check = Some(now);
                next.metadata.error = Some(OrderError {
                    category: e.category(),
                    message: e.to_string(),
                });
                (order.status, true, next)
            }
        };

        let stored = self
            .store
            .update_order_status(order.id, order.status, status, attention, &next.metadata, now)
            .await?;
        if !stored {
            tracing::debug!(order_id = %order.id, "Order changed during status check, skipped");
            return Ok(PollOutcome::Skipped);
        }

        if attention && !order.needs_admin_attention {
            tracing::warn!(order_id = %order.id, status = %status, "Order needs admin attention");
            return Ok(PollOutcome::Escalated);
        }
        if status != order.status {
            tracing::info!(order_id = %order.id, from = %order.status, to = %status, "Order status changed");
            Ok(PollOutcome::Updated)
        } else {
            Ok(PollOutcome::Unchanged)
        }
    }

    /// Last payment check for pending transactions about to hit their deadline.
    async fn recheck_payments(&self, now: DateTime<Utc>, report: &mut TickReport) -> Result<(), RepositoryError> {
        let from = now - self.settings.payment_window();
        let to = now - Duration::minutes(self.settings.recheck_after_mins);
        let pending = self
            .store
            .list_pending_created_between(from, to, self.settings.status_batch_size)
            .await?;

        for tx in pending {
            let Some(payment_id) = tx.payment_id.as_deref() else {
                continue;
            };
            report.rechecked += 1;
            match self.payments.check_with_trigger(payment_id, Trigger::PaymentCheck).await {
                Ok(check) if check.payment_status == PaymentStatus::Approved => report.approved += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(transaction_id = %tx.id, payment_id, error = %e, "Payment re-check failed");
                    report.errors += 1;
                }
            }
        }
        Ok(())
    }

    /// Approved transactions whose last attempt failed, `processing` rows left
    /// behind by a worker that died mid-dispatch, and processed transactions
    /// with targets that hit a network error.
    async fn retry_unprocessed(&self, now: DateTime<Utc>, report: &mut TickReport) -> Result<(), RepositoryError> {
        let updated_before = now - self.settings.status_grace();
        let mut candidates = self
            .store
            .list_retryable(
                self.settings.max_processing_attempts,
                updated_before,
                self.settings.status_batch_size,
            )
            .await?;
        candidates.extend(
            self.store
                .list_with_undelivered_orders(
                    self.processor.max_submit_attempts(),
                    updated_before,
                    self.settings.status_batch_size,
                )
                .await?,
        );

        for tx in candidates {
            match self.processor.process(tx.id, Trigger::Retry, false).await {
                Ok(result) => {
                    report.retried += 1;
                    if result.outcome == ProcessOutcome::Failed {
                        tracing::warn!(
                            transaction_id = %tx.id,
                            error = ?result.error,
                            "Retry did not deliver"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(transaction_id = %tx.id, error = %e, "Retry failed");
                    report.errors += 1;
                }
            }
        }
        Ok(())
    }
}
