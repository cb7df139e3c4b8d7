//! Manual overrides. Every action leaves an audit entry.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use super::lock_manager::{LockError, LockStatusReport};
use super::transaction_processor::{ProcessError, ProcessResult, TransactionProcessor, Trigger};
use crate::domain::audit::{ENTITY_ORDER, ENTITY_TRANSACTION};
use crate::domain::{AuditEntry, ManualResolution, Order, OrderStatus};
use crate::ports::{RepositoryError, Store};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct AdminService {
    store: Arc<dyn Store>,
    processor: Arc<TransactionProcessor>,
}

impl AdminService {
    pub fn new(store: Arc<dyn Store>, processor: Arc<TransactionProcessor>) -> Self {
        Self { store, processor }
    }

    async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.store.append_audit(&entry).await {
            tracing::warn!(
                entity_id = %entry.entity_id,
                action = %entry.action,
                error = %e,
                "Failed to write audit entry"
            );
        }
    }

    /// Processes the transaction even if it is in `error` or already processed.
    /// Targets that already have a provider order are still never resubmitted.
    pub async fn force_reprocess(
        &self,
        transaction_id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<ProcessResult, AdminError> {
        if self.store.get_transaction(transaction_id).await?.is_none() {
            return Err(AdminError::NotFound(format!("transaction {}", transaction_id)));
        }

        tracing::warn!(transaction_id = %transaction_id, actor, "Forced reprocess requested");
        let result = self
            .processor
            .process(transaction_id, Trigger::Admin, true)
            .await?;

        self.audit(AuditEntry::new(
            transaction_id,
            ENTITY_TRANSACTION,
            "force_reprocess",
            actor,
            json!({
                "reason": reason,
                "outcome": result.outcome,
                "error": result.error,
            }),
        ))
        .await;
        Ok(result)
    }

    pub async fn force_unlock(
        &self,
        transaction_id: Uuid,
        actor: &str,
        confirmation: &str,
    ) -> Result<bool, AdminError> {
        Ok(self
            .processor
            .locks()
            .force_unlock(transaction_id, actor, confirmation)
            .await?)
    }

    pub async fn lock_status(&self) -> Result<LockStatusReport, AdminError> {
        Ok(self.processor.locks().status_report().await?)
    }

    /// Clears the attention flag after a human dealt with the order. An `error`
    /// order goes back to `pending`: re-polled if it has a provider id, resubmitted
    /// on the next forced reprocess if not.
    pub async fn mark_order_resolved(
        &self,
        order_id: Uuid,
        actor: &str,
        note: Option<String>,
    ) -> Result<Order, AdminError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("order {}", order_id)))?;

        if !order.needs_admin_attention && order.status != OrderStatus::Error {
            return Err(AdminError::Conflict(format!(
                "order {} does not need resolution",
                order_id
            )));
        }

        let now = Utc::now();
        let new_status = match order.status {
            OrderStatus::Error => OrderStatus::Pending,
            other => other,
        };
        let mut metadata = order.metadata.clone();
        metadata.manual_resolution = Some(ManualResolution {
            resolved_by: actor.to_string(),
            resolved_at: now,
            original_status: order.status.to_string(),
            original_error: metadata.error.as_ref().map(|e| e.message.clone()),
            note: note.clone(),
        });
        metadata.error = None;

        let stored = self
            .store
            .update_order_status(order.id, order.status, new_status, false, &metadata, now)
            .await?;
        if !stored {
            return Err(AdminError::Conflict(format!(
                "order {} changed while being resolved",
                order_id
            )));
        }
        tracing::info!(order_id = %order.id, actor, from = %order.status, to = %new_status, "Order resolved manually");

        self.audit(AuditEntry::new(
            order.id,
            ENTITY_ORDER,
            "mark_resolved",
            actor,
            json!({
                "transaction_id": order.transaction_id,
                "original_status": order.status,
                "new_status": new_status,
                "note": note,
            }),
        ))
        .await;

        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("order {}", order_id)))
    }
}
