//! Persistence port. The reconciliation core only talks to storage through these
//! traits; every mutation that can race is expressed as a conditional update that
//! reports whether it applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    AuditEntry, IdempotencyRecord, Order, OrderMetadata, OrderStatus, ProcessingLock,
    Transaction, TransactionStatus,
};
use crate::provider::ProviderConfig;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    /// A uniqueness constraint rejected the write; another writer got there first.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(err.to_string()),
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Fails with `Conflict` when the idempotency key is already taken.
    async fn insert_transaction(&self, tx: &Transaction) -> RepositoryResult<Transaction>;

    async fn get_transaction(&self, id: Uuid) -> RepositoryResult<Option<Transaction>>;

    async fn find_by_payment_id(&self, payment_id: &str) -> RepositoryResult<Option<Transaction>>;

    /// Most recent transaction with this key created after `since`.
    async fn find_by_idempotency_key(
        &self,
        key: &str,
        since: DateTime<Utc>,
    ) -> RepositoryResult<Option<Transaction>>;

    /// `UPDATE ... SET status = to WHERE id = ? AND status IN (from)`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: &[TransactionStatus],
        to: TransactionStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    /// Moves an eligible row to `processing` and bumps `processing_attempts`.
    /// Returns the updated row, or `None` when the row no longer qualifies.
    async fn begin_processing(
        &self,
        id: Uuid,
        from: &[TransactionStatus],
        require_unprocessed: bool,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<Transaction>>;

    /// Sets `is_processed` and `order_created`, clears the error state.
    /// Conditional on `is_processed = false`.
    async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> RepositoryResult<bool>;

    /// Records an attempt that delivered nothing. An `approved` or `processing`
    /// row goes back to `approved` for another attempt, or to `error` with admin
    /// attention when `escalate` is set.
    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        escalate: bool,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    /// `pending -> cancelled` when the payment deadline is before `now`.
    async fn expire_if_pending(
        &self,
        id: Uuid,
        default_window_secs: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    async fn list_expired_pending(
        &self,
        default_window_secs: i64,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>>;

    /// Pending transactions created inside `[from, to)` that carry a payment id.
    async fn list_pending_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>>;

    /// Approved, unprocessed transactions under the attempt cap, untouched since
    /// `updated_before`.
    async fn list_retryable(
        &self,
        max_attempts: i32,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>>;

    /// Processed transactions still in `processing` that own an order which
    /// never reached the provider because of a network error, has fewer than
    /// `max_submit_attempts` submissions and is untouched since `updated_before`.
    async fn list_with_undelivered_orders(
        &self,
        max_submit_attempts: i32,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_order_for_target(
        &self,
        transaction_id: Uuid,
        target_link: &str,
    ) -> RepositoryResult<Option<Order>>;

    /// Inserts the order and flags the owning transaction `order_created` in the
    /// same unit of work. `Conflict` when the target already has an order.
    async fn insert_order(&self, order: &Order) -> RepositoryResult<Order>;

    /// Rewrites a previously failed submission. Never touches an order that
    /// already carries a provider id.
    async fn update_undispatched_order(&self, order: &Order) -> RepositoryResult<bool>;

    async fn get_order(&self, id: Uuid) -> RepositoryResult<Option<Order>>;

    async fn list_orders_for_transaction(&self, transaction_id: Uuid)
        -> RepositoryResult<Vec<Order>>;

    /// Non-terminal, dispatched orders created before `created_before`, least
    /// recently checked first.
    async fn list_orders_to_poll(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Order>>;

    /// Optimistic update keyed on the status the caller last saw.
    async fn update_order_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
        needs_admin_attention: bool,
        metadata: &OrderMetadata,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool>;
}

#[async_trait]
pub trait LockRepository: Send + Sync {
    /// Inserts the lock, or takes over an existing one whose expiry is at or
    /// before `now`. Atomic; returns whether the caller now owns the lock.
    async fn try_acquire_lock(
        &self,
        lock: &ProcessingLock,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    /// Deletes the lock only if `lock_key` still matches.
    async fn release_lock(&self, transaction_id: Uuid, lock_key: &str) -> RepositoryResult<bool>;

    async fn get_lock(&self, transaction_id: Uuid) -> RepositoryResult<Option<ProcessingLock>>;

    async fn list_locks(&self) -> RepositoryResult<Vec<ProcessingLock>>;

    /// `DELETE ... WHERE lock_expiry <= now`.
    async fn delete_expired_locks(&self, now: DateTime<Utc>) -> RepositoryResult<u64>;

    /// Unconditional delete, for the admin override only.
    async fn force_delete_lock(&self, transaction_id: Uuid) -> RepositoryResult<bool>;
}

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    async fn insert_attempt(&self, record: &IdempotencyRecord) -> RepositoryResult<()>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append_audit(&self, entry: &AuditEntry) -> RepositoryResult<()>;
}

#[async_trait]
pub trait ProviderRepository: Send + Sync {
    async fn list_active_providers(&self) -> RepositoryResult<Vec<ProviderConfig>>;
}

#[async_trait]
pub trait HealthRepository: Send + Sync {
    /// Round trip to the backing store.
    async fn ping(&self) -> RepositoryResult<()>;
}

/// Everything the reconciliation core needs from storage.
pub trait Store:
    HealthRepository
    + TransactionRepository
    + OrderRepository
    + LockRepository
    + IdempotencyRepository
    + AuditRepository
    + ProviderRepository
{
}

impl<T> Store for T where
    T: HealthRepository
        + TransactionRepository
        + OrderRepository
        + LockRepository
        + IdempotencyRepository
        + AuditRepository
        + ProviderRepository
{
}
