//! In-process store with the same conditional-update semantics as Postgres.
//! Every method runs under a single mutex, which makes each call atomic the way
//! a single SQL statement is.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    AuditEntry, Cancellation, IdempotencyRecord, Order, OrderMetadata, OrderStatus,
    ProcessingLock, Transaction, TransactionStatus,
};
use crate::ports::{
    AuditRepository, HealthRepository, IdempotencyRepository, LockRepository, OrderRepository,
    ProviderRepository, RepositoryError, RepositoryResult, TransactionRepository,
};
use crate::provider::ProviderConfig;

#[derive(Default)]
struct State {
    transactions: HashMap<Uuid, Transaction>,
    orders: HashMap<Uuid, Order>,
    locks: HashMap<Uuid, ProcessingLock>,
    idempotency_log: Vec<IdempotencyRecord>,
    audit_log: Vec<AuditEntry>,
    providers: Vec<ProviderConfig>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_provider(&self, config: ProviderConfig) {
        self.state.lock().await.providers.push(config);
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit_log.clone()
    }

    pub async fn idempotency_records(&self) -> Vec<IdempotencyRecord> {
        self.state.lock().await.idempotency_log.clone()
    }

    /// Overwrites a stored transaction wholesale. Lets tests stage rows in
    /// states the public API only reaches over time.
    pub async fn put_transaction(&self, tx: Transaction) {
        self.state.lock().await.transactions.insert(tx.id, tx);
    }
}

fn deadline(tx: &Transaction, default_window_secs: i64) -> DateTime<Utc> {
    tx.payment_deadline(Duration::seconds(default_window_secs))
}

fn oldest_first<T, F>(mut rows: Vec<T>, key: F, limit: i64) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    rows.sort_by_key(|r| key(r));
    rows.truncate(limit.max(0) as usize);
    rows
}

#[async_trait]
impl TransactionRepository for InMemoryStore {
    async fn insert_transaction(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let mut state = self.state.lock().await;
        if state.transactions.contains_key(&tx.id) {
            return Err(RepositoryError::Conflict(format!("transaction {}", tx.id)));
        }
        if let Some(key) = &tx.idempotency_key {
            if state
                .transactions
                .values()
                .any(|t| t.idempotency_key.as_deref() == Some(key.as_str()))
            {
                return Err(RepositoryError::Conflict(format!("idempotency key {}", key)));
            }
        }
        state.transactions.insert(tx.id, tx.clone());
        Ok(tx.clone())
    }

    async fn get_transaction(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> RepositoryResult<Option<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| t.payment_id.as_deref() == Some(payment_id))
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
        since: DateTime<Utc>,
    ) -> RepositoryResult<Option<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| t.idempotency_key.as_deref() == Some(key) && t.created_at >= since)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[TransactionStatus],
        to: TransactionStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let mut state = self.state.lock().await;
        match state.transactions.get_mut(&id) {
            Some(tx) if from.contains(&tx.status) => {
                tx.status = to;
                tx.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn begin_processing(
        &self,
        id: Uuid,
        from: &[TransactionStatus],
        require_unprocessed: bool,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<Transaction>> {
        let mut state = self.state.lock().await;
        match state.transactions.get_mut(&id) {
            Some(tx) if from.contains(&tx.status) && !(require_unprocessed && tx.is_processed) => {
                tx.status = TransactionStatus::Processing;
                tx.processing_attempts += 1;
                tx.updated_at = now;
                Ok(Some(tx.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let mut state = self.state.lock().await;
        match state.transactions.get_mut(&id) {
            Some(tx) if !tx.is_processed => {
                tx.is_processed = true;
                tx.order_created = true;
                tx.needs_admin_attention = false;
                tx.last_processing_error = None;
                tx.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        escalate: bool,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let mut state = self.state.lock().await;
        match state.transactions.get_mut(&id) {
            Some(tx)
                if matches!(
                    tx.status,
                    TransactionStatus::Approved | TransactionStatus::Processing
                ) =>
            {
                tx.status = if escalate {
                    TransactionStatus::Error
                } else {
                    TransactionStatus::Approved
                };
                tx.needs_admin_attention = tx.needs_admin_attention || escalate;
                tx.last_processing_error = Some(error.to_string());
                tx.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_if_pending(
        &self,
        id: Uuid,
        default_window_secs: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let mut state = self.state.lock().await;
        match state.transactions.get_mut(&id) {
            Some(tx)
                if tx.status == TransactionStatus::Pending
                    && deadline(tx, default_window_secs) < now =>
            {
                tx.status = TransactionStatus::Cancelled;
                tx.metadata.cancellation = Some(Cancellation {
                    at: now,
                    reason: reason.to_string(),
                });
                tx.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_expired_pending(
        &self,
        default_window_secs: i64,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        let rows = state
            .transactions
            .values()
            .filter(|t| {
                t.status == TransactionStatus::Pending && deadline(t, default_window_secs) < now
            })
            .cloned()
            .collect();
        Ok(oldest_first(rows, |t| t.created_at, limit))
    }

    async fn list_pending_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        let rows = state
            .transactions
            .values()
            .filter(|t| {
                t.status == TransactionStatus::Pending
                    && t.payment_id.is_some()
                    && t.created_at >= from
                    && t.created_at < to
            })
            .cloned()
            .collect();
        Ok(oldest_first(rows, |t| t.created_at, limit))
    }

    async fn list_retryable(
        &self,
        max_attempts: i32,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        let rows = state
            .transactions
            .values()
            .filter(|t| {
                matches!(
                    t.status,
                    TransactionStatus::Approved | TransactionStatus::Processing
                ) && !t.is_processed
                    && t.processing_attempts < max_attempts
                    && t.updated_at <= updated_before
            })
            .cloned()
            .collect();
        Ok(oldest_first(rows, |t| t.updated_at, limit))
    }

    async fn list_with_undelivered_orders(
        &self,
        max_submit_attempts: i32,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        let rows = state
            .transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Processing && t.is_processed)
            .filter(|t| {
                state.orders.values().any(|o| {
                    o.transaction_id == t.id
                        && o.updated_at <= updated_before
                        && o.awaits_resubmission(max_submit_attempts)
                })
            })
            .cloned()
            .collect();
        Ok(oldest_first(rows, |t| t.updated_at, limit))
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn find_order_for_target(
        &self,
        transaction_id: Uuid,
        target_link: &str,
    ) -> RepositoryResult<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.transaction_id == transaction_id && o.target_link == target_link)
            .cloned())
    }

    async fn insert_order(&self, order: &Order) -> RepositoryResult<Order> {
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.id)
            || state.orders.values().any(|o| {
                o.transaction_id == order.transaction_id && o.target_link == order.target_link
            })
        {
            return Err(RepositoryError::Conflict(format!(
                "order for {} on {}",
                order.transaction_id, order.target_link
            )));
        }
        let tx = state
            .transactions
            .get_mut(&order.transaction_id)
            .ok_or_else(|| RepositoryError::NotFound(order.transaction_id.to_string()))?;
        tx.order_created = true;
        state.orders.insert(order.id, order.clone());
        Ok(order.clone())
    }

    async fn update_undispatched_order(&self, order: &Order) -> RepositoryResult<bool> {
        let mut state = self.state.lock().await;
        match state.orders.get_mut(&order.id) {
            Some(existing) if existing.external_order_id.is_none() => {
                existing.external_order_id = order.external_order_id.clone();
                existing.status = order.status;
                existing.quantity = order.quantity;
                existing.target_username = order.target_username.clone();
                existing.provider_id = order.provider_id.clone();
                existing.needs_admin_attention = order.needs_admin_attention;
                existing.metadata = order.metadata.clone();
                existing.updated_at = order.updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_order(&self, id: Uuid) -> RepositoryResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn list_orders_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> RepositoryResult<Vec<Order>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.transaction_id == transaction_id)
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.created_at);
        Ok(rows)
    }

    async fn list_orders_to_poll(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Order>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Order> = state
            .orders
            .values()
            .filter(|o| {
                matches!(o.status, OrderStatus::Pending | OrderStatus::Processing)
                    && o.external_order_id.is_some()
                    && o.created_at < created_before
            })
            .cloned()
            .collect();
        // never-checked orders sort first
        rows.sort_by_key(|o| (o.metadata.last_status_check, o.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn update_order_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
        needs_admin_attention: bool,
        metadata: &OrderMetadata,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let mut state = self.state.lock().await;
        match state.orders.get_mut(&id) {
            Some(order) if order.status == expected => {
                order.status = status;
                order.needs_admin_attention = needs_admin_attention;
                order.metadata = metadata.clone();
                order.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl LockRepository for InMemoryStore {
    async fn try_acquire_lock(
        &self,
        lock: &ProcessingLock,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let mut state = self.state.lock().await;
        let free = state
            .locks
            .get(&lock.transaction_id)
            .map(|held| held.lock_expiry <= now)
            .unwrap_or(true);
        if free {
            state.locks.insert(lock.transaction_id, lock.clone());
        }
        Ok(free)
    }

    async fn release_lock(&self, transaction_id: Uuid, lock_key: &str) -> RepositoryResult<bool> {
        let mut state = self.state.lock().await;
        let owned = state
            .locks
            .get(&transaction_id)
            .map(|held| held.lock_key == lock_key)
            .unwrap_or(false);
        if owned {
            state.locks.remove(&transaction_id);
        }
        Ok(owned)
    }

    async fn get_lock(&self, transaction_id: Uuid) -> RepositoryResult<Option<ProcessingLock>> {
        Ok(self.state.lock().await.locks.get(&transaction_id).cloned())
    }

    async fn list_locks(&self) -> RepositoryResult<Vec<ProcessingLock>> {
        let state = self.state.lock().await;
        let mut locks: Vec<ProcessingLock> = state.locks.values().cloned().collect();
        locks.sort_by_key(|l| l.created_at);
        Ok(locks)
    }

    async fn delete_expired_locks(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.locks.len();
        state.locks.retain(|_, l| l.lock_expiry > now);
        Ok((before - state.locks.len()) as u64)
    }

    async fn force_delete_lock(&self, transaction_id: Uuid) -> RepositoryResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .locks
            .remove(&transaction_id)
            .is_some())
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryStore {
    async fn insert_attempt(&self, record: &IdempotencyRecord) -> RepositoryResult<()> {
        self.state.lock().await.idempotency_log.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl AuditRepository for InMemoryStore {
    async fn append_audit(&self, entry: &AuditEntry) -> RepositoryResult<()> {
        self.state.lock().await.audit_log.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl HealthRepository for InMemoryStore {
    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ProviderRepository for InMemoryStore {
    async fn list_active_providers(&self) -> RepositoryResult<Vec<ProviderConfig>> {
        Ok(self.state.lock().await.providers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn tx() -> Transaction {
        Transaction::new(
            BigDecimal::from(20),
            "someone".to_string(),
            Some("pay-1".to_string()),
            Default::default(),
            Some("key-1".to_string()),
        )
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key_conflicts() {
        let store = InMemoryStore::new();
        store.insert_transaction(&tx()).await.unwrap();
        let err = store.insert_transaction(&tx()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_lock_takeover_only_after_expiry() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let first = ProcessingLock::new(id, "a", now, Duration::minutes(5));
        let second = ProcessingLock::new(id, "b", now, Duration::minutes(5));

        assert!(store.try_acquire_lock(&first, now).await.unwrap());
        assert!(!store.try_acquire_lock(&second, now).await.unwrap());
        assert!(!store.release_lock(id, &second.lock_key).await.unwrap());

        let later = now + Duration::minutes(5);
        assert!(store.try_acquire_lock(&second, later).await.unwrap());
        assert!(!store.release_lock(id, &first.lock_key).await.unwrap());
        assert!(store.release_lock(id, &second.lock_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_order_sets_order_created_and_rejects_duplicates() {
        let store = InMemoryStore::new();
        let t = store.insert_transaction(&tx()).await.unwrap();
        let order = Order::new(t.id, "main".into(), "https://instagram.com/p/a/".into(), None, 10);

        store.insert_order(&order).await.unwrap();
        assert!(store.get_transaction(t.id).await.unwrap().unwrap().order_created);

        let dup = Order::new(t.id, "main".into(), "https://instagram.com/p/a/".into(), None, 10);
        assert!(matches!(
            store.insert_order(&dup).await.unwrap_err(),
            RepositoryError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_begin_processing_is_conditional() {
        let store = InMemoryStore::new();
        let t = store.insert_transaction(&tx()).await.unwrap();
        let now = Utc::now();
        let eligible = [TransactionStatus::Approved, TransactionStatus::Processing];

        assert!(store
            .begin_processing(t.id, &eligible, true, now)
            .await
            .unwrap()
            .is_none());

        store
            .transition_status(t.id, &[TransactionStatus::Pending], TransactionStatus::Approved, now)
            .await
            .unwrap();
        let started = store
            .begin_processing(t.id, &eligible, true, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(started.status, TransactionStatus::Processing);
        assert_eq!(started.processing_attempts, 1);

        assert!(store.mark_processed(t.id, now).await.unwrap());
        assert!(!store.mark_processed(t.id, now).await.unwrap());
        assert!(store
            .begin_processing(t.id, &eligible, true, now)
            .await
            .unwrap()
            .is_none());
    }
}
