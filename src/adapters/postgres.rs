//! Postgres implementation of the persistence port.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    AuditEntry, Cancellation, IdempotencyRecord, Order, OrderMetadata, OrderStatus,
    ProcessingLock, Transaction, TransactionMetadata, TransactionStatus,
};
use crate::ports::{
    AuditRepository, HealthRepository, IdempotencyRepository, LockRepository, OrderRepository,
    ProviderRepository, RepositoryError, RepositoryResult, TransactionRepository,
};
use crate::provider::{ProviderConfig, RequestFlavor};

const TRANSACTION_COLUMNS: &str = "id, status, payment_id, amount, target_username, metadata, \
    is_processed, order_created, processing_attempts, idempotency_key, needs_admin_attention, \
    last_processing_error, created_at, updated_at";

const ORDER_COLUMNS: &str = "id, transaction_id, external_order_id, status, quantity, \
    target_link, target_username, provider_id, needs_admin_attention, metadata, created_at, \
    updated_at";

/// Deadline expression shared by the expiry queries. `$1` is the default window
/// in seconds.
const DEADLINE_SQL: &str = "COALESCE((metadata->'payment'->>'expires_at')::timestamptz, \
    created_at + make_interval(secs => $1))";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn status_list(statuses: &[TransactionStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl TransactionRepository for PostgresStore {
    async fn insert_transaction(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let sql = format!(
            "INSERT INTO transactions ({cols}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {cols}",
            cols = TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(tx.id)
            .bind(tx.status.as_str())
            .bind(&tx.payment_id)
            .bind(&tx.amount)
            .bind(&tx.target_username)
            .bind(Json(&tx.metadata))
            .bind(tx.is_processed)
            .bind(tx.order_created)
            .bind(tx.processing_attempts)
            .bind(&tx.idempotency_key)
            .bind(tx.needs_admin_attention)
            .bind(&tx.last_processing_error)
            .bind(tx.created_at)
            .bind(tx.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.into_domain()
    }

    async fn get_transaction(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> RepositoryResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE payment_id = $1 ORDER BY created_at DESC LIMIT 1",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
        since: DateTime<Utc>,
    ) -> RepositoryResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions \
             WHERE idempotency_key = $1 AND created_at >= $2 \
             ORDER BY created_at DESC LIMIT 1",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(key)
            .bind(since)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[TransactionStatus],
        to: TransactionStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE transactions SET status = $1, updated_at = $2 \
             WHERE id = $3 AND status = ANY($4)",
        )
        .bind(to.as_str())
        .bind(now)
        .bind(id)
        .bind(status_list(from))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn begin_processing(
        &self,
        id: Uuid,
        from: &[TransactionStatus],
        require_unprocessed: bool,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<Transaction>> {
        let sql = format!(
            "UPDATE transactions \
             SET status = 'processing', processing_attempts = processing_attempts + 1, \
                 updated_at = $1 \
             WHERE id = $2 AND status = ANY($3) AND (NOT $4 OR is_processed = FALSE) \
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(now)
            .bind(id)
            .bind(status_list(from))
            .bind(require_unprocessed)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE transactions \
             SET is_processed = TRUE, order_created = TRUE, needs_admin_attention = FALSE, \
                 last_processing_error = NULL, updated_at = $1 \
             WHERE id = $2 AND is_processed = FALSE",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        escalate: bool,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE transactions \
             SET status = CASE WHEN $1 THEN 'error' ELSE 'approved' END, \
                 needs_admin_attention = needs_admin_attention OR $1, \
                 last_processing_error = $2, updated_at = $3 \
             WHERE id = $4 AND status IN ('approved', 'processing')",
        )
        .bind(escalate)
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn expire_if_pending(
        &self,
        id: Uuid,
        default_window_secs: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let cancellation = Cancellation {
            at: now,
            reason: reason.to_string(),
        };
        let sql = format!(
            "UPDATE transactions \
             SET status = 'cancelled', updated_at = $2, \
                 metadata = jsonb_set(metadata, '{{cancellation}}', $3::jsonb, true) \
             WHERE id = $4 AND status = 'pending' AND {} < $2",
            DEADLINE_SQL
        );
        let result = sqlx::query(&sql)
            .bind(default_window_secs as f64)
            .bind(now)
            .bind(Json(&cancellation))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_expired_pending(
        &self,
        default_window_secs: i64,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions \
             WHERE status = 'pending' AND {} < $2 \
             ORDER BY created_at ASC LIMIT $3",
            TRANSACTION_COLUMNS, DEADLINE_SQL
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(default_window_secs as f64)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn list_pending_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions \
             WHERE status = 'pending' AND payment_id IS NOT NULL \
               AND created_at >= $1 AND created_at < $2 \
             ORDER BY created_at ASC LIMIT $3",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(from)
            .bind(to)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn list_retryable(
        &self,
        max_attempts: i32,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions \
             WHERE status IN ('approved', 'processing') AND is_processed = FALSE \
               AND processing_attempts < $1 AND updated_at <= $2 \
             ORDER BY updated_at ASC LIMIT $3",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(max_attempts)
            .bind(updated_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn list_with_undelivered_orders(
        &self,
        max_submit_attempts: i32,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions \
             WHERE status = 'processing' AND is_processed = TRUE \
               AND id IN (SELECT o.transaction_id FROM orders o \
                          WHERE o.external_order_id IS NULL AND o.status = 'error' \
                            AND o.metadata->'error'->>'category' = 'network_error' \
                            AND COALESCE((o.metadata->>'submit_attempts')::int, 0) < $1 \
                            AND o.updated_at <= $2) \
             ORDER BY updated_at ASC LIMIT $3",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(max_submit_attempts)
            .bind(updated_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }
}

#[async_trait]
impl OrderRepository for PostgresStore {
    async fn find_order_for_target(
        &self,
        transaction_id: Uuid,
        target_link: &str,
    ) -> RepositoryResult<Option<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE transaction_id = $1 AND target_link = $2",
            ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(transaction_id)
            .bind(target_link)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(OrderRow::into_domain).transpose()
    }

    async fn insert_order(&self, order: &Order) -> RepositoryResult<Order> {
        let mut db_tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let sql = format!(
            "INSERT INTO orders ({cols}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {cols}",
            cols = ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order.id)
            .bind(order.transaction_id)
            .bind(&order.external_order_id)
            .bind(order.status.as_str())
            .bind(order.quantity)
            .bind(&order.target_link)
            .bind(&order.target_username)
            .bind(&order.provider_id)
            .bind(order.needs_admin_attention)
            .bind(Json(&order.metadata))
            .bind(order.created_at)
            .bind(order.updated_at)
            .fetch_one(&mut *db_tx)
            .await
            .map_err(RepositoryError::from)?;

        sqlx::query("UPDATE transactions SET order_created = TRUE WHERE id = $1")
            .bind(order.transaction_id)
            .execute(&mut *db_tx)
            .await
            .map_err(RepositoryError::from)?;

        db_tx.commit().await.map_err(RepositoryError::from)?;
        row.into_domain()
    }

    async fn update_undispatched_order(&self, order: &Order) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE orders \
             SET external_order_id = $1, status = $2, quantity = $3, target_username = $4, \
                 provider_id = $5, needs_admin_attention = $6, metadata = $7, updated_at = $8 \
             WHERE id = $9 AND external_order_id IS NULL",
        )
        .bind(&order.external_order_id)
        .bind(order.status.as_str())
        .bind(order.quantity)
        .bind(&order.target_username)
        .bind(&order.provider_id)
        .bind(order.needs_admin_attention)
        .bind(Json(&order.metadata))
        .bind(order.updated_at)
        .bind(order.id)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_order(&self, id: Uuid) -> RepositoryResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(OrderRow::into_domain).transpose()
    }

    async fn list_orders_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> RepositoryResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE transaction_id = $1 ORDER BY created_at ASC",
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(transaction_id)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        rows.into_iter().map(OrderRow::into_domain).collect()
    }

    async fn list_orders_to_poll(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders \
             WHERE status IN ('pending', 'processing') AND external_order_id IS NOT NULL \
               AND created_at < $1 \
             ORDER BY (metadata->>'last_status_check')::timestamptz ASC NULLS FIRST, \
                      created_at ASC \
             LIMIT $2",
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(created_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        rows.into_iter().map(OrderRow::into_domain).collect()
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
        let result = sqlx::query(
            "UPDATE orders \
             SET status = $1, needs_admin_attention = $2, metadata = $3, updated_at = $4 \
             WHERE id = $5 AND status = $6",
        )
        .bind(status.as_str())
        .bind(needs_admin_attention)
        .bind(Json(metadata))
        .bind(now)
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl LockRepository for PostgresStore {
    async fn try_acquire_lock(
        &self,
        lock: &ProcessingLock,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        // A live row makes the WHERE false, so nothing is inserted or updated.
        let result = sqlx::query(
            "INSERT INTO transaction_locks \
                 (transaction_id, lock_key, lock_expiry, locked_by, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (transaction_id) DO UPDATE \
             SET lock_key = EXCLUDED.lock_key, lock_expiry = EXCLUDED.lock_expiry, \
                 locked_by = EXCLUDED.locked_by, status = EXCLUDED.status, \
                 created_at = EXCLUDED.created_at \
             WHERE transaction_locks.lock_expiry <= $7",
        )
        .bind(lock.transaction_id)
        .bind(&lock.lock_key)
        .bind(lock.lock_expiry)
        .bind(&lock.locked_by)
        .bind(&lock.status)
        .bind(lock.created_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lock(&self, transaction_id: Uuid, lock_key: &str) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "DELETE FROM transaction_locks WHERE transaction_id = $1 AND lock_key = $2",
        )
        .bind(transaction_id)
        .bind(lock_key)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_lock(&self, transaction_id: Uuid) -> RepositoryResult<Option<ProcessingLock>> {
        let row = sqlx::query_as::<_, LockRow>(
            "SELECT transaction_id, lock_key, lock_expiry, locked_by, status, created_at \
             FROM transaction_locks WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(LockRow::into_domain))
    }

    async fn list_locks(&self) -> RepositoryResult<Vec<ProcessingLock>> {
        let rows = sqlx::query_as::<_, LockRow>(
            "SELECT transaction_id, lock_key, lock_expiry, locked_by, status, created_at \
             FROM transaction_locks ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(LockRow::into_domain).collect())
    }

    async fn delete_expired_locks(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM transaction_locks WHERE lock_expiry <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(result.rows_affected())
    }

    async fn force_delete_lock(&self, transaction_id: Uuid) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM transaction_locks WHERE transaction_id = $1")
            .bind(transaction_id)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IdempotencyRepository for PostgresStore {
    async fn insert_attempt(&self, record: &IdempotencyRecord) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO payment_idempotency_log \
                 (id, idempotency_key, transaction_id, result, request_data, error_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(&record.idempotency_key)
        .bind(record.transaction_id)
        .bind(record.result.as_str())
        .bind(&record.request_data)
        .bind(&record.error_message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }
}

#[async_trait]
impl AuditRepository for PostgresStore {
    async fn append_audit(&self, entry: &AuditEntry) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO audit_logs (id, entity_id, entity_type, action, actor, details, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.entity_id)
        .bind(&entry.entity_type)
        .bind(&entry.action)
        .bind(&entry.actor)
        .bind(&entry.details)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }
}

#[async_trait]
impl HealthRepository for PostgresStore {
    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }
}

#[async_trait]
impl ProviderRepository for PostgresStore {
    async fn list_active_providers(&self) -> RepositoryResult<Vec<ProviderConfig>> {
        let rows = sqlx::query_as::<_, ProviderRow>(
            "SELECT id, name, api_url, api_key, flavor FROM providers \
             WHERE is_active = TRUE ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(ProviderRow::into_domain).collect()
    }
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    status: String,
    payment_id: Option<String>,
    amount: BigDecimal,
    target_username: String,
    metadata: Json<TransactionMetadata>,
    is_processed: bool,
    order_created: bool,
    processing_attempts: i32,
    idempotency_key: Option<String>,
    needs_admin_attention: bool,
    last_processing_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        let status = self
            .status
            .parse::<TransactionStatus>()
            .map_err(|e| RepositoryError::Corrupt(format!("transaction {}: {}", self.id, e)))?;
        Ok(Transaction {
            id: self.id,
            status,
            payment_id: self.payment_id,
            amount: self.amount,
            target_username: self.target_username,
            metadata: self.metadata.0,
            is_processed: self.is_processed,
            order_created: self.order_created,
            processing_attempts: self.processing_attempts,
            idempotency_key: self.idempotency_key,
            needs_admin_attention: self.needs_admin_attention,
            last_processing_error: self.last_processing_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    transaction_id: Uuid,
    external_order_id: Option<String>,
    status: String,
    quantity: i32,
    target_link: String,
    target_username: Option<String>,
    provider_id: String,
    needs_admin_attention: bool,
    metadata: Json<OrderMetadata>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_domain(self) -> RepositoryResult<Order> {
        let status = self
            .status
            .parse::<OrderStatus>()
            .map_err(|e| RepositoryError::Corrupt(format!("order {}: {}", self.id, e)))?;
        Ok(Order {
            id: self.id,
            transaction_id: self.transaction_id,
            external_order_id: self.external_order_id,
            status,
            quantity: self.quantity,
            target_link: self.target_link,
            target_username: self.target_username,
            provider_id: self.provider_id,
            needs_admin_attention: self.needs_admin_attention,
            metadata: self.metadata.0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LockRow {
    transaction_id: Uuid,
    lock_key: String,
    lock_expiry: DateTime<Utc>,
    locked_by: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl LockRow {
    fn into_domain(self) -> ProcessingLock {
        ProcessingLock {
            transaction_id: self.transaction_id,
            lock_key: self.lock_key,
            lock_expiry: self.lock_expiry,
            locked_by: self.locked_by,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProviderRow {
    id: String,
    name: String,
    api_url: String,
    api_key: String,
    flavor: String,
}

impl ProviderRow {
    fn into_domain(self) -> RepositoryResult<ProviderConfig> {
        let flavor = self
            .flavor
            .parse::<RequestFlavor>()
            .map_err(|e| RepositoryError::Corrupt(format!("provider {}: {}", self.id, e)))?;
        Ok(ProviderConfig {
            id: self.id,
            name: self.name,
            api_url: self.api_url,
            api_key: self.api_key,
            flavor,
        })
    }
}
