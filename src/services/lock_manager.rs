//! Database-backed mutual exclusion per transaction id.
//!
//! There is no in-process coordinator: a lock is a row with an expiry. A lock
//! whose expiry has passed is treated as absent, so a crashed holder never
//! blocks progress for longer than the TTL.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::audit::ENTITY_LOCK;
use crate::domain::{AuditEntry, ProcessingLock};
use crate::ports::{RepositoryError, Store};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("confirmation does not match transaction id {0}")]
    ConfirmationMismatch(Uuid),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockGrant {
    pub granted: bool,
    pub lock_token: Option<String>,
}

impl LockGrant {
    fn denied() -> Self {
        Self {
            granted: false,
            lock_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatusReport {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    pub locks: Vec<ProcessingLock>,
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn Store>,
    ttl: Duration,
    worker_id: String,
}

impl LockManager {
    pub fn new(store: Arc<dyn Store>, ttl: Duration, worker_id: impl Into<String>) -> Self {
        Self {
            store,
            ttl,
            worker_id: worker_id.into(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn acquire(&self, transaction_id: Uuid) -> Result<LockGrant, LockError> {
        self.acquire_at(transaction_id, Utc::now()).await
    }

    /// Contention is an outcome: a held lock yields `granted: false`, not an error.
    pub async fn acquire_at(
        &self,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LockGrant, LockError> {
        let lock = ProcessingLock::new(transaction_id, &self.worker_id, now, self.ttl);
        if self.store.try_acquire_lock(&lock, now).await? {
            tracing::debug!(
                transaction_id = %transaction_id,
                locked_by = %self.worker_id,
                expires_at = %lock.lock_expiry,
                "Processing lock acquired"
            );
            Ok(LockGrant {
                granted: true,
                lock_token: Some(lock.lock_key),
            })
        } else {
            tracing::debug!(transaction_id = %transaction_id, "Processing lock held elsewhere");
            Ok(LockGrant::denied())
        }
    }

    /// Releases only if `token` still owns the lock. A lock that expired and was
    /// taken over is left with its new owner.
    pub async fn release(&self, transaction_id: Uuid, token: &str) -> Result<bool, LockError> {
        let released = self.store.release_lock(transaction_id, token).await?;
        if !released {
            tracing::warn!(
                transaction_id = %transaction_id,
                "Processing lock was no longer ours at release"
            );
        }
        Ok(released)
    }

    pub async fn is_locked(&self, transaction_id: Uuid) -> Result<bool, LockError> {
        self.is_locked_at(transaction_id, Utc::now()).await
    }

    pub async fn is_locked_at(
        &self,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, LockError> {
        Ok(self
            .store
            .get_lock(transaction_id)
            .await?
            .map(|lock| lock.is_valid_at(now))
            .unwrap_or(false))
    }

    pub async fn clear_expired(&self) -> Result<u64, LockError> {
        self.clear_expired_at(Utc::now()).await
    }

    pub async fn clear_expired_at(&self, now: DateTime<Utc>) -> Result<u64, LockError> {
        let removed = self.store.delete_expired_locks(now).await?;
        if removed > 0 {
            tracing::info!(removed, "Expired processing locks cleared");
        }
        Ok(removed)
    }

    /// Drops a lock regardless of owner or expiry. The caller must repeat the
    /// transaction id as `confirmation`.
    pub async fn force_unlock(
        &self,
        transaction_id: Uuid,
        actor: &str,
        confirmation: &str,
    ) -> Result<bool, LockError> {
        if confirmation.trim() != transaction_id.to_string() {
            return Err(LockError::ConfirmationMismatch(transaction_id));
        }

        let previous = self.store.get_lock(transaction_id).await?;
        let removed = self.store.force_delete_lock(transaction_id).await?;
        tracing::warn!(
            transaction_id = %transaction_id,
            actor,
            removed,
            "Processing lock force-unlocked"
        );

        let entry = AuditEntry::new(
            transaction_id,
            ENTITY_LOCK,
            "force_unlock",
            actor,
            json!({
                "removed": removed,
                "previous_holder": previous.as_ref().map(|l| l.locked_by.clone()),
                "previous_expiry": previous.as_ref().map(|l| l.lock_expiry),
            }),
        );
        if let Err(e) = self.store.append_audit(&entry).await {
            tracing::warn!(transaction_id = %transaction_id, error = %e, "Failed to write audit entry");
        }
        Ok(removed)
    }

    pub async fn status_report(&self) -> Result<LockStatusReport, LockError> {
        self.status_report_at(Utc::now()).await
    }

    pub async fn status_report_at(&self, now: DateTime<Utc>) -> Result<LockStatusReport, LockError> {
        let locks = self.store.list_locks().await?;
        let active = locks.iter().filter(|l| l.is_valid_at(now)).count();
        Ok(LockStatusReport {
            total: locks.len(),
            active,
            expired: locks.len() - active,
            locks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;

    fn manager(store: &InMemoryStore, worker: &str) -> LockManager {
        LockManager::new(Arc::new(store.clone()), Duration::minutes(5), worker)
    }

    #[tokio::test]
    async fn test_second_acquire_is_denied_until_release() {
        let store = InMemoryStore::new();
        let a = manager(&store, "a");
        let b = manager(&store, "b");
        let id = Uuid::new_v4();

        let grant = a.acquire(id).await.unwrap();
        assert!(grant.granted);
        assert!(a.is_locked(id).await.unwrap());
        assert_eq!(b.acquire(id).await.unwrap(), LockGrant::denied());

        let token = grant.lock_token.unwrap();
        assert!(a.release(id, &token).await.unwrap());
        assert!(b.acquire(id).await.unwrap().granted);
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over_and_old_token_is_inert() {
        let store = InMemoryStore::new();
        let a = manager(&store, "a");
        let b = manager(&store, "b");
        let id = Uuid::new_v4();
        let now = Utc::now();

        let stale = a.acquire_at(id, now).await.unwrap();
        let later = now + Duration::minutes(6);
        assert!(!a.is_locked_at(id, later).await.unwrap());

        let fresh = b.acquire_at(id, later).await.unwrap();
        assert!(fresh.granted);
        assert!(!a.release(id, stale.lock_token.as_deref().unwrap()).await.unwrap());
        assert!(b.is_locked_at(id, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_expired_keeps_live_locks() {
        let store = InMemoryStore::new();
        let m = manager(&store, "a");
        let now = Utc::now();
        m.acquire_at(Uuid::new_v4(), now - Duration::minutes(10)).await.unwrap();
        m.acquire_at(Uuid::new_v4(), now).await.unwrap();

        let report = m.status_report_at(now).await.unwrap();
        assert_eq!((report.total, report.active, report.expired), (2, 1, 1));

        assert_eq!(m.clear_expired_at(now).await.unwrap(), 1);
        assert_eq!(m.clear_expired_at(now).await.unwrap(), 0);
        assert_eq!(m.status_report_at(now).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_force_unlock_requires_confirmation_and_is_audited() {
        let store = InMemoryStore::new();
        let m = manager(&store, "a");
        let id = Uuid::new_v4();
        m.acquire(id).await.unwrap();

        let err = m.force_unlock(id, "ops", "wrong").await.unwrap_err();
        assert!(matches!(err, LockError::ConfirmationMismatch(_)));
        assert!(m.is_locked(id).await.unwrap());

        assert!(m.force_unlock(id, "ops", &id.to_string()).await.unwrap());
        assert!(!m.is_locked(id).await.unwrap());

        let audit = store.audit_entries().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "force_unlock");
        assert_eq!(audit[0].actor, "ops");
    }
}
