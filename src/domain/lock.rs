//! Time-bounded exclusivity claim on a transaction id.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const LOCK_STATUS_LOCKED: &str = "locked";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingLock {
    pub transaction_id: Uuid,
    /// Random token proving ownership; release must present it.
    pub lock_key: String,
    pub lock_expiry: DateTime<Utc>,
    pub locked_by: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl ProcessingLock {
    pub fn new(transaction_id: Uuid, locked_by: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            transaction_id,
            lock_key: Uuid::new_v4().to_string(),
            lock_expiry: now + ttl,
            locked_by: locked_by.to_string(),
            status: LOCK_STATUS_LOCKED.to_string(),
            created_at: now,
        }
    }

    /// An expired lock is treated as absent no matter who held it.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.lock_expiry > now
    }
}
