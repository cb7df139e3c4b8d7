//! Audit trail entries for admin overrides and other irreversible actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const ENTITY_TRANSACTION: &str = "transaction";
pub const ENTITY_ORDER: &str = "order";
pub const ENTITY_LOCK: &str = "lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub entity_type: String,
    pub action: String,
    pub actor: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(entity_id: Uuid, entity_type: &str, action: &str, actor: &str, details: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id,
            entity_type: entity_type.to_string(),
            action: action.to_string(),
            actor: actor.to_string(),
            details,
            timestamp: Utc::now(),
        }
    }
}
