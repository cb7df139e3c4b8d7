//! Framework-agnostic domain types.

pub mod audit;
pub mod idempotency;
pub mod lock;
pub mod metadata;
pub mod order;
pub mod target;
pub mod transaction;

pub use audit::AuditEntry;
pub use idempotency::{AttemptResult, IdempotencyRecord};
pub use lock::ProcessingLock;
pub use metadata::{
    Cancellation, CustomerInfo, ErrorCategory, ManualResolution, OrderError, OrderMetadata,
    PaymentInfo, ServiceInfo, ServiceKind, TargetItem, TransactionMetadata,
};
pub use order::{Order, OrderStatus};
pub use transaction::{Transaction, TransactionStatus};
