pub mod admin;
pub mod dispatcher;
pub mod idempotency;
pub mod lock_manager;
pub mod payment;
pub mod reconciler;
pub mod scheduler;
pub mod transaction_processor;

pub use admin::{AdminError, AdminService};
pub use dispatcher::{DispatchReport, OrderDispatcher};
pub use idempotency::{IdempotencyGuard, IntentRequest};
pub use lock_manager::LockManager;
pub use payment::{HttpPaymentGateway, PaymentGateway, PaymentService, PaymentStatus};
pub use reconciler::{Reconciler, TickReport};
pub use scheduler::{Job, JobBoard, JobScheduler, JobStatus, LockSweepJob, ReconcileJob};
pub use transaction_processor::{ProcessOutcome, ProcessResult, TransactionProcessor, Trigger};
