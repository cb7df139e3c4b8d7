pub mod adapters;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod provider;
pub mod services;
pub mod startup;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ReconcileSettings;
use crate::health::HealthChecks;
use crate::ports::Store;
use crate::provider::ProviderRouter;
use crate::services::{
    AdminService, IdempotencyGuard, JobBoard, LockManager, OrderDispatcher, PaymentGateway,
    PaymentService, Reconciler, TransactionProcessor,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub router: Arc<ProviderRouter>,
    pub processor: Arc<TransactionProcessor>,
    pub payments: Arc<PaymentService>,
    pub reconciler: Arc<Reconciler>,
    pub admin: Arc<AdminService>,
    pub health: HealthChecks,
    /// Filled by the scheduler that `serve` starts.
    pub jobs: JobBoard,
    pub admin_api_key: Option<String>,
}

impl AppState {
    /// Wires every service on top of one store, one provider router and one
    /// payment source.
    pub fn new(
        store: Arc<dyn Store>,
        router: Arc<ProviderRouter>,
        gateway: Arc<dyn PaymentGateway>,
        settings: ReconcileSettings,
        admin_api_key: Option<String>,
    ) -> Self {
        let locks = LockManager::new(store.clone(), settings.lock_ttl(), settings.worker_id.clone());
        let dispatcher = OrderDispatcher::new(store.clone(), router.clone(), settings.item_delay())
            .with_max_submit_attempts(settings.max_processing_attempts);
        let processor = Arc::new(TransactionProcessor::new(
            store.clone(),
            locks,
            dispatcher,
            settings.max_processing_attempts,
            settings.payment_window(),
        ));
        let guard = IdempotencyGuard::new(
            store.clone(),
            settings.idempotency_window(),
            settings.payment_window(),
        );
        let payments = Arc::new(PaymentService::new(
            store.clone(),
            gateway,
            processor.clone(),
            guard,
        ));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            router.clone(),
            processor.clone(),
            payments.clone(),
            settings,
        ));
        let admin = Arc::new(AdminService::new(store.clone(), processor.clone()));
        let health = HealthChecks::new(store.clone(), router.clone());

        Self {
            store,
            router,
            processor,
            payments,
            reconciler,
            admin,
            health,
            jobs: JobBoard::default(),
            admin_api_key,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/cron/reconcile", post(handlers::cron::reconcile))
        .route("/cron/clear-locks", post(handlers::cron::clear_locks))
        .route("/admin/jobs", get(handlers::admin::list_jobs))
        .route("/admin/locks", get(handlers::admin::list_locks))
        .route("/admin/locks/:id/force-unlock", post(handlers::admin::force_unlock))
        .route(
            "/admin/transactions/:id/reprocess",
            post(handlers::admin::reprocess_transaction),
        )
        .route("/admin/orders/:id/resolve", post(handlers::admin::resolve_order))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks/payment", post(handlers::webhook::payment_notification))
        .route("/payments/intents", post(handlers::payments::create_intent))
        .route(
            "/payments/:payment_id/status",
            get(handlers::payments::payment_status),
        )
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
