#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::HttpBody;
use axum::response::Response;
use bigdecimal::BigDecimal;
use serde_json::Value;

use order_reconciler::adapters::InMemoryStore;
use order_reconciler::config::ReconcileSettings;
use order_reconciler::domain::{
    ServiceInfo, ServiceKind, TargetItem, Transaction, TransactionMetadata, TransactionStatus,
};
use order_reconciler::provider::{
    NormalizedResponse, NormalizedStatus, ProviderClient, ProviderError, ProviderOrderStatus,
    ProviderRequest, ProviderRouter,
};
use order_reconciler::services::payment::PaymentGatewayError;
use order_reconciler::services::{PaymentGateway, PaymentStatus};
use order_reconciler::AppState;

pub const ADMIN_KEY: &str = "test-admin-key";

/// Provider double: records submissions, answers from a script, then succeeds.
#[derive(Default)]
pub struct FakeProvider {
    submissions: Mutex<Vec<ProviderRequest>>,
    script: Mutex<VecDeque<Result<NormalizedResponse, ProviderError>>>,
    statuses: Mutex<HashMap<String, Result<NormalizedStatus, ProviderError>>>,
    delay_ms: AtomicU64,
    next_id: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_error(&self, error: ProviderError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_status(&self, external_id: &str, status: ProviderOrderStatus, remains: Option<i64>) {
        self.statuses.lock().unwrap().insert(
            external_id.to_string(),
            Ok(NormalizedStatus {
                status,
                provider_status: status.to_string(),
                remains,
                start_count: Some(0),
                error_message: None,
            }),
        );
    }

    pub fn set_status_error(&self, external_id: &str, error: ProviderError) {
        self.statuses
            .lock()
            .unwrap()
            .insert(external_id.to_string(), Err(error));
    }

    pub fn submissions(&self) -> Vec<ProviderRequest> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn submit(&self, request: &ProviderRequest) -> Result<NormalizedResponse, ProviderError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.submissions.lock().unwrap().push(request.clone());
        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return scripted;
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(NormalizedResponse {
            external_id: format!("ext-{}", n),
            raw: serde_json::json!({ "order": n }),
        })
    }

    async fn status(&self, external_order_id: &str) -> Result<NormalizedStatus, ProviderError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.statuses
            .lock()
            .unwrap()
            .get(external_order_id)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::Network("no scripted status".to_string())))
    }
}

/// Payment gateway double keyed by payment id.
#[derive(Default)]
pub struct FakeGateway {
    payments: Mutex<HashMap<String, PaymentStatus>>,
    calls: AtomicUsize,
}

impl FakeGateway {
    pub fn set(&self, payment_id: &str, status: PaymentStatus) {
        self.payments
            .lock()
            .unwrap()
            .insert(payment_id.to_string(), status);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatus, PaymentGatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .copied()
            .ok_or_else(|| PaymentGatewayError::NotFound(payment_id.to_string()))
    }
}

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<FakeProvider>,
    pub gateway: Arc<FakeGateway>,
    pub state: AppState,
}

pub fn test_settings() -> ReconcileSettings {
    ReconcileSettings {
        worker_id: "test-worker".to_string(),
        dispatch_item_delay_ms: 0,
        provider_rate_per_minute: 6000,
        ..ReconcileSettings::default()
    }
}

pub async fn test_app() -> TestApp {
    test_app_with(test_settings(), Duration::from_secs(5)).await
}

pub async fn test_app_with(settings: ReconcileSettings, provider_timeout: Duration) -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let provider = FakeProvider::new();
    let gateway = Arc::new(FakeGateway::default());

    let router = Arc::new(ProviderRouter::new(provider_timeout));
    router.register("main", provider.clone()).await;

    let state = AppState::new(
        store.clone(),
        router,
        gateway.clone(),
        settings,
        Some(ADMIN_KEY.to_string()),
    );
    TestApp {
        store,
        provider,
        gateway,
        state,
    }
}

pub fn transaction(kind: ServiceKind, links: &[&str], quantity: i32, status: TransactionStatus) -> Transaction {
    let metadata = TransactionMetadata {
        service: Some(ServiceInfo {
            service_id: format!("{:?}-{}", kind, quantity).to_lowercase(),
            name: None,
            kind,
            provider_id: "main".to_string(),
            external_service_id: "101".to_string(),
            quantity,
        }),
        items: links
            .iter()
            .map(|l| TargetItem {
                link: l.to_string(),
                code: None,
                quantity: None,
            })
            .collect(),
        ..Default::default()
    };
    let mut tx = Transaction::new(
        BigDecimal::from(25),
        "@someone".to_string(),
        Some(format!("pay-{}", uuid::Uuid::new_v4().simple())),
        metadata,
        None,
    );
    tx.status = status;
    tx
}

pub async fn body_json(response: Response) -> Value {
    let mut body = response.into_body();
    let mut bytes = Vec::new();
    while let Some(chunk) = body.data().await {
        bytes.extend_from_slice(&chunk.unwrap());
    }
    serde_json::from_slice(&bytes).unwrap()
}
