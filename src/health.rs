use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::ports::Store;
use crate::provider::ProviderRouter;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl Into<String>) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.into(),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
}

pub struct StoreChecker {
    store: Arc<dyn Store>,
}

impl StoreChecker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DependencyChecker for StoreChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.store.ping().await {
            Ok(()) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e.to_string()),
        }
    }
}

/// Healthy while at least one provider adapter is registered.
pub struct ProviderChecker {
    router: Arc<ProviderRouter>,
}

impl ProviderChecker {
    pub fn new(router: Arc<ProviderRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl DependencyChecker for ProviderChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        if self.router.provider_ids().await.is_empty() {
            DependencyStatus::unhealthy("no provider configured")
        } else {
            DependencyStatus::healthy(start)
        }
    }
}

struct Check {
    name: String,
    critical: bool,
    checker: Arc<dyn DependencyChecker>,
}

/// The set of dependency checks behind `/health`. A failing critical check
/// makes the service unhealthy, any other failure only degraded.
#[derive(Clone)]
pub struct HealthChecks {
    checks: Arc<Vec<Check>>,
    started: Instant,
}

impl HealthChecks {
    pub fn new(store: Arc<dyn Store>, router: Arc<ProviderRouter>) -> Self {
        let checks = vec![
            Check {
                name: "store".to_string(),
                critical: true,
                checker: Arc::new(StoreChecker::new(store)),
            },
            Check {
                name: "providers".to_string(),
                critical: false,
                checker: Arc::new(ProviderChecker::new(router)),
            },
        ];
        Self {
            checks: Arc::new(checks),
            started: Instant::now(),
        }
    }

    pub async fn check_health(&self) -> HealthResponse {
        let timeout_duration = Duration::from_secs(5);

        let results = join_all(
            self.checks
                .iter()
                .map(|c| timeout(timeout_duration, c.checker.check())),
        )
        .await;

        let mut dependencies = HashMap::new();
        let mut has_critical_failure = false;
        let mut has_non_critical_failure = false;
        for (check, result) in self.checks.iter().zip(results) {
            let status = result.unwrap_or_else(|_| DependencyStatus::unhealthy("timeout"));
            if matches!(status, DependencyStatus::Unhealthy { .. }) {
                if check.critical {
                    has_critical_failure = true;
                } else {
                    has_non_critical_failure = true;
                }
            }
            dependencies.insert(check.name.clone(), status);
        }

        let status = if has_critical_failure {
            "unhealthy"
        } else if has_non_critical_failure {
            "degraded"
        } else {
            "healthy"
        };

        HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started.elapsed().as_secs(),
            dependencies,
        }
    }
}
