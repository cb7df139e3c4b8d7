use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use super::{
    HttpProviderClient, NormalizedResponse, NormalizedStatus, ProviderClient, ProviderError,
    ProviderRequest,
};
use crate::ports::{ProviderRepository, RepositoryError};

/// Routes provider calls by provider id. Every call is bounded by `timeout`;
/// an elapsed call surfaces as a retryable network error.
pub struct ProviderRouter {
    clients: RwLock<HashMap<String, Arc<dyn ProviderClient>>>,
    timeout: Duration,
}

impl ProviderRouter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub async fn register(&self, provider_id: impl Into<String>, client: Arc<dyn ProviderClient>) {
        self.clients.write().await.insert(provider_id.into(), client);
    }

    /// (Re)builds HTTP adapters for every active row of the providers table.
    /// Adapters registered by hand for other ids are left alone.
    pub async fn refresh<R>(&self, repo: &R) -> Result<usize, RepositoryError>
    where
        R: ProviderRepository + ?Sized,
    {
        let configs = repo.list_active_providers().await?;
        let mut clients = self.clients.write().await;
        for config in &configs {
            let id = config.id.clone();
            clients.insert(
                id,
                Arc::new(HttpProviderClient::new(config.clone(), self.timeout)),
            );
        }
        tracing::info!(count = configs.len(), "Provider configuration loaded");
        Ok(configs.len())
    }

    pub async fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn client(&self, provider_id: &str) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        self.clients
            .read()
            .await
            .get(provider_id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(provider_id.to_string()))
    }

    pub async fn send(
        &self,
        provider_id: &str,
        request: &ProviderRequest,
    ) -> Result<NormalizedResponse, ProviderError> {
        let client = self.client(provider_id).await?;
        match tokio::time::timeout(self.timeout, client.submit(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(provider_id, link = %request.link, "Provider submission timed out");
                Err(ProviderError::Network(format!(
                    "submission to {} timed out after {:?}",
                    provider_id, self.timeout
                )))
            }
        }
    }

    pub async fn check_status(
        &self,
        provider_id: &str,
        external_order_id: &str,
    ) -> Result<NormalizedStatus, ProviderError> {
        let client = self.client(provider_id).await?;
        match tokio::time::timeout(self.timeout, client.status(external_order_id)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Network(format!(
                "status check of {} at {} timed out after {:?}",
                external_order_id, provider_id, self.timeout
            ))),
        }
    }
}
