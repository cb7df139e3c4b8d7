use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;

use super::{
    NormalizedResponse, NormalizedStatus, ProviderClient, ProviderConfig, ProviderError,
    ProviderOrderStatus, ProviderRequest, RequestFlavor,
};

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

/// Submission answer. Panels say `order`, REST providers `orderId` or `id`.
#[derive(Debug, Default, Deserialize)]
struct RawSubmitResponse {
    #[serde(default, alias = "orderId", alias = "order_id", alias = "id")]
    order: Option<Value>,
    #[serde(default, alias = "message")]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStatusResponse {
    #[serde(default, alias = "orderStatus", alias = "state")]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    remains: Option<i64>,
    #[serde(default, alias = "startCount", deserialize_with = "lenient_i64")]
    start_count: Option<i64>,
    #[serde(default, alias = "message")]
    error: Option<String>,
}

/// Panels send counts as numbers or numeric strings, sometimes with decimals.
fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }))
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// HTTP adapter for one provider account, speaking either the panel or the JSON
/// dialect.
#[derive(Clone)]
pub struct HttpProviderClient {
    client: Client,
    config: ProviderConfig,
    circuit_breaker: Breaker,
}

impl HttpProviderClient {
    pub fn new(config: ProviderConfig, timeout: Duration) -> Self {
        Self::with_circuit_breaker(config, timeout, 3, 60)
    }

    pub fn with_circuit_breaker(
        config: ProviderConfig,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Self {
            client,
            config,
            circuit_breaker,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.config.id
    }

    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn build_submit(&self, request: &ProviderRequest) -> reqwest::RequestBuilder {
        match self.config.flavor {
            RequestFlavor::Panel => {
                let quantity = request.quantity.to_string();
                let form = [
                    ("key", self.config.api_key.as_str()),
                    ("action", "add"),
                    ("service", request.service.as_str()),
                    ("link", request.link.as_str()),
                    ("quantity", quantity.as_str()),
                ];
                self.client.post(&self.config.api_url).form(&form)
            }
            RequestFlavor::Json => self
                .client
                .post(self.endpoint("orders"))
                .bearer_auth(&self.config.api_key)
                .json(&serde_json::json!({
                    "serviceId": request.service,
                    "link": request.link,
                    "quantity": request.quantity,
                })),
        }
    }

    fn build_status(&self, external_order_id: &str) -> reqwest::RequestBuilder {
        match self.config.flavor {
            RequestFlavor::Panel => {
                let form = [
                    ("key", self.config.api_key.as_str()),
                    ("action", "status"),
                    ("order", external_order_id),
                ];
                self.client.post(&self.config.api_url).form(&form)
            }
            RequestFlavor::Json => self
                .client
                .get(self.endpoint(&format!("orders/{}", external_order_id)))
                .bearer_auth(&self.config.api_key),
        }
    }

    /// Sends through the breaker. Only transport-level failures count against it;
    /// a provider saying "no" is a healthy provider.
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
        let provider_id = self.config.id.clone();
        let result = self
            .circuit_breaker
            .call_with(
                |e: &ProviderError| matches!(e, ProviderError::Network(_)),
                async move {
                    let response = request.send().await.map_err(|e| {
                        ProviderError::Network(format!("{}: {}", provider_id, e))
                    })?;
                    let status = response.status();
                    let body = response.text().await.map_err(|e| {
                        ProviderError::Network(format!("{}: {}", provider_id, e))
                    })?;
                    interpret(status, &body)
                },
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(ProviderError::Network(format!(
                "circuit breaker open for provider {}",
                self.config.id
            ))),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

fn interpret(status: StatusCode, body: &str) -> Result<Value, ProviderError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ProviderError::Auth(format!("HTTP {}", status.as_u16())));
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::Network(format!("HTTP {}", status.as_u16())));
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) if status.is_client_error() => {
            return Err(ProviderError::classify(body.trim()));
        }
        // The provider may have acted on it; resubmitting blindly risks a duplicate.
        Err(e) => {
            return Err(ProviderError::Rejected(format!(
                "unreadable provider response: {}",
                e
            )))
        }
    };

    if status.is_client_error() {
        let message = value
            .get("error")
            .or_else(|| value.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        return Err(ProviderError::classify(&message));
    }
    Ok(value)
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn submit(&self, request: &ProviderRequest) -> Result<NormalizedResponse, ProviderError> {
        let raw = self.execute(self.build_submit(request)).await?;
        let parsed: RawSubmitResponse = serde_json::from_value(raw.clone()).unwrap_or_default();

        if let Some(external_id) = parsed.order.as_ref().and_then(id_to_string) {
            return Ok(NormalizedResponse { external_id, raw });
        }
        Err(ProviderError::classify(
            parsed
                .error
                .as_deref()
                .unwrap_or("provider returned no order id"),
        ))
    }

    async fn status(&self, external_order_id: &str) -> Result<NormalizedStatus, ProviderError> {
        let raw = self.execute(self.build_status(external_order_id)).await?;
        let parsed: RawStatusResponse = serde_json::from_value(raw).unwrap_or_default();

        let Some(provider_status) = parsed.status else {
            return Err(ProviderError::classify(
                parsed
                    .error
                    .as_deref()
                    .unwrap_or("provider returned no status"),
            ));
        };
        let status = ProviderOrderStatus::from_provider(&provider_status).ok_or_else(|| {
            ProviderError::Rejected(format!("unrecognized provider status: {}", provider_status))
        })?;

        Ok(NormalizedStatus {
            status,
            provider_status,
            remains: parsed.remains,
            start_count: parsed.start_count,
            error_message: parsed.error,
        })
    }
}
