use anyhow::Context;
use dotenvy::dotenv;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        }
    }
}

/// Tunables of the reconciliation pipeline.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Written to `locked_by` so a stuck lock can be traced to its worker.
    pub worker_id: String,
    pub lock_ttl_secs: i64,
    pub max_processing_attempts: i32,
    pub payment_deadline_mins: i64,
    /// Pending transactions older than this get one last payment check before
    /// they expire.
    pub recheck_after_mins: i64,
    pub idempotency_window_hours: i64,
    pub status_grace_secs: i64,
    pub status_batch_size: i64,
    pub provider_concurrency: usize,
    pub provider_rate_per_minute: u32,
    pub provider_timeout_secs: u64,
    pub dispatch_item_delay_ms: u64,
    pub reconcile_cron: String,
    pub lock_sweep_cron: String,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            worker_id: "worker-local".to_string(),
            lock_ttl_secs: 300,
            max_processing_attempts: 3,
            payment_deadline_mins: 30,
            recheck_after_mins: 25,
            idempotency_window_hours: 24,
            status_grace_secs: 120,
            status_batch_size: 50,
            provider_concurrency: 4,
            provider_rate_per_minute: 60,
            provider_timeout_secs: 30,
            dispatch_item_delay_ms: 250,
            reconcile_cron: "0 * * * * *".to_string(),
            lock_sweep_cron: "0 */30 * * * *".to_string(),
        }
    }
}

impl ReconcileSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            worker_id: env::var("WORKER_ID").unwrap_or_else(|_| default_worker_id()),
            lock_ttl_secs: env_or("LOCK_TTL_SECS", defaults.lock_ttl_secs)?,
            max_processing_attempts: env_or(
                "MAX_PROCESSING_ATTEMPTS",
                defaults.max_processing_attempts,
            )?,
            payment_deadline_mins: env_or("PAYMENT_DEADLINE_MINS", defaults.payment_deadline_mins)?,
            recheck_after_mins: defaults.recheck_after_mins,
            idempotency_window_hours: defaults.idempotency_window_hours,
            status_grace_secs: env_or("STATUS_GRACE_SECS", defaults.status_grace_secs)?,
            status_batch_size: env_or("STATUS_BATCH_SIZE", defaults.status_batch_size)?,
            provider_concurrency: env_or("PROVIDER_CONCURRENCY", defaults.provider_concurrency)?,
            provider_rate_per_minute: env_or(
                "PROVIDER_RATE_PER_MINUTE",
                defaults.provider_rate_per_minute,
            )?,
            provider_timeout_secs: env_or("PROVIDER_TIMEOUT_SECS", defaults.provider_timeout_secs)?,
            dispatch_item_delay_ms: env_or(
                "DISPATCH_ITEM_DELAY_MS",
                defaults.dispatch_item_delay_ms,
            )?,
            reconcile_cron: env::var("RECONCILE_CRON").unwrap_or(defaults.reconcile_cron),
            lock_sweep_cron: env::var("LOCK_SWEEP_CRON").unwrap_or(defaults.lock_sweep_cron),
        })
    }

    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_ttl_secs)
    }

    pub fn payment_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.payment_deadline_mins)
    }

    pub fn status_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.status_grace_secs)
    }

    pub fn idempotency_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.idempotency_window_hours)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_item_delay_ms)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub admin_api_key: Option<String>,
    pub payment_api_url: String,
    pub payment_api_token: String,
    pub log_format: LogFormat,
    pub reconcile: ReconcileSettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env_or("SERVER_PORT", 3000u16)?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            admin_api_key: env::var("ADMIN_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            payment_api_url: env::var("PAYMENT_API_URL").context("PAYMENT_API_URL must be set")?,
            payment_api_token: env::var("PAYMENT_API_TOKEN").unwrap_or_default(),
            log_format: env::var("LOG_FORMAT").unwrap_or_default().parse()?,
            reconcile: ReconcileSettings::from_env()?,
        })
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", name, e)),
        _ => Ok(default),
    }
}

fn default_worker_id() -> String {
    format!("worker-{}", std::process::id())
}
