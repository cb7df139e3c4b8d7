use crate::config::Config;
use crate::ports::Store;
use anyhow::{Context, Result};
use cron::Schedule;
use std::str::FromStr;

pub struct ValidationReport {
    pub environment: bool,
    pub schedules: bool,
    pub database: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.schedules && self.database
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Cron Schedules:        {}", status(self.schedules));
        println!("Database Connectivity: {}", status(self.database));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }
        if !self.warnings.is_empty() {
            println!("\nWarnings:");
            for warning in &self.warnings {
                println!("  ⚠ {}", warning);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

/// Checks configuration, and the store when one is given.
pub async fn validate_environment(config: &Config, store: Option<&dyn Store>) -> ValidationReport {
    let mut report = ValidationReport {
        environment: true,
        schedules: true,
        database: true,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {:#}", e));
    }
    if config.admin_api_key.is_none() {
        report
            .warnings
            .push("ADMIN_API_KEY is not set; admin and cron routes are disabled".to_string());
    }

    if let Err(e) = validate_schedules(config) {
        report.schedules = false;
        report.errors.push(format!("Schedules: {:#}", e));
    }

    if let Some(store) = store {
        if let Err(e) = store.ping().await {
            report.database = false;
            report.errors.push(format!("Database: {}", e));
        }
    }

    report
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    let settings = &config.reconcile;
    if settings.max_processing_attempts < 1 {
        anyhow::bail!("MAX_PROCESSING_ATTEMPTS must be at least 1");
    }
    if settings.lock_ttl_secs < 1 {
        anyhow::bail!("LOCK_TTL_SECS must be at least 1");
    }
    if settings.recheck_after_mins >= settings.payment_deadline_mins {
        anyhow::bail!("payment re-check must happen before the payment deadline");
    }

    url::Url::parse(&config.payment_api_url).context("PAYMENT_API_URL is not a valid URL")?;

    Ok(())
}

fn validate_schedules(config: &Config) -> Result<()> {
    for (name, expression) in [
        ("RECONCILE_CRON", &config.reconcile.reconcile_cron),
        ("LOCK_SWEEP_CRON", &config.reconcile.lock_sweep_cron),
    ] {
        Schedule::from_str(expression)
            .map_err(|e| anyhow::anyhow!("{} '{}' is invalid: {}", name, expression, e))?;
    }
    Ok(())
}
