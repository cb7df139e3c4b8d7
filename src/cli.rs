use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use order_reconciler::config::Config;
use order_reconciler::services::Trigger;
use order_reconciler::AppState;

#[derive(Parser)]
#[command(name = "order-reconciler")]
#[command(about = "Order Reconciler - turns paid transactions into provider orders", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and the scheduled jobs (default)
    Serve,

    /// Run one reconciliation tick and exit
    Tick,

    /// Delete expired processing locks
    ClearLocks,

    /// Process one transaction now
    Process {
        /// Transaction UUID
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,

        /// Also process transactions in error or already processed
        #[arg(long)]
        force: bool,
    },

    /// Drop a processing lock regardless of owner
    ForceUnlock {
        /// Transaction UUID
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,

        /// Repeat the transaction id to confirm
        #[arg(long, value_name = "TX_ID")]
        confirm: String,
    },

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn handle_tick(state: &AppState) -> anyhow::Result<()> {
    let report = state.reconciler.tick(Utc::now()).await;
    print_json(&report)?;
    if report.errors > 0 {
        anyhow::bail!("tick finished with {} error(s)", report.errors);
    }
    Ok(())
}

pub async fn handle_clear_locks(state: &AppState) -> anyhow::Result<()> {
    let removed = state.processor.locks().clear_expired().await?;
    println!("✓ Removed {} expired lock(s)", removed);
    Ok(())
}

pub async fn handle_process(state: &AppState, tx_id: Uuid, force: bool) -> anyhow::Result<()> {
    let result = if force {
        state
            .admin
            .force_reprocess(tx_id, "cli", Some("forced from command line"))
            .await?
    } else {
        state.processor.process(tx_id, Trigger::Cli, false).await?
    };
    print_json(&result)?;
    if !result.success {
        anyhow::bail!(
            "transaction {} was not processed: {}",
            tx_id,
            result.error.as_deref().unwrap_or("see outcome")
        );
    }
    Ok(())
}

pub async fn handle_force_unlock(state: &AppState, tx_id: Uuid, confirm: &str) -> anyhow::Result<()> {
    let removed = state
        .admin
        .force_unlock(tx_id, "cli", confirm)
        .await
        .context("force unlock failed")?;
    if removed {
        println!("✓ Lock on {} removed", tx_id);
    } else {
        println!("No lock held on {}", tx_id);
    }
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = order_reconciler::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    order_reconciler::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Payment API URL: {}", config.payment_api_url);
    println!("  Admin key set: {}", config.admin_api_key.is_some());
    println!("  Worker: {}", config.reconcile.worker_id);
    println!(
        "  Attempts cap: {}, lock TTL: {}s, payment deadline: {}m",
        config.reconcile.max_processing_attempts,
        config.reconcile.lock_ttl_secs,
        config.reconcile.payment_deadline_mins
    );
    println!(
        "  Schedules: reconcile '{}', lock sweep '{}'",
        config.reconcile.reconcile_cron, config.reconcile.lock_sweep_cron
    );

    let report = order_reconciler::startup::validate_environment(config, None).await;
    report.print();
    if !report.is_valid() {
        anyhow::bail!("configuration is invalid");
    }
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
