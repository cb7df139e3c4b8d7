mod cli;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands, DbCommands};
use order_reconciler::adapters::PostgresStore;
use order_reconciler::config::{Config, LogFormat};
use order_reconciler::provider::ProviderRouter;
use order_reconciler::services::{HttpPaymentGateway, JobScheduler, LockSweepJob, ReconcileJob};
use order_reconciler::{create_app, db, startup, AppState};

fn init_tracing(format: LogFormat) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn build_state(config: &Config) -> anyhow::Result<(AppState, sqlx::PgPool)> {
    let pool = db::create_pool(config).await?;
    let store = Arc::new(PostgresStore::new(pool.clone()));

    let router = Arc::new(ProviderRouter::new(config.reconcile.provider_timeout()));
    router.refresh(store.as_ref()).await?;

    let gateway = Arc::new(HttpPaymentGateway::new(
        config.payment_api_url.clone(),
        config.payment_api_token.clone(),
    ));

    let state = AppState::new(
        store,
        router,
        gateway,
        config.reconcile.clone(),
        config.admin_api_key.clone(),
    );
    Ok((state, pool))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let (state, pool) = build_state(config).await?;
    db::run_migrations(&pool).await?;

    let report = startup::validate_environment(config, Some(state.store.as_ref())).await;
    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }
    if !report.is_valid() {
        report.print();
        anyhow::bail!("startup validation failed");
    }

    let mut scheduler = JobScheduler::with_board(state.jobs.clone());
    scheduler
        .add_job(
            Arc::new(ReconcileJob::new(state.reconciler.clone())),
            &config.reconcile.reconcile_cron,
        )
        .await?;
    scheduler
        .add_job(
            Arc::new(LockSweepJob::new(state.processor.clone())),
            &config.reconcile.lock_sweep_cron,
        )
        .await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = scheduler.start(shutdown_rx);

    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!(%addr, worker_id = %config.reconcile.worker_id, "listening");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for job in jobs {
        if let Err(e) = job.await {
            tracing::error!(error = %e, "Scheduled job ended abnormally");
        }
    }
    tracing::info!("Server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config).await,
        Commands::Config => cli::handle_config_validate(&config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Tick => {
            let (state, _) = build_state(&config).await?;
            cli::handle_tick(&state).await
        }
        Commands::ClearLocks => {
            let (state, _) = build_state(&config).await?;
            cli::handle_clear_locks(&state).await
        }
        Commands::Process { tx_id, force } => {
            let (state, _) = build_state(&config).await?;
            cli::handle_process(&state, tx_id, force).await
        }
        Commands::ForceUnlock { tx_id, confirm } => {
            let (state, _) = build_state(&config).await?;
            cli::handle_force_unlock(&state, tx_id, &confirm).await
        }
    }
}
