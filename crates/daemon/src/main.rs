//! jobq daemon — composition root (ADR-001).
//!
//! Wires the SQLite Record Store Adapter, the Scheduler, the Permission
//! Gate, the RPC server and the retention sweep together, runs the startup
//! recovery sweep, and drives graceful shutdown on `ctrl_c`.

mod telemetry;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobq_api_rpc::server::{CollectionEndpoint, RpcServerConfig};
use jobq_api_rpc::RpcServer;
use jobq_core::application::{MaintenanceScheduler, PermissionGate, RecoveryService, Rule, Scheduler, SchedulerConfig};
use jobq_core::application::gate::tag;
use jobq_core::port::id_provider::UuidProvider;
use jobq_core::port::time_provider::SystemTimeProvider;
use jobq_core::port::MaintenanceConfig;
use jobq_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository, SqliteMaintenance};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "~/.jobq/jobq.db";
const DEFAULT_COLLECTION: &str = "default";

fn env_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_format = std::env::var("JOBQ_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("jobq=info"))
        .expect("failed to create env filter");

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("jobq daemon v{} starting...", VERSION);

    if let Err(e) = telemetry::init_telemetry() {
        tracing::warn!(error = ?e, "failed to initialize OpenTelemetry (continuing without it)");
    }

    let db_path = std::env::var("JOBQ_DB_PATH")
        .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());
    let rpc_host = std::env::var("JOBQ_RPC_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let rpc_port: u16 = env_var("JOBQ_RPC_PORT", 9527);
    let promotion_interval_ms: u64 = env_var("JOBQ_PROMOTION_INTERVAL_MS", 15_000);
    let retention_days: i64 = env_var("JOBQ_RETENTION_DAYS", 0);
    let rate_limit_burst: u32 = env_var("JOBQ_RATE_LIMIT_BURST", 200);
    let rate_limit_rate: u32 = env_var("JOBQ_RATE_LIMIT_RATE", 100);

    info!(db_path = %db_path, "initializing database...");

    let pool = create_pool(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {e}"))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;

    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);
    let job_repo = Arc::new(SqliteJobRepository::new(pool.clone()));

    info!("running startup recovery sweep...");
    let recovery = RecoveryService::new(job_repo.clone(), time_provider.clone());
    match recovery.recover(DEFAULT_COLLECTION).await {
        Ok(recovered) => info!(recovered_jobs = recovered.len(), "recovery sweep completed"),
        Err(e) => tracing::error!(error = ?e, "recovery sweep failed"),
    }

    let scheduler_config = SchedulerConfig {
        collection: DEFAULT_COLLECTION.to_string(),
        promotion_interval_ms,
        ..Default::default()
    };
    let scheduler = Arc::new(Scheduler::new(
        job_repo.clone(),
        time_provider.clone(),
        id_provider.clone(),
        scheduler_config,
    ));
    scheduler.start_jobs();
    let _promotion_handle = scheduler.spawn_promotion_loop();

    // Default gate: wide open. Operators wire real rules by replacing this
    // composition root's `PermissionGate` construction for their deployment.
    let mut gate = PermissionGate::new();
    gate.allow(tag::ADMIN, Rule::predicate(|_, _, _| true));
    let gate = Arc::new(gate);

    info!("starting JSON-RPC server...");
    let rpc_config = RpcServerConfig {
        host: rpc_host,
        port: rpc_port,
        rate_limit_burst,
        rate_limit_rate,
    };
    let rpc_server = RpcServer::new(
        rpc_config,
        time_provider.clone(),
        vec![CollectionEndpoint {
            scheduler: scheduler.clone(),
            gate,
        }],
    );
    let rpc_handle = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {e}"))?;

    info!("starting retention sweep...");
    let maintenance = Arc::new(SqliteMaintenance::new(pool.clone(), time_provider.clone()));
    let maintenance_config = MaintenanceConfig {
        finished_job_retention_days: retention_days,
        ..Default::default()
    };
    let maintenance_scheduler = MaintenanceScheduler::new(maintenance, maintenance_config, 24);
    tokio::spawn(async move {
        maintenance_scheduler.run().await;
    });

    info!("system ready, waiting for jobs. Press Ctrl+C to shut down.");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, exiting gracefully...");

    scheduler
        .stop_jobs(Some(std::time::Duration::from_secs(5)))
        .await
        .map_err(|e| anyhow::anyhow!("stop_jobs failed: {e}"))?;
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {e}"))?;

    info!("shutdown complete.");
    Ok(())
}
