//! Dispatch Daemon - Main Entry Point
//!
//! Composition root: SQLite stores, HTTP submitter, queue processor and the
//! JSON-RPC admin server.

mod config;
mod telemetry;

use anyhow::{anyhow, Context, Result};
use config::{DaemonConfig, LogFormat};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use dispatch_api_rpc::{RpcHandler, RpcServer, RpcServerConfig};
use dispatch_core::application::{
    shutdown_channel, ClaimRecoveryService, InvoiceSubmissionService, QueueProcessor, RetryPolicy,
};
use dispatch_core::port::id_provider::UuidProvider;
use dispatch_core::port::time_provider::SystemTimeProvider;
use dispatch_infra_http::{HttpSubmitter, HttpSubmitterConfig};
use dispatch_infra_sqlite::{create_pool, run_migrations, SqliteQueueStore, SqliteRecordStore};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration
    let config = DaemonConfig::from_env()?;

    // 2. Logging (+ optional OTLP export)
    init_logging(config.log_format)?;

    info!("Dispatch daemon v{} starting...", VERSION);

    // 3. Database
    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    info!(db_path = %config.db_path, "Initializing database...");
    let pool = create_pool(&config.db_path)
        .await
        .map_err(|e| anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow!("Migration failed: {}", e))?;

    // 4. DI wiring
    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);
    let queue_store = Arc::new(SqliteQueueStore::new(pool.clone()));
    let record_store = Arc::new(SqliteRecordStore::new(pool.clone(), time_provider.clone()));

    let mut http_config =
        HttpSubmitterConfig::new(config.api_url.clone()).with_timeout(config.api_timeout);
    if let Some(token) = &config.api_token {
        http_config = http_config.with_token(token.clone());
    }
    let submitter = Arc::new(
        HttpSubmitter::new(http_config).map_err(|e| anyhow!("Submitter setup failed: {}", e))?,
    );

    let policy = Arc::new(
        RetryPolicy::new(config.retry.clone(), time_provider.clone())
            .map_err(|e| anyhow!("Invalid retry policy: {}", e))?,
    );

    // 5. Release claims left behind by a crash
    let recovery = ClaimRecoveryService::new(
        queue_store.clone(),
        time_provider.clone(),
        Some(config.stale_claim_ms),
    );
    match recovery.release_stale_claims().await {
        Ok(count) => info!(released = count, "Claim recovery completed"),
        Err(e) => error!(error = ?e, "Claim recovery failed"),
    }

    // 6. Use cases
    let processor = Arc::new(
        QueueProcessor::new(
            queue_store.clone(),
            record_store.clone(),
            submitter.clone(),
            policy.clone(),
            time_provider.clone(),
        )
        .with_batch_size(config.batch_size),
    );
    let submission = Arc::new(InvoiceSubmissionService::new(
        record_store,
        queue_store.clone(),
        submitter,
        policy,
        id_provider,
        time_provider,
    ));

    // 7. JSON-RPC server
    let rpc_config = RpcServerConfig {
        port: config.rpc_port,
        ..Default::default()
    };
    let handler = RpcHandler::new(submission, processor.clone(), queue_store);
    let (rpc_addr, rpc_handle) = RpcServer::new(rpc_config, handler)
        .start()
        .await
        .map_err(|e| anyhow!("RPC server start failed: {}", e))?;

    // 8. Queue processor loop
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let tick_interval = config.tick_interval;
    let processor_task = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.run(tick_interval, shutdown_rx).await })
    };

    info!(
        rpc_addr = %rpc_addr,
        api_url = %config.api_url,
        tick_secs = tick_interval.as_secs(),
        "System ready"
    );

    // 9. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    shutdown_tx.shutdown();
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server already stopped");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, processor_task).await.is_err() {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Queue pass still in flight at shutdown; its claims will be released on next start"
        );
    }

    telemetry::shutdown();
    info!("Shutdown complete.");

    Ok(())
}

fn init_logging(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("dispatch=info"))
        .map_err(|e| anyhow!("Failed to create env filter: {}", e))?;

    let otel = telemetry::otel_layer()?;
    let otel_enabled = otel.is_some();

    let fmt_layer = match format {
        // Production: JSON structured logging
        LogFormat::Json => fmt::layer().json().boxed(),
        // Development: pretty formatting with colors
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(otel)
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    match telemetry::endpoint() {
        Some(endpoint) if otel_enabled => info!(
            endpoint = %endpoint,
            service_name = %telemetry::service_name(),
            "OpenTelemetry export enabled"
        ),
        Some(_) => warn!("OTEL_EXPORTER_OTLP_ENDPOINT set but feature 'telemetry' not enabled"),
        None => {}
    }

    Ok(())
}
