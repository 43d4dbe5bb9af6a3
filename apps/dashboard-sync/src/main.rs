//! Dashboard Sync Binary
//!
//! Starts the sync runtime and the local snapshot server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin dashboard-sync
//! ```
//!
//! # Environment Variables
//!
//! All optional. The most common:
//! - `BROKER_BASE_URL`: broker service (default: <http://localhost:8000>)
//! - `MARKET_DATA_BASE_URL`: market data service (default: <http://localhost:8002>)
//! - `NOTIFICATION_BASE_URL`: notification service (default: <http://localhost:8003>)
//! - `NOTIFICATION_TOKEN`: opaque token for the notification service
//! - `QUOTE_SYMBOLS`: comma separated symbols (default: AAPL,MSFT,SPY)
//! - `SNAPSHOT_PORT`: snapshot/health HTTP port (default: 8090)
//! - `OTEL_ENABLED`: export spans over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: `dashboard_sync=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dashboard_sync::infrastructure::telemetry;
use dashboard_sync::{SnapshotServer, SnapshotSource, SyncConfig, SyncRuntime, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize tracing")?;

    tracing::info!("Starting dashboard sync");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed; /metrics disabled");
    }

    let config = SyncConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let runtime = Arc::new(SyncRuntime::new(config).context("failed to build sync runtime")?);
    let shutdown_token = runtime.shutdown_token();

    let server = SnapshotServer::new(
        runtime.config().snapshot_port,
        Arc::clone(&runtime) as Arc<dyn SnapshotSource>,
        shutdown_token.clone(),
    );
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Snapshot server error");
        }
    });

    runtime.start();
    tracing::info!("Dashboard sync ready");

    await_shutdown(&shutdown_token).await;

    runtime.shutdown(SHUTDOWN_TIMEOUT).await;
    if let Err(e) = server_task.await {
        tracing::warn!(error = %e, "Snapshot server task failed");
    }

    tracing::info!("Dashboard sync stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &SyncConfig) {
    tracing::info!(
        symbols = ?config.feeds.quote_symbols,
        snapshot_port = config.snapshot_port,
        event_log_capacity = config.event_log_capacity,
        notification_capacity = config.notifications.capacity,
        watchdog = config.feeds.watchdog.is_enabled(),
        "Configuration loaded"
    );
    tracing::debug!(
        order_feed = %config.services.order_feed(),
        notification_list = %config.services.notification_list(),
        "Upstream endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for Ctrl+C or SIGTERM, or for the runtime to be cancelled elsewhere.
async fn await_shutdown(shutdown_token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {}
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
