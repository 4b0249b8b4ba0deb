//! Signal Sync Binary
//!
//! Runs one sync subscription against the configured backend, logs state
//! changes, and serves the local status endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin signal-sync
//! ```
//!
//! # Environment Variables
//!
//! - `SIGNAL_SYNC_BASE_URL`: Backend base address (default: <http://localhost:8000>)
//! - `SIGNAL_SYNC_HISTORY_LIMIT`: Snapshot size (default: 100)
//! - `SIGNAL_SYNC_REQUEST_TIMEOUT_SECS`: REST timeout (default: 10)
//! - `SIGNAL_SYNC_HEARTBEAT_INTERVAL_MS`: Ping interval (default: 15000)
//! - `SIGNAL_SYNC_RECONNECT_DELAY_INITIAL_MS`: First backoff (default: 1000)
//! - `SIGNAL_SYNC_RECONNECT_DELAY_MAX_MS`: Backoff cap (default: 10000)
//! - `SIGNAL_SYNC_STATUS_PORT`: Status HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use signal_sync::infrastructure::history::HistoryClient;
use signal_sync::{
    BackendConfig, LiveStreamConfig, SignalSync, StatusServer, StatusServerState, SyncConfig,
    SyncState, init_metrics, init_telemetry,
};
use tokio::signal;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    let _telemetry_guard = init_telemetry().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting signal sync");

    init_metrics().context("failed to install metrics recorder")?;

    let config = SyncConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let backend = BackendConfig::new(config.base_url.clone());
    let history = Arc::new(HistoryClient::new(backend.clone(), &config.history)?);

    match history.health().await {
        Ok(report) => tracing::info!(ok = report.ok, time = ?report.time, "Backend health"),
        Err(e) => tracing::warn!(error = %e, "Backend health check failed"),
    }

    let sync = SignalSync::new(
        backend,
        LiveStreamConfig::from_websocket_settings(&config.websocket),
        history,
    );
    let handle = sync.subscribe();
    let shutdown_token = CancellationToken::new();

    if config.server.status_port != 0 {
        let status_state = Arc::new(StatusServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            handle.subscribe_state(),
        ));
        let status_server = StatusServer::new(
            config.server.status_port,
            status_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = status_server.run().await {
                tracing::error!(error = %e, "Status server error");
            }
        });
    }

    let mut updates = handle.updates();
    let log_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        let mut previous: Option<SyncState> = None;
        loop {
            tokio::select! {
                () = log_cancel.cancelled() => break,
                next = updates.next() => match next {
                    Some(state) => {
                        log_state_change(previous.as_ref(), &state);
                        previous = Some(state);
                    }
                    None => break,
                },
            }
        }
    });

    await_shutdown(shutdown_token).await?;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Subscription did not stop in time"
        );
    }

    tracing::info!("Signal sync stopped");
    Ok(())
}

/// Log transitions that matter to an operator.
fn log_state_change(previous: Option<&SyncState>, state: &SyncState) {
    let was_connected = previous.is_some_and(|p| p.connected);
    let was_loading = previous.is_none_or(|p| p.loading);

    if state.connected != was_connected {
        tracing::info!(
            connected = state.connected,
            reconnect_attempt = state.reconnect_attempt,
            "Connection changed"
        );
    }
    if was_loading && !state.loading {
        tracing::info!(records = state.len(), "Initial records synchronized");
    }
    if previous.is_some_and(|p| p.len() != state.len())
        && let Some(latest) = state.latest()
    {
        tracing::info!(
            records = state.len(),
            id = %latest.id,
            kind = latest.kind.as_str(),
            price = latest.price,
            "Records updated"
        );
    }
}

/// Log the parsed configuration.
fn log_config(config: &SyncConfig) {
    tracing::info!(
        base_url = %config.base_url,
        history_limit = config.history.limit,
        status_port = config.server.status_port,
        "Configuration loaded"
    );
    match config.stream_url() {
        Ok(url) => tracing::debug!(stream_url = %url, "Live stream endpoint"),
        Err(e) => tracing::warn!(error = %e, "Live stream endpoint unresolvable"),
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    Ok(())
}
