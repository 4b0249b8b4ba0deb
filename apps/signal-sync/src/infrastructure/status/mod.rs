//! Status and Metrics Endpoint
//!
//! Local HTTP view of the synchronized state for collaborators that only
//! read it (dashboards, probes, scrapers).
//!
//! # Endpoints
//!
//! - `GET /status` - JSON sync status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (200 while the live stream is open)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::signal::Signal;
use crate::domain::timeline::SyncState;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Status Response Types
// =============================================================================

/// Status response.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Client version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether the live stream is open.
    pub connected: bool,
    /// Whether no snapshot or bootstrap has arrived yet.
    pub loading: bool,
    /// Number of records held.
    pub records: usize,
    /// Most recent record.
    pub latest: Option<Signal>,
    /// Last heartbeat acknowledgement.
    pub last_pong_at: Option<DateTime<Utc>>,
    /// Consecutive reconnect attempts.
    pub reconnect_attempt: u32,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Live stream open.
    Healthy,
    /// Disconnected, but serving previously synchronized records.
    Degraded,
    /// Disconnected with nothing loaded.
    Unhealthy,
}

impl HealthStatus {
    /// Derive the status from a sync state.
    #[must_use]
    pub const fn of(state: &SyncState) -> Self {
        if state.connected {
            Self::Healthy
        } else if state.loading {
            Self::Unhealthy
        } else {
            Self::Degraded
        }
    }
}

// =============================================================================
// Status Server
// =============================================================================

/// Shared state for the status server.
pub struct StatusServerState {
    version: String,
    started_at: Instant,
    sync_state: watch::Receiver<SyncState>,
}

impl StatusServerState {
    /// Create new status server state.
    #[must_use]
    pub fn new(version: String, sync_state: watch::Receiver<SyncState>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            sync_state,
        }
    }
}

/// Status HTTP server.
pub struct StatusServer {
    port: u16,
    state: Arc<StatusServerState>,
    cancel: CancellationToken,
}

impl StatusServer {
    /// Create a new status server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<StatusServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StatusServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), StatusServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StatusServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StatusServerError` if the HTTP server fails while running.
    pub async fn serve(self, listener: TcpListener) -> Result<(), StatusServerError> {
        let app = Router::new()
            .route("/status", get(status_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "Status server listening");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| StatusServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Status server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn status_handler(State(state): State<Arc<StatusServerState>>) -> impl IntoResponse {
    let response = build_status_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<StatusServerState>>) -> impl IntoResponse {
    if state.sync_state.borrow().connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_status_response(state: &StatusServerState) -> StatusResponse {
    let sync = state.sync_state.borrow().clone();

    StatusResponse {
        status: HealthStatus::of(&sync),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connected: sync.connected,
        loading: sync.loading,
        records: sync.len(),
        latest: sync.latest().cloned(),
        last_pong_at: sync.last_pong_at,
        reconnect_attempt: sync.reconnect_attempt,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Status server errors.
#[derive(Debug, thiserror::Error)]
pub enum StatusServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
