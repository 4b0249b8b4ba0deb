#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::redundant_clone
    )
)]

//! Signal Sync - Real-Time Trading Signal Synchronization
//!
//! Keeps a locally consistent, time-ordered, deduplicated view of a remote
//! trading-signal feed. An initial REST snapshot is combined with a live
//! WebSocket stream that reconnects on its own after disconnection.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Records and the ordered timeline
//!   - `signal`: Signal types and the total normalizer
//!   - `timeline`: Ordering/dedup merge and the synchronized state
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Snapshot source interface
//!   - `services`: Subscription lifecycle (`SignalSync`, `SyncHandle`)
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `config`: Environment configuration and endpoint resolution
//!   - `feed`: Live stream state machine and WebSocket driver
//!   - `history`: REST snapshot client
//!   - `status`: Local status HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//! GET /history ──► HistoryClient ──┐
//!                                  ├──► normalize ──► merge ──► watch<SyncState> ──► observers
//! WS /ws/updates ──► LinkMachine ──┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Records and ordering rules with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::signal::{Signal, SignalId, SignalKind, normalize, normalize_at};
pub use domain::timeline::{SyncState, merge};

// Application
pub use application::ports::{FetchError, HistoryPage, SnapshotSource};
pub use application::services::{SignalSync, SyncHandle};

// Infrastructure config
pub use infrastructure::config::{
    BackendConfig, ConfigError, HistorySettings, ServerSettings, SyncConfig, WebSocketSettings,
    resolve_stream_url,
};

// Live stream
pub use infrastructure::feed::{ConnectionError, LiveStreamConfig, ParseError};

// History client
pub use infrastructure::history::{HealthReport, HistoryClient, HistoryPayload, LatestSnapshot};

// Status server
pub use infrastructure::status::{StatusServer, StatusServerError, StatusServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
