//! Configuration Module
//!
//! Configuration loading, the shared backend address cell, and endpoint
//! resolution for the sync client.

pub mod endpoint;
mod settings;

pub use endpoint::{
    STREAM_PATH, health_url, history_url, latest_url, parse_base_url, resolve_stream_url,
};
pub use settings::{
    BackendConfig, ConfigError, DEFAULT_BASE_URL, HistorySettings, ServerSettings, SyncConfig,
    WebSocketSettings,
};
