//! Sync Configuration Settings
//!
//! Configuration types for the signal sync client, loaded from environment
//! variables, plus the shared backend address cell.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use url::Url;

use super::endpoint;

/// Backend used when `SIGNAL_SYNC_BASE_URL` is unset.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Largest page the history endpoint serves.
pub const MAX_HISTORY_LIMIT: u32 = 500;

/// Live stream connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Interval between `"ping"` text frames while open.
    pub heartbeat_interval: Duration,
    /// Delay before the first reconnection attempt.
    pub reconnect_delay_initial: Duration,
    /// Upper bound for any reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Attempt count after which the delay stops growing.
    pub reconnect_max_exponent: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(10),
            reconnect_delay_multiplier: 2.0,
            reconnect_max_exponent: 3,
        }
    }
}

/// History API settings.
#[derive(Debug, Clone)]
pub struct HistorySettings {
    /// Number of records requested by the initial snapshot.
    pub limit: u32,
    /// Timeout applied to every REST request.
    pub request_timeout: Duration,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            limit: 100,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Local server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Status HTTP port (0 = disabled).
    pub status_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { status_port: 8083 }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backend base address.
    pub base_url: Url,
    /// History API settings.
    pub history: HistorySettings,
    /// Live stream settings.
    pub websocket: WebSocketSettings,
    /// Local server settings.
    pub server: ServerSettings,
}

impl SyncConfig {
    /// Create configuration for a base address with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the base address is invalid.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: endpoint::parse_base_url(base_url)?,
            history: HistorySettings::default(),
            websocket: WebSocketSettings::default(),
            server: ServerSettings::default(),
        })
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `SIGNAL_SYNC_BASE_URL` is set but empty or invalid,
    /// or if any setting fails [`SyncConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = match std::env::var("SIGNAL_SYNC_BASE_URL") {
            Ok(value) if value.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("SIGNAL_SYNC_BASE_URL".to_string()));
            }
            Ok(value) => value,
            Err(_) => DEFAULT_BASE_URL.to_string(),
        };

        let history = HistorySettings {
            limit: parse_env_u32("SIGNAL_SYNC_HISTORY_LIMIT", HistorySettings::default().limit),
            request_timeout: parse_env_duration_secs(
                "SIGNAL_SYNC_REQUEST_TIMEOUT_SECS",
                HistorySettings::default().request_timeout,
            ),
        };

        let websocket = WebSocketSettings {
            heartbeat_interval: parse_env_duration_millis(
                "SIGNAL_SYNC_HEARTBEAT_INTERVAL_MS",
                WebSocketSettings::default().heartbeat_interval,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "SIGNAL_SYNC_RECONNECT_DELAY_INITIAL_MS",
                WebSocketSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_millis(
                "SIGNAL_SYNC_RECONNECT_DELAY_MAX_MS",
                WebSocketSettings::default().reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "SIGNAL_SYNC_RECONNECT_DELAY_MULTIPLIER",
                WebSocketSettings::default().reconnect_delay_multiplier,
            ),
            reconnect_max_exponent: parse_env_u32(
                "SIGNAL_SYNC_RECONNECT_MAX_EXPONENT",
                WebSocketSettings::default().reconnect_max_exponent,
            ),
        };

        let server = ServerSettings {
            status_port: parse_env_u16(
                "SIGNAL_SYNC_STATUS_PORT",
                ServerSettings::default().status_port,
            ),
        };

        let config = Self {
            base_url: endpoint::parse_base_url(&base_url)?,
            history,
            websocket,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting is usable by the history client and the
    /// live stream timers.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::OutOfRange` naming the first offending variable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limit = self.history.limit;
        if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
            return Err(ConfigError::out_of_range(
                "SIGNAL_SYNC_HISTORY_LIMIT",
                limit,
                "between 1 and 500",
            ));
        }
        if self.history.request_timeout.is_zero() {
            return Err(ConfigError::out_of_range(
                "SIGNAL_SYNC_REQUEST_TIMEOUT_SECS",
                0,
                "greater than 0",
            ));
        }

        let ws = &self.websocket;
        if ws.heartbeat_interval.is_zero() {
            return Err(ConfigError::out_of_range(
                "SIGNAL_SYNC_HEARTBEAT_INTERVAL_MS",
                0,
                "greater than 0",
            ));
        }
        if ws.reconnect_delay_initial.is_zero() {
            return Err(ConfigError::out_of_range(
                "SIGNAL_SYNC_RECONNECT_DELAY_INITIAL_MS",
                0,
                "greater than 0",
            ));
        }
        if ws.reconnect_delay_max < ws.reconnect_delay_initial {
            return Err(ConfigError::out_of_range(
                "SIGNAL_SYNC_RECONNECT_DELAY_MAX_MS",
                ws.reconnect_delay_max.as_millis(),
                "at least the initial delay",
            ));
        }
        if !ws.reconnect_delay_multiplier.is_finite() || ws.reconnect_delay_multiplier < 1.0 {
            return Err(ConfigError::out_of_range(
                "SIGNAL_SYNC_RECONNECT_DELAY_MULTIPLIER",
                ws.reconnect_delay_multiplier,
                "a finite number of at least 1.0",
            ));
        }
        Ok(())
    }

    /// Get the live stream URL for the configured base.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream address cannot be derived.
    pub fn stream_url(&self) -> Result<Url, ConfigError> {
        endpoint::stream_url_for(&self.base_url)
    }
}

// =============================================================================
// Shared Backend Address
// =============================================================================

/// Single owned cell holding the current backend base address.
///
/// Readers resolve endpoints from it at call time; it only changes through
/// [`BackendConfig::update_base_url`], which validates before storing.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    base_url: Arc<RwLock<Url>>,
}

impl BackendConfig {
    /// Create a cell holding an already validated base address.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url: Arc::new(RwLock::new(base_url)),
        }
    }

    /// Create a cell from a raw base address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn parse(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(endpoint::parse_base_url(base_url)?))
    }

    /// Current base address.
    #[must_use]
    pub fn base_url(&self) -> Url {
        self.base_url.read().clone()
    }

    /// Replace the base address. Invalid input leaves the current value in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the new address is invalid.
    pub fn update_base_url(&self, base_url: &str) -> Result<(), ConfigError> {
        let parsed = endpoint::parse_base_url(base_url)?;
        tracing::info!(base_url = %parsed, "Backend address updated");
        *self.base_url.write() = parsed;
        Ok(())
    }

    /// Live stream address for the current base.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream address cannot be derived.
    pub fn stream_url(&self) -> Result<Url, ConfigError> {
        endpoint::stream_url_for(&self.base_url.read())
    }

    /// History query address for the current base.
    #[must_use]
    pub fn history_url(&self, limit: u32, cursor: Option<&str>) -> Url {
        endpoint::history_url(&self.base_url.read(), limit, cursor)
    }

    /// Latest-signal address for the current base.
    #[must_use]
    pub fn latest_url(&self) -> Url {
        endpoint::latest_url(&self.base_url.read())
    }

    /// Health diagnostic address for the current base.
    #[must_use]
    pub fn health_url(&self) -> Url {
        endpoint::health_url(&self.base_url.read())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Base address could not be parsed.
    #[error("invalid base URL {value:?}: {reason}")]
    InvalidBaseUrl {
        /// Rejected input.
        value: String,
        /// Parser message.
        reason: String,
    },
    /// Base address uses a scheme other than http/https.
    #[error("unsupported base URL scheme: {0}")]
    UnsupportedScheme(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Setting is outside the range the client can run with.
    #[error("{key}={value} is out of range: expected {expected}")]
    OutOfRange {
        /// Environment variable holding the setting.
        key: &'static str,
        /// Rejected value.
        value: String,
        /// Accepted range.
        expected: &'static str,
    },
}

impl ConfigError {
    fn out_of_range(key: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::OutOfRange {
            key,
            value: value.to_string(),
            expected,
        }
    }
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_settings_defaults() {
        let settings = WebSocketSettings::default();
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(settings.reconnect_delay_initial, Duration::from_secs(1));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(10));
        assert!((settings.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.reconnect_max_exponent, 3);
    }

    #[test]
    fn history_settings_defaults() {
        let settings = HistorySettings::default();
        assert_eq!(settings.limit, 100);
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn sync_config_new_validates_base() {
        let config = SyncConfig::new("https://signals.example.com").unwrap();
        assert_eq!(
            config.stream_url().unwrap().as_str(),
            "wss://signals.example.com/ws/updates"
        );
        assert!(SyncConfig::new("nope").is_err());
    }

    fn out_of_range_key(config: &SyncConfig) -> &'static str {
        match config.validate() {
            Err(ConfigError::OutOfRange { key, .. }) => key,
            other => panic!("expected OutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn default_config_is_valid() {
        let config = SyncConfig::new(DEFAULT_BASE_URL).unwrap();
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn zero_heartbeat_interval_rejected() {
        let mut config = SyncConfig::new(DEFAULT_BASE_URL).unwrap();
        config.websocket.heartbeat_interval = Duration::ZERO;
        assert_eq!(out_of_range_key(&config), "SIGNAL_SYNC_HEARTBEAT_INTERVAL_MS");
    }

    #[test]
    fn zero_initial_reconnect_delay_rejected() {
        let mut config = SyncConfig::new(DEFAULT_BASE_URL).unwrap();
        config.websocket.reconnect_delay_initial = Duration::ZERO;
        assert_eq!(out_of_range_key(&config), "SIGNAL_SYNC_RECONNECT_DELAY_INITIAL_MS");
    }

    #[test]
    fn reconnect_max_below_initial_rejected() {
        let mut config = SyncConfig::new(DEFAULT_BASE_URL).unwrap();
        config.websocket.reconnect_delay_max = Duration::from_millis(500);
        assert_eq!(out_of_range_key(&config), "SIGNAL_SYNC_RECONNECT_DELAY_MAX_MS");
    }

    #[test]
    fn shrinking_multiplier_rejected() {
        let mut config = SyncConfig::new(DEFAULT_BASE_URL).unwrap();
        config.websocket.reconnect_delay_multiplier = 0.5;
        assert_eq!(out_of_range_key(&config), "SIGNAL_SYNC_RECONNECT_DELAY_MULTIPLIER");

        config.websocket.reconnect_delay_multiplier = f64::NAN;
        assert_eq!(out_of_range_key(&config), "SIGNAL_SYNC_RECONNECT_DELAY_MULTIPLIER");
    }

    #[test]
    fn history_limit_must_fit_backend_page() {
        let mut config = SyncConfig::new(DEFAULT_BASE_URL).unwrap();

        config.history.limit = 0;
        assert_eq!(out_of_range_key(&config), "SIGNAL_SYNC_HISTORY_LIMIT");

        config.history.limit = MAX_HISTORY_LIMIT + 1;
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "SIGNAL_SYNC_HISTORY_LIMIT=501 is out of range: expected between 1 and 500"
        );

        config.history.limit = MAX_HISTORY_LIMIT;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_request_timeout_rejected() {
        let mut config = SyncConfig::new(DEFAULT_BASE_URL).unwrap();
        config.history.request_timeout = Duration::ZERO;
        assert_eq!(out_of_range_key(&config), "SIGNAL_SYNC_REQUEST_TIMEOUT_SECS");
    }

    #[test]
    fn backend_config_update_switches_endpoints() {
        let backend = BackendConfig::parse("http://localhost:8000").unwrap();
        assert_eq!(backend.stream_url().unwrap().as_str(), "ws://localhost:8000/ws/updates");

        backend.update_base_url("https://prod.example.com").unwrap();
        assert_eq!(backend.stream_url().unwrap().as_str(), "wss://prod.example.com/ws/updates");
        assert_eq!(backend.health_url().as_str(), "https://prod.example.com/health");
    }

    #[test]
    fn backend_config_rejects_invalid_update() {
        let backend = BackendConfig::parse("http://localhost:8000").unwrap();
        let clone = backend.clone();

        assert!(backend.update_base_url("::::").is_err());
        assert_eq!(clone.base_url().as_str(), "http://localhost:8000/");
    }

    #[test]
    fn clones_share_the_cell() {
        let backend = BackendConfig::parse("http://a.example").unwrap();
        let reader = backend.clone();
        backend.update_base_url("http://b.example").unwrap();
        assert_eq!(reader.latest_url().as_str(), "http://b.example/latest");
    }
}
