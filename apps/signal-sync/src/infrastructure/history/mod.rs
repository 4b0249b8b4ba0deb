//! History REST Client
//!
//! Snapshot loading and backend diagnostics over HTTP.
//!
//! | Request | Response |
//! |---|---|
//! | `GET /history?limit=N[&cursor=C]` | `Record[]` or `{items, next_cursor}` |
//! | `GET /latest` | `{last_price, last_signal}` |
//! | `GET /health` | `{ok, time}` |
//!
//! Addresses are resolved from [`BackendConfig`] on every request, so a base
//! address update applies to the next call.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use url::Url;

use crate::application::ports::{FetchError, HistoryPage, SnapshotSource};
use crate::domain::signal::{Signal, coerce_finite, normalize_at, parse_timestamp};
use crate::domain::timeline::merge;
use crate::infrastructure::config::{BackendConfig, HistorySettings};
use crate::infrastructure::metrics::{self, FetchOutcome};

// =============================================================================
// Response Shapes
// =============================================================================

/// Detected shape of a `/history` response body.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryPayload {
    /// A bare array of raw records.
    Bare(Vec<Value>),
    /// An object carrying `items` and an optional cursor.
    Envelope {
        /// Raw records.
        items: Vec<Value>,
        /// Cursor for the next older page.
        next_cursor: Option<String>,
    },
}

impl HistoryPayload {
    /// Classify a response body.
    ///
    /// The envelope cursor is read from `next_cursor`, falling back to
    /// `cursor`. A non-string cursor is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::UnexpectedShape` for anything other than an array
    /// or an object whose `items` is an array.
    pub fn detect(body: Value) -> Result<Self, FetchError> {
        match body {
            Value::Array(items) => Ok(Self::Bare(items)),
            Value::Object(mut fields) => {
                let Some(Value::Array(items)) = fields.remove("items") else {
                    return Err(FetchError::UnexpectedShape("object without an items array"));
                };
                let next_cursor = ["next_cursor", "cursor"]
                    .iter()
                    .find_map(|key| fields.get(*key).and_then(Value::as_str))
                    .map(str::to_owned);
                Ok(Self::Envelope { items, next_cursor })
            }
            _ => Err(FetchError::UnexpectedShape("expected an array or an object")),
        }
    }

    /// Normalize and order the records, keeping the cursor.
    #[must_use]
    pub fn into_page(self, captured_at: DateTime<Utc>) -> HistoryPage {
        let (items, next_cursor) = match self {
            Self::Bare(items) => (items, None),
            Self::Envelope { items, next_cursor } => (items, next_cursor),
        };
        let records = merge(&[], items.iter().map(|raw| normalize_at(raw, captured_at)));
        HistoryPage {
            records,
            next_cursor,
        }
    }
}

/// Most recent price and signal reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestSnapshot {
    /// Last traded price (0 when the backend has no data).
    pub last_price: f64,
    /// Most recent signal, if any.
    pub last_signal: Option<Signal>,
}

/// Backend health diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Whether the backend reports itself healthy.
    pub ok: bool,
    /// Backend clock reading, if parseable.
    pub time: Option<DateTime<Utc>>,
}

// =============================================================================
// History Client
// =============================================================================

/// HTTP adapter for the backend's REST API.
#[derive(Debug, Clone)]
pub struct HistoryClient {
    client: Client,
    backend: BackendConfig,
    limit: u32,
}

impl HistoryClient {
    /// Create a client with the configured request timeout and page size.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(backend: BackendConfig, settings: &HistorySettings) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            backend,
            limit: settings.limit,
        })
    }

    /// Fetch one page of records older than `cursor`.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` on transport failure, non-2xx status, malformed
    /// body or unexpected shape.
    pub async fn fetch_page(&self, cursor: Option<&str>) -> Result<HistoryPage, FetchError> {
        let url = self.backend.history_url(self.limit, cursor);
        let started = Instant::now();
        let result = self
            .get_json(url)
            .await
            .and_then(HistoryPayload::detect)
            .map(|payload| payload.into_page(Utc::now()));

        let outcome = if result.is_ok() {
            FetchOutcome::Success
        } else {
            FetchOutcome::Failure
        };
        metrics::record_snapshot_fetch(outcome, started.elapsed());

        if let Ok(page) = &result {
            tracing::debug!(
                count = page.records.len(),
                next_cursor = ?page.next_cursor,
                "History page loaded"
            );
        }
        result
    }

    /// Fetch the backend's latest price and signal.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` on transport failure, non-2xx status or a body
    /// that is not an object.
    pub async fn latest(&self) -> Result<LatestSnapshot, FetchError> {
        let body = self.get_json(self.backend.latest_url()).await?;
        let Value::Object(fields) = body else {
            return Err(FetchError::UnexpectedShape("expected an object"));
        };

        let last_signal = match fields.get("last_signal") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(normalize_at(raw, Utc::now())),
        };

        Ok(LatestSnapshot {
            last_price: coerce_finite(fields.get("last_price")),
            last_signal,
        })
    }

    /// Ping the backend health endpoint.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` on transport failure, non-2xx status or a body
    /// that is not an object.
    pub async fn health(&self) -> Result<HealthReport, FetchError> {
        let body = self.get_json(self.backend.health_url()).await?;
        let Value::Object(fields) = body else {
            return Err(FetchError::UnexpectedShape("expected an object"));
        };

        Ok(HealthReport {
            ok: fields.get("ok").and_then(Value::as_bool).unwrap_or(false),
            time: fields
                .get("time")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
        })
    }

    async fn get_json(&self, url: Url) -> Result<Value, FetchError> {
        tracing::debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SnapshotSource for HistoryClient {
    async fn load_initial(&self) -> Result<Vec<Signal>, FetchError> {
        self.fetch_page(None).await.map(|page| page.records)
    }

    async fn load_page(&self, cursor: Option<String>) -> Result<HistoryPage, FetchError> {
        self.fetch_page(cursor.as_deref()).await
    }
}
