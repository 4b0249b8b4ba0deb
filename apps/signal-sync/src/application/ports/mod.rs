//! Port Interfaces
//!
//! Contracts the sync service depends on, implemented by infrastructure
//! adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SnapshotSource`: Bounded retrieval of historical records

use async_trait::async_trait;

use crate::domain::signal::Signal;

/// Snapshot retrieval failure.
///
/// Recovered locally by the sync service: logged, never retried
/// automatically, and the live stream starts regardless.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Request could not be sent or the connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Server answered with a non-success status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Body is not valid JSON or has wrongly typed fields.
    #[error("malformed response body: {0}")]
    Decode(String),

    /// Body is JSON but neither a record array nor an `items` envelope.
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(&'static str),
}

/// One page of historical records, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    /// Normalized, ordered and deduplicated records.
    pub records: Vec<Signal>,
    /// Cursor for the next older page, if the server provided one.
    pub next_cursor: Option<String>,
}

/// Port for loading historical records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Load the most recent bounded batch of records.
    async fn load_initial(&self) -> Result<Vec<Signal>, FetchError>;

    /// Load records strictly older than `cursor` (newest page when `None`).
    async fn load_page(&self, cursor: Option<String>) -> Result<HistoryPage, FetchError>;
}
