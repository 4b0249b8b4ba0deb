//! Application Services
//!
//! The subscription service: one snapshot load followed by the live stream,
//! with the synchronized state published to any number of observers.

use std::sync::Arc;

use chrono::SecondsFormat;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::application::ports::{FetchError, SnapshotSource};
use crate::domain::timeline::SyncState;
use crate::infrastructure::config::{BackendConfig, ConfigError, SyncConfig};
use crate::infrastructure::feed::{LinkEvent, LiveStreamClient, LiveStreamConfig};
use crate::infrastructure::history::HistoryClient;

// =============================================================================
// Signal Sync
// =============================================================================

/// Factory for sync subscriptions sharing one backend configuration.
pub struct SignalSync {
    backend: BackendConfig,
    stream: LiveStreamConfig,
    source: Arc<dyn SnapshotSource>,
}

impl SignalSync {
    /// Create a service over an explicit backend cell and snapshot source.
    #[must_use]
    pub fn new(
        backend: BackendConfig,
        stream: LiveStreamConfig,
        source: Arc<dyn SnapshotSource>,
    ) -> Self {
        Self {
            backend,
            stream,
            source,
        }
    }

    /// Create a service backed by the REST history client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &SyncConfig) -> Result<Self, FetchError> {
        let backend = BackendConfig::new(config.base_url.clone());
        let history = HistoryClient::new(backend.clone(), &config.history)?;
        Ok(Self::new(
            backend,
            LiveStreamConfig::from_websocket_settings(&config.websocket),
            Arc::new(history),
        ))
    }

    /// Shared backend configuration.
    #[must_use]
    pub const fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    /// Start a subscription: load the snapshot, then run the live stream.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn subscribe(&self) -> SyncHandle {
        let (state_tx, state_rx) = watch::channel(SyncState::default());
        let client = LiveStreamClient::new(self.backend.clone(), self.stream.clone(), state_tx);
        let events = client.events();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_subscription(
            Arc::clone(&self.source),
            client,
            events.clone(),
            cancel.clone(),
        ));

        SyncHandle {
            state_rx,
            events,
            backend: self.backend.clone(),
            source: Arc::clone(&self.source),
            cancel: cancel.clone(),
            task,
            _drop_guard: cancel.drop_guard(),
        }
    }
}

async fn run_subscription(
    source: Arc<dyn SnapshotSource>,
    client: LiveStreamClient,
    events: mpsc::Sender<LinkEvent>,
    cancel: CancellationToken,
) {
    let loaded = tokio::select! {
        () = cancel.cancelled() => return,
        result = source.load_initial() => result,
    };

    match loaded {
        Ok(records) => {
            tracing::info!(count = records.len(), "Initial snapshot loaded");
            let _ = events.send(LinkEvent::SnapshotLoaded { records }).await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Initial snapshot failed, continuing with live stream");
        }
    }

    client.run(cancel).await;
}

// =============================================================================
// Sync Handle
// =============================================================================

/// Owner of one running subscription. Dropping it cancels the subscription.
pub struct SyncHandle {
    state_rx: watch::Receiver<SyncState>,
    events: mpsc::Sender<LinkEvent>,
    backend: BackendConfig,
    source: Arc<dyn SnapshotSource>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _drop_guard: DropGuard,
}

impl SyncHandle {
    /// Snapshot of the current synchronized state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state_rx.borrow().clone()
    }

    /// Receiver notified on every published state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    /// Stream of states, starting with the current one.
    #[must_use]
    pub fn updates(&self) -> WatchStream<SyncState> {
        WatchStream::new(self.state_rx.clone())
    }

    /// Shared backend configuration.
    #[must_use]
    pub const fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    /// Point the subscription at a new backend. Takes effect on the next
    /// connect; the current session is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid; the previous address stays.
    pub fn update_base_url(&self, base_url: &str) -> Result<(), ConfigError> {
        self.backend.update_base_url(base_url)
    }

    /// Fetch the page of records older than the oldest one held and merge it.
    ///
    /// Returns the number of records fetched.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` if the page cannot be retrieved.
    pub async fn backfill(&self) -> Result<usize, FetchError> {
        let cursor = self
            .state_rx
            .borrow()
            .oldest()
            .map(|s| s.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true));

        let page = self.source.load_page(cursor).await?;
        let count = page.records.len();
        if count > 0 {
            let event = LinkEvent::Backfilled {
                records: page.records,
            };
            if self.events.send(event).await.is_err() {
                tracing::debug!("Subscription stopped, backfill discarded");
            }
        }
        Ok(count)
    }

    /// Check whether the subscription task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Tear down: cancel timers, close the session, and wait for the task.
    pub async fn shutdown(self) {
        let Self { cancel, task, .. } = self;
        cancel.cancel();
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Subscription task failed");
        }
    }
}
