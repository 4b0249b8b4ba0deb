//! Live Stream Client
//!
//! Async driver for [`LinkMachine`]. Owns the event channel, the socket
//! session task, the heartbeat task and the reconnect timer, and executes
//! the machine's commands against them.
//!
//! # Event Flow
//!
//! ```text
//! session task ──┐
//! heartbeat ─────┼──► mpsc<LinkEvent> ──► LinkMachine ──► commands ──► watch<SyncState>
//! reconnect ─────┤
//! owner ─────────┘
//! ```
//!
//! Only the dispatch loop touches the machine, so the record set needs no
//! lock. Every spawned task has its own `CancellationToken`.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::codec::PING_FRAME;
use super::heartbeat::{HeartbeatConfig, HeartbeatManager};
use super::machine::{LinkCommand, LinkEvent, LinkMachine, SessionId};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::timeline::SyncState;
use crate::infrastructure::config::{BackendConfig, ConfigError};
use crate::infrastructure::metrics;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CHANNEL_CAPACITY: usize = 8;
const SESSION_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Error Type
// =============================================================================

/// Transport failures of a live stream session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Stream address could not be resolved.
    #[error("cannot resolve stream address: {0}")]
    Config(#[from] ConfigError),

    /// WebSocket protocol or I/O failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The dispatch loop stopped listening.
    #[error("event channel closed")]
    ChannelClosed,
}

impl ConnectionError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::WebSocket(_) => "websocket",
            Self::ChannelClosed => "channel_closed",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Timer configuration for the live stream.
#[derive(Debug, Clone, Default)]
pub struct LiveStreamConfig {
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl LiveStreamConfig {
    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            heartbeat: HeartbeatConfig::from_websocket_settings(settings),
            reconnect: ReconnectConfig::from_websocket_settings(settings),
        }
    }
}

// =============================================================================
// Live Stream Client
// =============================================================================

/// Outbound frame requests for a session task.
#[derive(Debug, Clone, Copy)]
enum Outbound {
    Ping,
}

/// Handle to a running session task.
struct SessionHandle {
    id: SessionId,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Live stream connection driver.
pub struct LiveStreamClient {
    backend: BackendConfig,
    heartbeat_config: HeartbeatConfig,
    machine: LinkMachine,
    event_tx: mpsc::Sender<LinkEvent>,
    event_rx: mpsc::Receiver<LinkEvent>,
    pending: VecDeque<LinkEvent>,
    state_tx: watch::Sender<SyncState>,
    session: Option<SessionHandle>,
    heartbeat: Option<CancellationToken>,
    reconnect: Option<CancellationToken>,
}

impl LiveStreamClient {
    /// Create a driver publishing into `state_tx`.
    #[must_use]
    pub fn new(
        backend: BackendConfig,
        config: LiveStreamConfig,
        state_tx: watch::Sender<SyncState>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            heartbeat_config: config.heartbeat,
            machine: LinkMachine::new(ReconnectPolicy::new(config.reconnect)),
            event_tx,
            event_rx,
            pending: VecDeque::new(),
            state_tx,
            session: None,
            heartbeat: None,
            reconnect: None,
        }
    }

    /// Sender for injecting events (snapshot results, backfills).
    #[must_use]
    pub fn events(&self) -> mpsc::Sender<LinkEvent> {
        self.event_tx.clone()
    }

    /// Run the dispatch loop until `shutdown` is cancelled.
    ///
    /// Teardown cancels the reconnect timer and heartbeat, closes the active
    /// session, then waits for the session task to finish.
    pub async fn run(mut self, shutdown: CancellationToken) {
        self.pending.push_back(LinkEvent::Start);

        while !self.machine.is_stopped() {
            let event = if let Some(event) = self.pending.pop_front() {
                event
            } else {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => LinkEvent::Shutdown,
                    event = self.event_rx.recv() => event.unwrap_or(LinkEvent::Shutdown),
                }
            };
            self.dispatch(event);
        }

        self.event_rx.close();
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            if tokio::time::timeout(SESSION_JOIN_TIMEOUT, session.task).await.is_err() {
                tracing::warn!(session = %session.id, "Session task did not finish in time");
            }
        }
        tracing::info!("Live stream stopped");
    }

    fn dispatch(&mut self, event: LinkEvent) {
        if let LinkEvent::Closed { session } = &event
            && self.session.as_ref().is_some_and(|s| s.id == *session)
        {
            self.session = None;
        }

        for command in self.machine.handle(event) {
            self.execute(command);
        }
    }

    fn execute(&mut self, command: LinkCommand) {
        match command {
            LinkCommand::Connect(session) => self.connect(session),
            LinkCommand::CloseSession(session) => {
                if let Some(handle) = self.session.as_ref().filter(|s| s.id == session) {
                    handle.cancel.cancel();
                }
            }
            LinkCommand::SendPing(session) => {
                if let Some(handle) = self.session.as_ref().filter(|s| s.id == session) {
                    if handle.outbound.try_send(Outbound::Ping).is_ok() {
                        metrics::record_ping_sent();
                    } else {
                        tracing::debug!(session = %session, "Ping skipped, outbound queue full");
                    }
                }
            }
            LinkCommand::StartHeartbeat(session) => {
                let cancel = CancellationToken::new();
                replace_token(&mut self.heartbeat, Some(cancel.clone()));
                let manager = HeartbeatManager::new(
                    self.heartbeat_config.clone(),
                    session,
                    self.event_tx.clone(),
                    cancel,
                );
                tokio::spawn(manager.run());
            }
            LinkCommand::StopHeartbeat => replace_token(&mut self.heartbeat, None),
            LinkCommand::ScheduleReconnect(delay) => {
                let cancel = CancellationToken::new();
                replace_token(&mut self.reconnect, Some(cancel.clone()));
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        () = cancel.cancelled() => {}
                        () = tokio::time::sleep(delay) => {
                            let _ = event_tx.send(LinkEvent::ReconnectDue).await;
                        }
                    }
                });
            }
            LinkCommand::CancelReconnect => replace_token(&mut self.reconnect, None),
            LinkCommand::Publish => {
                self.state_tx.send_replace(self.machine.state().clone());
            }
            LinkCommand::PublishStatus => {
                let current = self.machine.state();
                self.state_tx
                    .send_modify(|published| published.sync_status_from(current));
            }
        }
    }

    fn connect(&mut self, session: SessionId) {
        if let Some(prior) = self.session.take() {
            tracing::debug!(session = %prior.id, "Closing prior session before connecting");
            prior.cancel.cancel();
        }

        let url = match self.backend.stream_url() {
            Ok(url) => url,
            Err(e) => {
                let error = ConnectionError::from(e);
                metrics::record_connection_error(error.kind());
                self.pending.push_back(LinkEvent::Errored {
                    session,
                    reason: error.to_string(),
                });
                self.pending.push_back(LinkEvent::Closed { session });
                return;
            }
        };

        tracing::info!(session = %session, url = %url, "Connecting to live stream");
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_session(
            session,
            url,
            self.event_tx.clone(),
            outbound_rx,
            cancel.clone(),
        ));

        self.session = Some(SessionHandle {
            id: session,
            outbound: outbound_tx,
            cancel,
            task,
        });
    }
}

fn replace_token(slot: &mut Option<CancellationToken>, next: Option<CancellationToken>) {
    if let Some(previous) = std::mem::replace(slot, next) {
        previous.cancel();
    }
}

// =============================================================================
// Session Task
// =============================================================================

/// Run one socket session and report exactly one `Closed` when it ends.
async fn run_session(
    session: SessionId,
    url: Url,
    events: mpsc::Sender<LinkEvent>,
    outbound: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) {
    if let Err(e) = session_loop(session, &url, &events, outbound, &cancel).await {
        metrics::record_connection_error(e.kind());
        let _ = events
            .send(LinkEvent::Errored {
                session,
                reason: e.to_string(),
            })
            .await;
    }
    let _ = events.send(LinkEvent::Closed { session }).await;
}

async fn session_loop(
    session: SessionId,
    url: &Url,
    events: &mpsc::Sender<LinkEvent>,
    mut outbound: mpsc::Receiver<Outbound>,
    cancel: &CancellationToken,
) -> Result<(), ConnectionError> {
    let (ws_stream, _response) = tokio::select! {
        () = cancel.cancelled() => return Ok(()),
        result = tokio_tungstenite::connect_async(url.as_str()) => result?,
    };

    events
        .send(LinkEvent::Opened { session })
        .await
        .map_err(|_| ConnectionError::ChannelClosed)?;

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(session = %session, "Closing session");
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            Some(frame) = outbound.recv() => match frame {
                Outbound::Ping => write.send(Message::text(PING_FRAME)).await?,
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let event = LinkEvent::Message {
                        session,
                        text: text.as_str().to_owned(),
                        received_at: Utc::now(),
                    };
                    events.send(event).await.map_err(|_| ConnectionError::ChannelClosed)?;
                }
                Some(Ok(Message::Ping(data))) => {
                    write.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(session = %session, ?frame, "Server sent close frame");
                    return Ok(());
                }
                Some(Ok(_)) => {
                    // Binary and pong frames carry nothing for us
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    tracing::info!(session = %session, "WebSocket stream ended");
                    return Ok(());
                }
            },
        }
    }
}
