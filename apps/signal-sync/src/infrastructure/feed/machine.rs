//! Live Stream State Machine
//!
//! All connection and record-set transitions, with no I/O. The driver feeds
//! [`LinkEvent`]s in arrival order and executes the returned
//! [`LinkCommand`]s.
//!
//! ```text
//!  Disconnected ──Start──► Connecting(s) ──Opened──► Open(s)
//!       ▲                      │                       │
//!       │                   Errored                 Errored
//!       │                      ▼                       ▼
//!       └──────Closed─────  Closing(s) ◄───────────────┘
//!   (reconnect scheduled)
//!
//!  any ──Shutdown──► Stopped
//! ```
//!
//! Every connect attempt gets a fresh [`SessionId`]; events tagged with any
//! other session are stale and ignored.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::codec::{self, FeedMessage};
use super::reconnect::ReconnectPolicy;
use crate::domain::signal::{Signal, normalize_at};
use crate::domain::timeline::SyncState;
use crate::infrastructure::metrics;

// =============================================================================
// Events and Commands
// =============================================================================

/// Identifier of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw session number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw session number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Begin connecting.
    Start,
    /// Session handshake completed.
    Opened {
        /// Session that opened.
        session: SessionId,
    },
    /// Text frame received.
    Message {
        /// Receiving session.
        session: SessionId,
        /// Raw frame text.
        text: String,
        /// Receipt time, used as the fallback record timestamp.
        received_at: DateTime<Utc>,
    },
    /// Transport failure on a session.
    Errored {
        /// Failing session.
        session: SessionId,
        /// Human-readable cause.
        reason: String,
    },
    /// Session ended. Sent exactly once per session.
    Closed {
        /// Ended session.
        session: SessionId,
    },
    /// Heartbeat interval elapsed.
    HeartbeatDue {
        /// Session the heartbeat belongs to.
        session: SessionId,
    },
    /// Reconnect backoff elapsed.
    ReconnectDue,
    /// Initial REST snapshot arrived.
    SnapshotLoaded {
        /// Normalized records.
        records: Vec<Signal>,
    },
    /// Older records fetched on demand.
    Backfilled {
        /// Normalized records.
        records: Vec<Signal>,
    },
    /// Tear everything down.
    Shutdown,
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Open a new session to the current stream address.
    Connect(SessionId),
    /// Close a session.
    CloseSession(SessionId),
    /// Send a heartbeat frame.
    SendPing(SessionId),
    /// Start the heartbeat timer for a session.
    StartHeartbeat(SessionId),
    /// Stop the heartbeat timer.
    StopHeartbeat,
    /// Arm the reconnect timer.
    ScheduleReconnect(Duration),
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Publish the current state, records included, to observers.
    Publish,
    /// Publish connection fields only; the record set is unchanged.
    PublishStatus,
}

/// Connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    /// No session; a reconnect may be pending.
    Disconnected,
    /// Handshake in progress.
    Connecting(SessionId),
    /// Session open.
    Open(SessionId),
    /// Session failed; waiting for its close.
    Closing(SessionId),
    /// Torn down. Terminal.
    Stopped,
}

impl LinkPhase {
    const fn session(self) -> Option<SessionId> {
        match self {
            Self::Connecting(s) | Self::Open(s) | Self::Closing(s) => Some(s),
            Self::Disconnected | Self::Stopped => None,
        }
    }
}

// =============================================================================
// Link Machine
// =============================================================================

/// Connection and record-set state machine.
#[derive(Debug)]
pub struct LinkMachine {
    phase: LinkPhase,
    state: SyncState,
    policy: ReconnectPolicy,
    next_session: u64,
    started: bool,
}

impl LinkMachine {
    /// Create a machine in the `Disconnected` phase with empty, loading state.
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            phase: LinkPhase::Disconnected,
            state: SyncState::default(),
            policy,
            next_session: 0,
            started: false,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> LinkPhase {
        self.phase
    }

    /// Current synchronized state.
    #[must_use]
    pub const fn state(&self) -> &SyncState {
        &self.state
    }

    /// Check whether the machine reached its terminal phase.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        matches!(self.phase, LinkPhase::Stopped)
    }

    /// Apply one event and return the commands to execute, in order.
    pub fn handle(&mut self, event: LinkEvent) -> Vec<LinkCommand> {
        if self.is_stopped() {
            tracing::trace!(?event, "Ignoring event after shutdown");
            return Vec::new();
        }

        match event {
            LinkEvent::Start => self.on_start(),
            LinkEvent::Opened { session } => self.on_opened(session),
            LinkEvent::Message {
                session,
                text,
                received_at,
            } => self.on_message(session, &text, received_at),
            LinkEvent::Errored { session, reason } => self.on_errored(session, &reason),
            LinkEvent::Closed { session } => self.on_closed(session),
            LinkEvent::HeartbeatDue { session } => self.on_heartbeat(session),
            LinkEvent::ReconnectDue => self.on_reconnect_due(),
            LinkEvent::SnapshotLoaded { records } => {
                self.state.replace(records);
                self.published()
            }
            LinkEvent::Backfilled { records } => {
                let before = self.state.len();
                self.state.extend(records);
                if self.state.len() == before {
                    Vec::new()
                } else {
                    self.published()
                }
            }
            LinkEvent::Shutdown => self.on_shutdown(),
        }
    }

    fn on_start(&mut self) -> Vec<LinkCommand> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        vec![self.begin_session()]
    }

    fn on_opened(&mut self, session: SessionId) -> Vec<LinkCommand> {
        if self.phase != LinkPhase::Connecting(session) {
            return self.stale(session, "opened");
        }

        tracing::info!(session = %session, "Live stream connected");
        self.phase = LinkPhase::Open(session);
        self.policy.reset();
        self.state.connected = true;
        self.state.reconnect_attempt = 0;
        metrics::set_connected(true);

        vec![LinkCommand::StartHeartbeat(session), LinkCommand::PublishStatus]
    }

    fn on_message(
        &mut self,
        session: SessionId,
        text: &str,
        received_at: DateTime<Utc>,
    ) -> Vec<LinkCommand> {
        if self.phase != LinkPhase::Open(session) {
            return self.stale(session, "message");
        }

        let message = match codec::decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "Discarding malformed frame");
                metrics::record_parse_error();
                return Vec::new();
            }
        };
        metrics::record_message_received(message.kind());

        match message {
            FeedMessage::Snapshot(items) => {
                tracing::debug!(count = items.len(), "Applying stream snapshot");
                self.state
                    .replace(items.iter().map(|raw| normalize_at(raw, received_at)));
                self.published()
            }
            FeedMessage::Signal(raw) => {
                if self.state.apply(normalize_at(&raw, received_at)) {
                    self.published()
                } else {
                    tracing::debug!("Duplicate signal dropped");
                    Vec::new()
                }
            }
            FeedMessage::Pong => {
                self.state.last_pong_at = Some(received_at);
                vec![LinkCommand::PublishStatus]
            }
            FeedMessage::Ignored(event) => {
                tracing::trace!(?event, "Ignoring stream event");
                Vec::new()
            }
        }
    }

    fn on_errored(&mut self, session: SessionId, reason: &str) -> Vec<LinkCommand> {
        match self.phase {
            LinkPhase::Connecting(s) | LinkPhase::Open(s) if s == session => {}
            _ => return self.stale(session, "errored"),
        }

        tracing::warn!(session = %session, reason, "Live stream error");
        self.phase = LinkPhase::Closing(session);
        let was_connected = std::mem::replace(&mut self.state.connected, false);
        metrics::set_connected(false);

        let mut commands = vec![LinkCommand::CloseSession(session)];
        if was_connected {
            commands.push(LinkCommand::PublishStatus);
        }
        commands
    }

    fn on_closed(&mut self, session: SessionId) -> Vec<LinkCommand> {
        if self.phase.session() != Some(session) {
            return self.stale(session, "closed");
        }

        let delay = self.policy.next_delay();
        tracing::info!(
            session = %session,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt = self.policy.attempt_count(),
            "Live stream closed, reconnect scheduled"
        );
        self.phase = LinkPhase::Disconnected;
        self.state.connected = false;
        self.state.reconnect_attempt = self.policy.attempt_count();
        metrics::set_connected(false);
        metrics::record_reconnect();

        vec![
            LinkCommand::StopHeartbeat,
            LinkCommand::ScheduleReconnect(delay),
            LinkCommand::PublishStatus,
        ]
    }

    fn on_heartbeat(&self, session: SessionId) -> Vec<LinkCommand> {
        if self.phase == LinkPhase::Open(session) {
            vec![LinkCommand::SendPing(session)]
        } else {
            self.stale(session, "heartbeat")
        }
    }

    fn on_reconnect_due(&mut self) -> Vec<LinkCommand> {
        if self.phase != LinkPhase::Disconnected || !self.started {
            tracing::debug!(phase = ?self.phase, "Ignoring reconnect while a session is active");
            return Vec::new();
        }
        vec![self.begin_session()]
    }

    fn on_shutdown(&mut self) -> Vec<LinkCommand> {
        tracing::info!(phase = ?self.phase, "Shutting down live stream");
        let mut commands = vec![LinkCommand::CancelReconnect, LinkCommand::StopHeartbeat];
        if let Some(session) = self.phase.session() {
            commands.push(LinkCommand::CloseSession(session));
        }

        self.phase = LinkPhase::Stopped;
        if std::mem::replace(&mut self.state.connected, false) {
            metrics::set_connected(false);
            commands.push(LinkCommand::PublishStatus);
        }
        commands
    }

    fn begin_session(&mut self) -> LinkCommand {
        self.next_session += 1;
        let session = SessionId(self.next_session);
        self.phase = LinkPhase::Connecting(session);
        tracing::debug!(session = %session, "Connecting live stream");
        LinkCommand::Connect(session)
    }

    fn published(&self) -> Vec<LinkCommand> {
        metrics::set_records(self.state.len());
        vec![LinkCommand::Publish]
    }

    fn stale(&self, session: SessionId, event: &'static str) -> Vec<LinkCommand> {
        tracing::trace!(session = %session, phase = ?self.phase, event, "Ignoring stale session event");
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::{SignalId, SignalKind, normalize};
    use crate::infrastructure::feed::reconnect::ReconnectConfig;
    use serde_json::json;

    fn machine() -> LinkMachine {
        LinkMachine::new(ReconnectPolicy::new(ReconnectConfig::default()))
    }

    fn now() -> DateTime<Utc> {
        "2024-06-01T12:00:00Z".parse().unwrap()
    }

    fn message(session: SessionId, text: &str) -> LinkEvent {
        LinkEvent::Message {
            session,
            text: text.to_string(),
            received_at: now(),
        }
    }

    /// Start and open a session, returning its id.
    fn open(m: &mut LinkMachine) -> SessionId {
        let commands = m.handle(LinkEvent::Start);
        let [LinkCommand::Connect(session)] = commands[..] else {
            panic!("expected Connect, got {commands:?}");
        };
        m.handle(LinkEvent::Opened { session });
        session
    }

    fn ids(m: &LinkMachine) -> Vec<Option<i64>> {
        m.state().records.iter().map(|s| s.id.known()).collect()
    }

    #[test]
    fn start_connects_once() {
        let mut m = machine();
        assert_eq!(m.handle(LinkEvent::Start), vec![LinkCommand::Connect(SessionId::new(1))]);
        assert_eq!(m.phase(), LinkPhase::Connecting(SessionId::new(1)));
        assert!(m.handle(LinkEvent::Start).is_empty());
    }

    #[test]
    fn open_marks_connected_and_starts_heartbeat() {
        let mut m = machine();
        m.handle(LinkEvent::Start);
        let session = SessionId::new(1);

        let commands = m.handle(LinkEvent::Opened { session });

        assert_eq!(
            commands,
            vec![LinkCommand::StartHeartbeat(session), LinkCommand::PublishStatus]
        );
        assert!(m.state().connected);
        assert!(m.state().loading, "opening alone does not clear loading");
    }

    #[test]
    fn snapshot_then_live_signal_then_duplicate() {
        let mut m = machine();
        let snapshot = vec![normalize(&json!({
            "id": 1, "ts": "2024-01-01T00:00:00Z", "price": 100, "type": "buy"
        }))];
        assert_eq!(
            m.handle(LinkEvent::SnapshotLoaded { records: snapshot }),
            vec![LinkCommand::Publish]
        );
        assert!(!m.state().loading);
        assert_eq!(m.state().records[0].kind, SignalKind::Buy);

        let session = open(&mut m);
        let commands = m.handle(message(
            session,
            r#"{"event":"signal","data":{"id":2,"ts":"2024-01-01T00:00:01Z","price":"abc"}}"#,
        ));
        assert_eq!(commands, vec![LinkCommand::Publish]);
        assert_eq!(ids(&m), vec![Some(1), Some(2)]);
        assert!(m.state().records[1].price.abs() < f64::EPSILON);

        let commands = m.handle(message(
            session,
            r#"{"event":"signal","data":{"id":1,"ts":"2024-01-01T00:00:05Z","price":999}}"#,
        ));
        assert!(commands.is_empty());
        assert_eq!(ids(&m), vec![Some(1), Some(2)]);
        assert!((m.state().records[0].price - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn bootstrap_replaces_state_and_clears_loading() {
        let mut m = machine();
        m.handle(LinkEvent::SnapshotLoaded {
            records: vec![normalize(&json!({"id": 9, "ts": "2024-01-01T00:00:00Z"}))],
        });
        let session = open(&mut m);

        m.handle(message(
            session,
            r#"{"event":"bootstrap","data":[
                {"id":3,"ts":"2024-01-01T00:00:03Z"},
                {"id":1,"ts":"2024-01-01T00:00:01Z"},
                {"id":3,"ts":"2024-01-01T00:00:09Z"}
            ]}"#,
        ));

        assert_eq!(ids(&m), vec![Some(1), Some(3)]);
        assert!(!m.state().loading);
    }

    #[test]
    fn history_event_behaves_like_bootstrap() {
        let mut m = machine();
        let session = open(&mut m);
        m.handle(message(session, r#"{"event":"history","data":[]}"#));
        assert!(!m.state().loading);
        assert!(m.state().is_empty());
    }

    #[test]
    fn malformed_frame_is_discarded_and_connection_stays_open() {
        let mut m = machine();
        let session = open(&mut m);

        assert!(m.handle(message(session, "{not json")).is_empty());
        assert!(m.handle(message(session, "[1,2,3]")).is_empty());
        assert!(m.handle(message(session, r#"{"event":"reflection"}"#)).is_empty());

        assert_eq!(m.phase(), LinkPhase::Open(session));
        assert!(m.state().connected);
    }

    #[test]
    fn pong_records_time_without_touching_records() {
        let mut m = machine();
        let session = open(&mut m);

        assert_eq!(
            m.handle(message(session, r#"{"event":"pong"}"#)),
            vec![LinkCommand::PublishStatus]
        );
        assert_eq!(m.state().last_pong_at, Some(now()));
        assert!(m.state().is_empty());
        assert!(m.state().loading);
    }

    #[test]
    fn scalar_signal_payload_becomes_unknown_hold_record() {
        let mut m = machine();
        let session = open(&mut m);

        assert_eq!(
            m.handle(message(session, r#"{"event":"signal","data":5}"#)),
            vec![LinkCommand::Publish]
        );

        let record = &m.state().records[0];
        assert_eq!(record.id, SignalId::Unknown);
        assert_eq!(record.kind, SignalKind::Hold);
        assert_eq!(record.timestamp, now());
    }

    #[test]
    fn heartbeat_only_pings_open_session() {
        let mut m = machine();
        m.handle(LinkEvent::Start);
        let session = SessionId::new(1);
        assert!(m.handle(LinkEvent::HeartbeatDue { session }).is_empty());

        m.handle(LinkEvent::Opened { session });
        assert_eq!(
            m.handle(LinkEvent::HeartbeatDue { session }),
            vec![LinkCommand::SendPing(session)]
        );
    }

    #[test]
    fn error_closes_session_then_close_schedules_reconnect() {
        let mut m = machine();
        let session = open(&mut m);

        let commands = m.handle(LinkEvent::Errored {
            session,
            reason: "reset".to_string(),
        });
        assert_eq!(
            commands,
            vec![LinkCommand::CloseSession(session), LinkCommand::PublishStatus]
        );
        assert!(!m.state().connected);
        assert_eq!(m.phase(), LinkPhase::Closing(session));

        let commands = m.handle(LinkEvent::Closed { session });
        assert_eq!(
            commands,
            vec![
                LinkCommand::StopHeartbeat,
                LinkCommand::ScheduleReconnect(Duration::from_secs(1)),
                LinkCommand::PublishStatus,
            ]
        );
        assert_eq!(m.phase(), LinkPhase::Disconnected);
        assert_eq!(m.state().reconnect_attempt, 1);
    }

    #[test]
    fn consecutive_failures_back_off_then_open_resets() {
        let mut m = machine();
        let session = open(&mut m);

        let mut delays = Vec::new();
        let mut current = session;
        for _ in 0..3 {
            for command in m.handle(LinkEvent::Closed { session: current }) {
                if let LinkCommand::ScheduleReconnect(delay) = command {
                    delays.push(delay.as_millis());
                }
            }
            let commands = m.handle(LinkEvent::ReconnectDue);
            let [LinkCommand::Connect(next)] = commands[..] else {
                panic!("expected Connect, got {commands:?}");
            };
            assert!(next > current);
            current = next;
        }
        assert_eq!(delays, vec![1000, 2000, 4000]);
        assert_eq!(m.state().reconnect_attempt, 3);

        m.handle(LinkEvent::Opened { session: current });
        assert_eq!(m.state().reconnect_attempt, 0);

        let commands = m.handle(LinkEvent::Closed { session: current });
        assert!(commands.contains(&LinkCommand::ScheduleReconnect(Duration::from_secs(1))));
    }

    #[test]
    fn connect_failure_counts_as_attempt() {
        let mut m = machine();
        m.handle(LinkEvent::Start);
        let session = SessionId::new(1);

        let commands = m.handle(LinkEvent::Errored {
            session,
            reason: "refused".to_string(),
        });
        assert_eq!(commands, vec![LinkCommand::CloseSession(session)]);

        let commands = m.handle(LinkEvent::Closed { session });
        assert!(commands.contains(&LinkCommand::ScheduleReconnect(Duration::from_secs(1))));
    }

    #[test]
    fn stale_session_events_are_ignored() {
        let mut m = machine();
        let old = open(&mut m);
        m.handle(LinkEvent::Closed { session: old });
        let [LinkCommand::Connect(new)] = m.handle(LinkEvent::ReconnectDue)[..] else {
            panic!("expected Connect");
        };
        m.handle(LinkEvent::Opened { session: new });
        let before = m.state().clone();

        assert!(m.handle(LinkEvent::Opened { session: old }).is_empty());
        assert!(m.handle(message(old, r#"{"event":"signal","data":{"id":5}}"#)).is_empty());
        assert!(m.handle(LinkEvent::Errored { session: old, reason: "late".into() }).is_empty());
        assert!(m.handle(LinkEvent::Closed { session: old }).is_empty());
        assert!(m.handle(LinkEvent::HeartbeatDue { session: old }).is_empty());

        assert_eq!(m.state(), &before);
        assert_eq!(m.phase(), LinkPhase::Open(new));
    }

    #[test]
    fn reconnect_due_while_active_is_ignored() {
        let mut m = machine();
        open(&mut m);
        assert!(m.handle(LinkEvent::ReconnectDue).is_empty());

        let mut idle = machine();
        assert!(idle.handle(LinkEvent::ReconnectDue).is_empty(), "not started yet");
    }

    #[test]
    fn shutdown_tears_down_in_order() {
        let mut m = machine();
        let session = open(&mut m);

        let commands = m.handle(LinkEvent::Shutdown);

        assert_eq!(
            commands,
            vec![
                LinkCommand::CancelReconnect,
                LinkCommand::StopHeartbeat,
                LinkCommand::CloseSession(session),
                LinkCommand::PublishStatus,
            ]
        );
        assert!(m.is_stopped());
        assert!(!m.state().connected);
    }

    #[test]
    fn nothing_happens_after_shutdown() {
        let mut m = machine();
        let session = open(&mut m);
        m.handle(LinkEvent::Shutdown);

        let events = vec![
            LinkEvent::Start,
            LinkEvent::Opened { session },
            message(session, r#"{"event":"signal","data":{"id":1}}"#),
            LinkEvent::Errored { session, reason: "x".into() },
            LinkEvent::Closed { session },
            LinkEvent::HeartbeatDue { session },
            LinkEvent::ReconnectDue,
            LinkEvent::SnapshotLoaded { records: vec![] },
            LinkEvent::Backfilled { records: vec![] },
            LinkEvent::Shutdown,
        ];
        for event in events {
            assert!(m.handle(event).is_empty());
        }
        assert!(m.state().is_empty());
    }

    #[test]
    fn shutdown_while_waiting_has_no_session_to_close() {
        let mut m = machine();
        let session = open(&mut m);
        m.handle(LinkEvent::Closed { session });

        assert_eq!(
            m.handle(LinkEvent::Shutdown),
            vec![LinkCommand::CancelReconnect, LinkCommand::StopHeartbeat]
        );
    }

    #[test]
    fn backfill_merges_older_records() {
        let mut m = machine();
        m.handle(LinkEvent::SnapshotLoaded {
            records: vec![normalize(&json!({"id": 10, "ts": "2024-01-02T00:00:00Z"}))],
        });

        let older = vec![
            normalize(&json!({"id": 4, "ts": "2024-01-01T00:00:00Z"})),
            normalize(&json!({"id": 10, "ts": "2024-01-02T00:00:00Z"})),
        ];
        assert_eq!(m.handle(LinkEvent::Backfilled { records: older.clone() }), vec![LinkCommand::Publish]);
        assert_eq!(ids(&m), vec![Some(4), Some(10)]);

        assert!(m.handle(LinkEvent::Backfilled { records: older }).is_empty());
    }

    #[test]
    fn sentinel_signals_are_kept() {
        let mut m = machine();
        let session = open(&mut m);
        m.handle(message(session, r#"{"event":"signal","data":{"ts":"2024-01-01T00:00:00Z"}}"#));
        m.handle(message(session, r#"{"event":"signal","data":{"ts":"2024-01-01T00:00:01Z"}}"#));

        assert_eq!(m.state().len(), 2);
        assert!(m.state().records.iter().all(|s| s.id == SignalId::Unknown));
    }
}
