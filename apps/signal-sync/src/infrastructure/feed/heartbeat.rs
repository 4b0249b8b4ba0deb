//! Heartbeat Manager
//!
//! Requests a liveness ping at a fixed interval while a session is open.
//! Dead connections are left to the transport's own close/error signaling;
//! there is no client-side pong timeout.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::machine::{LinkEvent, SessionId};

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration) -> Self {
        Self { ping_interval }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
        }
    }
}

/// Periodic ping scheduler bound to one session.
///
/// Emits [`LinkEvent::HeartbeatDue`] one interval after start and every
/// interval thereafter, until cancelled or the event channel closes.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    session: SessionId,
    event_tx: mpsc::Sender<LinkEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        session: SessionId,
        event_tx: mpsc::Sender<LinkEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            session,
            event_tx,
            cancel,
        }
    }

    /// Run the heartbeat loop until cancelled.
    ///
    /// A zero interval disables the heartbeat for this session.
    pub async fn run(self) {
        let period = self.config.ping_interval;
        if period.is_zero() {
            tracing::warn!(session = %self.session, "Heartbeat interval is zero, pings disabled");
            return;
        }
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!(session = %self.session, "Heartbeat cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let event = LinkEvent::HeartbeatDue { session: self.session };
                    if self.event_tx.send(event).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn first_ping_waits_one_interval() {
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(
            HeartbeatConfig::new(Duration::from_secs(15)),
            SessionId::new(3),
            event_tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(manager.run());

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert!(event_rx.try_recv().is_err(), "no ping before the first interval");

        let event = event_rx.recv().await.expect("ping after one interval");
        assert!(matches!(event, LinkEvent::HeartbeatDue { session } if session == SessionId::new(3)));

        let event = event_rx.recv().await.expect("second ping");
        assert!(matches!(event, LinkEvent::HeartbeatDue { .. }));

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn manager_cancellation() {
        let (event_tx, _event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(
            HeartbeatConfig::new(Duration::from_secs(10)),
            SessionId::new(1),
            event_tx,
            cancel.clone(),
        );

        let handle = tokio::spawn(manager.run());
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_returns_without_pinging() {
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let manager = HeartbeatManager::new(
            HeartbeatConfig::new(Duration::ZERO),
            SessionId::new(2),
            event_tx,
            CancellationToken::new(),
        );

        let result = tokio::spawn(manager.run()).await;

        assert!(result.is_ok(), "zero interval must not panic the task");
        assert!(event_rx.recv().await.is_none(), "no ping and sender dropped");
    }

    #[tokio::test]
    async fn manager_stops_when_channel_closes() {
        let (event_tx, event_rx) = mpsc::channel(1);
        drop(event_rx);
        let manager = HeartbeatManager::new(
            HeartbeatConfig::new(Duration::from_millis(10)),
            SessionId::new(1),
            event_tx,
            CancellationToken::new(),
        );

        let result = tokio::time::timeout(Duration::from_secs(1), manager.run()).await;
        assert!(result.is_ok());
    }
}
