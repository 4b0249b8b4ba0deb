//! Live Stream Feed
//!
//! WebSocket connection to the backend's `/ws/updates` stream.
//!
//! - `codec`: Inbound envelope decoding and the outbound ping frame
//! - `machine`: Pure connection/record-set state machine
//! - `client`: Async driver owning the socket and timers
//! - `heartbeat`: Periodic ping scheduling
//! - `reconnect`: Capped exponential backoff

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod machine;
pub mod reconnect;

pub use client::{ConnectionError, LiveStreamClient, LiveStreamConfig};
pub use codec::{FeedMessage, PING_FRAME, ParseError};
pub use heartbeat::{HeartbeatConfig, HeartbeatManager};
pub use machine::{LinkCommand, LinkEvent, LinkMachine, LinkPhase, SessionId};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
