//! Trading Signal Types
//!
//! Canonical internal representation of one trading decision event.
//!
//! # Wire Format (JSON)
//! ```json
//! {"id": 1, "ts": "2024-01-01T00:00:00Z", "ticker": "BTC/KRW",
//!  "price": 100.0, "type": "BUY", "confidence": 0.5, "reason": "breakout"}
//! ```
//!
//! Inbound records are untrusted and go through [`normalize`] before they
//! reach the timeline.

mod normalize;

pub use normalize::{DEFAULT_TICKER, normalize, normalize_at, parse_timestamp};
pub(crate) use normalize::coerce_finite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identity
// =============================================================================

/// Identity of a signal as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SignalId {
    /// Backend-assigned numeric id.
    Known(i64),
    /// The id was missing or not coercible to an integer.
    ///
    /// Sentinel ids never collide with each other or with known ids.
    #[default]
    Unknown,
}

impl SignalId {
    /// Get the numeric id, if known.
    #[must_use]
    pub const fn known(self) -> Option<i64> {
        match self {
            Self::Known(id) => Some(id),
            Self::Unknown => None,
        }
    }

    /// Check if this is the sentinel id.
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl From<i64> for SignalId {
    fn from(id: i64) -> Self {
        Self::Known(id)
    }
}

impl Serialize for SignalId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(id) => serializer.serialize_i64(*id),
            Self::Unknown => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for SignalId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Option::<i64>::deserialize(deserializer)?.map_or(Self::Unknown, Self::Known))
    }
}

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(id) => write!(f, "{id}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Classification of a trading decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    /// Buy decision.
    Buy,
    /// Sell decision.
    Sell,
    /// Hold decision; also the fallback for unrecognized input.
    #[default]
    Hold,
    /// Informational alert.
    Alert,
}

impl SignalKind {
    /// Parse a kind case-insensitively, falling back to `Hold`.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Self::Buy,
            "SELL" => Self::Sell,
            "ALERT" => Self::Alert,
            _ => Self::Hold,
        }
    }

    /// Get the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
            Self::Alert => "ALERT",
        }
    }
}

// =============================================================================
// Signal
// =============================================================================

/// One trading decision event with price, confidence, and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Backend id, or the sentinel when unknown.
    pub id: SignalId,

    /// When the decision was made.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// Instrument symbol.
    pub ticker: String,

    /// Price at decision time (always finite).
    pub price: f64,

    /// Decision classification.
    #[serde(rename = "type")]
    pub kind: SignalKind,

    /// Model confidence (always finite).
    pub confidence: f64,

    /// Free-form rationale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Signal {
    /// Hashable identity of every field, used to spot redelivered sentinel records.
    #[must_use]
    pub(crate) fn fingerprint(&self) -> SignalFingerprint {
        SignalFingerprint {
            id: self.id,
            timestamp: self.timestamp,
            ticker: self.ticker.clone(),
            price_bits: self.price.to_bits(),
            kind: self.kind,
            confidence_bits: self.confidence.to_bits(),
            reason: self.reason.clone(),
        }
    }
}

/// Structural identity of a [`Signal`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SignalFingerprint {
    id: SignalId,
    timestamp: DateTime<Utc>,
    ticker: String,
    price_bits: u64,
    kind: SignalKind,
    confidence_bits: u64,
    reason: Option<String>,
}
