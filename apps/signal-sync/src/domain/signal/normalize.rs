//! Signal Normalizer
//!
//! Converts loosely-typed inbound JSON into a [`Signal`]. The conversion is
//! total: malformed or missing fields are replaced with defaults so a bad
//! record can never halt the stream.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use super::{Signal, SignalId, SignalKind};

/// Ticker used when a record carries none.
pub const DEFAULT_TICKER: &str = "BTC/KRW";

/// Naive datetime layouts accepted in addition to RFC 3339 (read as UTC).
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Normalize a raw record, substituting the current time for a missing timestamp.
#[must_use]
pub fn normalize(raw: &Value) -> Signal {
    normalize_at(raw, Utc::now())
}

/// Normalize a raw record with an explicit capture time.
#[must_use]
pub fn normalize_at(raw: &Value, captured_at: DateTime<Utc>) -> Signal {
    let empty = Map::new();
    let fields = raw.as_object().unwrap_or(&empty);

    let timestamp = match fields.get("ts") {
        Some(Value::String(s)) => parse_timestamp(s).unwrap_or_else(|| {
            tracing::debug!(ts = %s, "Unparseable signal timestamp, using capture time");
            captured_at
        }),
        _ => captured_at,
    };

    Signal {
        id: coerce_id(fields.get("id")),
        timestamp,
        ticker: match fields.get("ticker") {
            Some(Value::String(s)) => s.clone(),
            _ => DEFAULT_TICKER.to_string(),
        },
        price: coerce_finite(fields.get("price")),
        kind: match fields.get("type") {
            Some(Value::String(s)) => SignalKind::from_str_case_insensitive(s),
            _ => SignalKind::Hold,
        },
        confidence: coerce_finite(fields.get("confidence")),
        reason: match fields.get("reason") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        },
    }
}

/// Parse an RFC 3339 or naive (UTC) timestamp.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        })
}

fn coerce_id(value: Option<&Value>) -> SignalId {
    let id = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(integral_i64)),
        Some(Value::String(s)) => {
            let t = s.trim();
            t.parse::<i64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().and_then(integral_i64))
        }
        _ => None,
    };
    id.map_or(SignalId::Unknown, SignalId::Known)
}

#[allow(
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
fn integral_i64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound
    if f.is_finite() && f.trunc() == f && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

pub(crate) fn coerce_finite(value: Option<&Value>) -> f64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                0.0
            } else {
                t.parse::<f64>().unwrap_or(0.0)
            }
        }
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        _ => 0.0,
    };
    if n.is_finite() { n } else { 0.0 }
}
