//! Live Stream Codec
//!
//! Decodes inbound text frames into [`FeedMessage`]s and provides the
//! outbound heartbeat frame.
//!
//! Inbound frames are JSON objects of the form:
//!
//! ```json
//! {"event": "bootstrap" | "history" | "signal" | "pong", "data": ...}
//! ```
//!
//! Decoding only classifies the envelope; record payloads stay raw so the
//! normalizer can apply its coercion rules to each element.

use serde_json::Value;

/// Text frame sent to the server as a keep-alive.
pub const PING_FRAME: &str = "ping";

/// Frame decoding errors. The offending frame is discarded.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Frame is not valid JSON.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not an object.
    #[error("expected JSON object envelope, got {0}")]
    NotAnObject(&'static str),
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Authoritative batch (`bootstrap` or `history` carrying an array).
    Snapshot(Vec<Value>),
    /// One live record (`signal` carrying a payload).
    Signal(Value),
    /// Heartbeat acknowledgement.
    Pong,
    /// Anything else; carries the event name when present.
    Ignored(Option<String>),
}

impl FeedMessage {
    /// Event kind label used for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Signal(_) => "signal",
            Self::Pong => "pong",
            Self::Ignored(_) => "ignored",
        }
    }
}

/// Decode one text frame.
///
/// # Errors
///
/// Returns `ParseError` if the frame is not a JSON object.
pub fn decode(text: &str) -> Result<FeedMessage, ParseError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut envelope) = value else {
        return Err(ParseError::NotAnObject(json_type_name(&value)));
    };

    let event = envelope
        .get("event")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let data = envelope.remove("data").unwrap_or(Value::Null);

    let message = match (event.as_deref(), data) {
        (Some("bootstrap" | "history"), Value::Array(items)) => FeedMessage::Snapshot(items),
        (Some("signal"), data) if is_truthy(&data) => FeedMessage::Signal(data),
        (Some("pong"), _) => FeedMessage::Pong,
        _ => FeedMessage::Ignored(event),
    };

    Ok(message)
}

/// Payload presence test: null, `false`, zero and the empty string are absent.
///
/// Any other value counts as a signal, including scalars and arrays. The
/// normalizer reads those as an empty object, so they land as a `HOLD`
/// record with an unknown id rather than being dropped.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn decode_bootstrap_array() {
        let msg = decode(r#"{"event":"bootstrap","data":[{"id":1},{"id":2}]}"#).unwrap();
        assert_eq!(msg, FeedMessage::Snapshot(vec![json!({"id": 1}), json!({"id": 2})]));
    }

    #[test]
    fn decode_history_array() {
        let msg = decode(r#"{"event":"history","data":[]}"#).unwrap();
        assert_eq!(msg, FeedMessage::Snapshot(vec![]));
    }

    #[test]
    fn bootstrap_without_array_is_ignored() {
        let msg = decode(r#"{"event":"bootstrap","data":{"id":1}}"#).unwrap();
        assert_eq!(msg, FeedMessage::Ignored(Some("bootstrap".to_string())));
    }

    #[test]
    fn decode_signal() {
        let msg = decode(r#"{"event":"signal","data":{"id":2,"price":"abc"}}"#).unwrap();
        assert_eq!(msg, FeedMessage::Signal(json!({"id": 2, "price": "abc"})));
    }

    #[test_case(r#"{"event":"signal"}"# ; "missing data")]
    #[test_case(r#"{"event":"signal","data":null}"# ; "null data")]
    #[test_case(r#"{"event":"signal","data":false}"# ; "false data")]
    #[test_case(r#"{"event":"signal","data":""}"# ; "empty string data")]
    fn signal_without_payload_is_ignored(frame: &str) {
        assert_eq!(decode(frame).unwrap(), FeedMessage::Ignored(Some("signal".to_string())));
    }

    #[test_case(json!(5) ; "number")]
    #[test_case(json!("x") ; "string")]
    #[test_case(json!([1, 2]) ; "array")]
    #[test_case(json!(true) ; "true")]
    fn truthy_non_object_payload_is_a_signal(data: Value) {
        let frame = json!({"event": "signal", "data": data.clone()}).to_string();
        assert_eq!(decode(&frame).unwrap(), FeedMessage::Signal(data));
    }

    #[test]
    fn decode_pong() {
        assert_eq!(decode(r#"{"event":"pong"}"#).unwrap(), FeedMessage::Pong);
        assert_eq!(decode(r#"{"event":"pong","data":1}"#).unwrap(), FeedMessage::Pong);
    }

    #[test_case(r#"{"event":"reflection","data":{}}"#, Some("reflection") ; "unknown event")]
    #[test_case(r#"{"data":[1,2]}"#, None ; "missing event")]
    #[test_case(r#"{"event":7,"data":[]}"#, None ; "non string event")]
    fn unknown_events_are_ignored(frame: &str, event: Option<&str>) {
        assert_eq!(
            decode(frame).unwrap(),
            FeedMessage::Ignored(event.map(str::to_string))
        );
    }

    #[test]
    fn invalid_json_is_error() {
        assert!(matches!(decode("not json"), Err(ParseError::Json(_))));
        assert!(matches!(decode("pong"), Err(ParseError::Json(_))));
    }

    #[test]
    fn non_object_envelope_is_error() {
        assert!(matches!(decode("[1,2]"), Err(ParseError::NotAnObject("array"))));
        assert!(matches!(decode("42"), Err(ParseError::NotAnObject("number"))));
    }

    #[test]
    fn kind_labels() {
        assert_eq!(FeedMessage::Pong.kind(), "pong");
        assert_eq!(FeedMessage::Snapshot(vec![]).kind(), "snapshot");
    }
}
