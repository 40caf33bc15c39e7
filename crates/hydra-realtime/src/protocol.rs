//! JSON wire protocol spoken over the realtime socket.
//!
//! Requests are JSON objects carrying a client-assigned `requestId`. The server
//! acknowledges each one with `{"requestId": n, "status": "SUCCESS"}` (any
//! other status is an application-level error) and pushes channel broadcasts
//! as objects carrying a `channel` field.

use serde_json::{json, Map, Value};

use crate::error::{RealtimeError, Result};
use crate::message::ChannelFrame;

/// Field the client injects into every outbound request.
pub const REQUEST_ID_FIELD: &str = "requestId";

/// Status value of a successful acknowledgement.
pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Opaque identifier of a broadcast channel.
pub type ChannelId = String;

/// Builds a `{"subscribe": [...]}` request payload.
pub fn subscribe_request(channels: &[ChannelId]) -> Map<String, Value> {
    object(json!({ "subscribe": channels }))
}

/// Builds an `{"unsubscribe": [...]}` request payload.
pub fn unsubscribe_request(channels: &[ChannelId]) -> Map<String, Value> {
    object(json!({ "unsubscribe": channels }))
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Checks that a caller payload can be sent as a correlated request.
pub fn validate_payload(payload: Value) -> Result<Map<String, Value>> {
    match payload {
        Value::Object(map) if map.contains_key(REQUEST_ID_FIELD) => {
            Err(RealtimeError::InvalidPayload {
                reason: format!("payload already carries a `{REQUEST_ID_FIELD}` field"),
            })
        }
        Value::Object(map) => Ok(map),
        other => Err(RealtimeError::InvalidPayload {
            reason: format!("expected a JSON object, got {}", kind_of(&other)),
        }),
    }
}

/// Serializes `payload` with `requestId` injected.
pub fn encode_request(payload: &Map<String, Value>, request_id: u64) -> Result<String> {
    let mut map = payload.clone();
    map.insert(REQUEST_ID_FIELD.to_string(), Value::from(request_id));
    Ok(serde_json::to_string(&Value::Object(map))?)
}

/// Whether an acknowledgement reports success.
pub fn is_success(response: &Value) -> bool {
    response.get("status").and_then(Value::as_str) == Some(STATUS_SUCCESS)
}

/// Classification of one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Acknowledgement of a correlated request.
    Response {
        /// Numeric id, `None` when the id is truthy but not a request number.
        request_id: Option<u64>,
        /// The full response object.
        response: Value,
    },
    /// Broadcast on a channel.
    Broadcast(ChannelFrame),
    /// Neither a response nor a broadcast.
    Ignored,
}

/// Parses and classifies a frame.
///
/// A truthy `requestId` wins over `channel`; frames with neither are ignored.
/// Only malformed JSON is an error: a broadcast is never rejected for the
/// shape of its fields.
pub fn decode_inbound(text: &str) -> Result<Inbound> {
    let Value::Object(object) = serde_json::from_str::<Value>(text)? else {
        return Ok(Inbound::Ignored);
    };

    if let Some(id) = object.get(REQUEST_ID_FIELD).filter(|v| is_truthy(v)) {
        let request_id = id.as_u64();
        return Ok(Inbound::Response {
            request_id,
            response: Value::Object(object),
        });
    }

    Ok(ChannelFrame::from_object(object).map_or(Inbound::Ignored, Inbound::Broadcast))
}

/// JavaScript truthiness of a JSON value.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
