use serde::Serialize;
use serde_json::Value;

use crate::api::RouterError;

/// Device identity read from a validated header.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_type: String,
    pub asset_id: Option<Value>,
}

/// Wire form of a single event: the message header with exactly one event in its body.
#[derive(Serialize)]
pub struct SingleEventEnvelope<'a> {
    pub header: &'a Value,
    pub body: SingleEventBody<'a>,
}

#[derive(Serialize)]
pub struct SingleEventBody<'a> {
    pub event: &'a Value,
}

impl<'a> SingleEventEnvelope<'a> {
    pub fn new(header: &'a Value, event: &'a Value) -> Self {
        Self {
            header,
            body: SingleEventBody { event },
        }
    }
}

/// Returns the ordered event entries of a decoded message.
///
/// A present `event` wins over `events`. The input is left untouched.
pub fn extract_events(message: &Value) -> Result<Vec<Value>, RouterError> {
    let body = message
        .get("body")
        .and_then(Value::as_object)
        .ok_or(RouterError::MalformedEnvelope)?;

    if let Some(event) = body.get("event").filter(|event| !event.is_null()) {
        return Ok(vec![event.clone()]);
    }

    match body.get("events") {
        Some(Value::Array(events)) if events.is_empty() => Err(RouterError::EmptyEnvelope),
        Some(Value::Array(events)) => Ok(events.clone()),
        _ => Err(RouterError::MalformedEnvelope),
    }
}

/// Renders an identifier for use as a message key or log field.
pub fn identifier_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// `metadata.event_type` of an event entry. Numeric enum codes are accepted.
pub fn event_type(event: &Value) -> Option<String> {
    match event.pointer("/metadata/event_type") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}
