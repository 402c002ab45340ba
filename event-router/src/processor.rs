use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, instrument};

use crate::api::{PayloadError, RouterError};
use crate::cbor;
use crate::envelope::{extract_events, identifier_string, DeviceIdentity};
use crate::error_chain::flatten;
use crate::header::validate_header;
use crate::instruction::{dead_letter, EventDetails, Instruction};
use crate::pipeline::EventPipeline;
use crate::prometheus::{report_batch_size, report_dead_letter, report_message_received};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// `application/cbor`: header schema check, asset id injection.
    Structured,
    /// `application/json`
    RawJson,
}

impl Encoding {
    /// Matches the media type case-insensitively, ignoring parameters.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let media_type = content_type.split(';').next().unwrap_or_default().trim();
        if media_type.eq_ignore_ascii_case("application/cbor") {
            Some(Encoding::Structured)
        } else if media_type.eq_ignore_ascii_case("application/json") {
            Some(Encoding::RawJson)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Structured => "cbor",
            Encoding::RawJson => "json",
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<Value, PayloadError> {
        match self {
            Encoding::Structured => Ok(cbor::decode(payload)?),
            Encoding::RawJson => Ok(serde_json::from_slice(payload)?),
        }
    }
}

/// Entry point: turns one inbound message into its ordered instructions.
#[derive(Clone)]
pub struct MessageProcessor {
    pipeline: EventPipeline,
}

impl MessageProcessor {
    pub fn new(pipeline: EventPipeline) -> Self {
        Self { pipeline }
    }

    /// Never fails on bad input, which is dead-lettered instead. An error
    /// means a dead letter could not be built.
    #[instrument(skip_all, fields(content_type = %content_type, bytes = payload.len()))]
    pub fn process(
        &self,
        content_type: &str,
        payload: &[u8],
    ) -> Result<Vec<Instruction>, RouterError> {
        let Some(encoding) = Encoding::from_content_type(content_type) else {
            report_message_received("unsupported");
            let err = RouterError::UnsupportedContentType(content_type.to_string());
            return self.dead_letter_message(&err, &Value::Null, &raw_payload(payload));
        };
        report_message_received(encoding.as_str());

        match encoding.decode(payload) {
            Ok(message) => self.process_message(encoding, message),
            Err(err) => {
                let err = RouterError::PayloadDecoding(err);
                self.dead_letter_message(&err, &Value::Null, &raw_payload(payload))
            }
        }
    }

    /// Same as [`MessageProcessor::process`] for an already decoded message.
    pub fn process_message(
        &self,
        encoding: Encoding,
        message: Value,
    ) -> Result<Vec<Instruction>, RouterError> {
        let original = message.clone();
        let mut message = message;

        match self.unwrap_message(encoding, &mut message) {
            Ok((identity, events)) => {
                report_batch_size(events.len());
                self.pipeline
                    .process_events(&message["header"], &identity, events)
            }
            Err(err) => self.dead_letter_message(&err, &message, &original),
        }
    }

    fn unwrap_message(
        &self,
        encoding: Encoding,
        message: &mut Value,
    ) -> Result<(DeviceIdentity, Vec<Value>), RouterError> {
        let validator = self.pipeline.validator();

        if encoding == Encoding::Structured {
            validator
                .validate_header(message)
                .map_err(RouterError::HeaderValidationFailed)?;
        }

        validator.reformat_inbound(message);
        let events = extract_events(message)?;

        let header = message
            .get_mut("header")
            .ok_or(RouterError::MissingDeviceId)?;
        let mut identity =
            validate_header(header, &self.pipeline.rules().device_type_override)?;
        if encoding == Encoding::RawJson {
            identity.asset_id = None;
        }

        Ok((identity, events))
    }

    /// Whole-message dead letter. Identity is read best-effort from the
    /// (possibly partially normalized) header.
    fn dead_letter_message<E: Serialize>(
        &self,
        err: &RouterError,
        message: &Value,
        event: &E,
    ) -> Result<Vec<Instruction>, RouterError> {
        let header = message.get("header");
        let details = EventDetails {
            device_id: header
                .and_then(|header| header.get("device_id"))
                .and_then(identifier_string),
            device_type: header
                .and_then(|header| header.get("device_type"))
                .and_then(Value::as_str)
                .map(str::to_string),
            event_type: None,
        };

        let flattened = flatten(err);
        let reason = flattened.reason();
        error!(
            device_id = details.device_id.as_deref(),
            device_type = details.device_type.as_deref(),
            reasons = %serde_json::Value::Array(flattened.reasons),
            "dead-lettering message: {}", reason
        );
        report_dead_letter("message", err.kind());

        let instruction = dead_letter(
            self.pipeline.rules().topics.dead_letter(),
            details,
            &reason,
            event,
        )?;
        Ok(vec![instruction])
    }
}

/// Undecodable bodies are dead-lettered as text when they are UTF-8, base64 otherwise.
fn raw_payload(payload: &[u8]) -> Value {
    match std::str::from_utf8(payload) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => Value::String(STANDARD.encode(payload)),
    }
}
