use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::Validator;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::api::ValidationError;
use crate::envelope::event_type;

const HEADER_SCHEMA_FILE: &str = "header.json";
const EVENT_SCHEMA_DIR: &str = "events";

/// Content-validation collaborator consulted by the processor and pipeline.
pub trait EventValidator: Send + Sync {
    /// Whole-message check, only run for structured (CBOR) messages.
    fn validate_header(&self, message: &Value) -> Result<(), ValidationError>;

    fn validate_content(&self, event: &Value) -> Result<(), ValidationError>;

    /// Enriches the message in place before its header is inspected.
    ///
    /// Fills a missing header `device_id` / `device_type` from the metadata
    /// of the first event.
    fn reformat_inbound(&self, message: &mut Value) {
        promote_device_identity(message);
    }
}

/// Accepts every message and event.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughValidator;

impl EventValidator for PassthroughValidator {
    fn validate_header(&self, _message: &Value) -> Result<(), ValidationError> {
        Ok(())
    }

    fn validate_content(&self, _event: &Value) -> Result<(), ValidationError> {
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum SchemaLoadError {
    #[error("failed to read schema {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("schema {path} is not valid JSON")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("schema {path} does not compile: {message}")]
    Compile { path: PathBuf, message: String },
}

/// JSON Schema backed validator.
///
/// Layout of the schema directory:
/// - `header.json` validates the whole inbound message
/// - `events/<event_type>.json` validates one event entry
///
/// Event types without a schema are accepted.
pub struct SchemaValidator {
    header: Option<Validator>,
    events: HashMap<String, Validator>,
}

impl SchemaValidator {
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, SchemaLoadError> {
        let dir = dir.as_ref();

        let header_path = dir.join(HEADER_SCHEMA_FILE);
        let header = if header_path.is_file() {
            Some(compile(&header_path)?)
        } else {
            None
        };

        let mut events = HashMap::new();
        let events_dir = dir.join(EVENT_SCHEMA_DIR);
        if events_dir.is_dir() {
            let entries = fs::read_dir(&events_dir).map_err(|source| SchemaLoadError::Io {
                path: events_dir.clone(),
                source,
            })?;
            for entry in entries {
                let path = entry
                    .map_err(|source| SchemaLoadError::Io {
                        path: events_dir.clone(),
                        source,
                    })?
                    .path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                let Some(event_type) = path.file_stem().and_then(|stem| stem.to_str()) else {
                    continue;
                };
                debug!("loading schema for event type {}", event_type);
                events.insert(event_type.to_string(), compile(&path)?);
            }
        }

        info!(
            header = header.is_some(),
            event_schemas = events.len(),
            "loaded validation schemas from {}",
            dir.display()
        );
        Ok(Self { header, events })
    }
}

impl EventValidator for SchemaValidator {
    fn validate_header(&self, message: &Value) -> Result<(), ValidationError> {
        match &self.header {
            Some(schema) => check(schema, message, "message header does not match its schema"),
            None => Ok(()),
        }
    }

    fn validate_content(&self, event: &Value) -> Result<(), ValidationError> {
        let Some(event_type) = event_type(event) else {
            return Ok(());
        };
        match self.events.get(&event_type) {
            Some(schema) => check(
                schema,
                event,
                &format!("event {event_type} does not match its schema"),
            ),
            None => Ok(()),
        }
    }
}

fn compile(path: &Path) -> Result<Validator, SchemaLoadError> {
    let raw = fs::read_to_string(path).map_err(|source| SchemaLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let schema: Value = serde_json::from_str(&raw).map_err(|source| SchemaLoadError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Validator::new(&schema).map_err(|e| SchemaLoadError::Compile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn check(schema: &Validator, instance: &Value, message: &str) -> Result<(), ValidationError> {
    let reasons: Vec<Value> = schema
        .iter_errors(instance)
        .map(|e| {
            json!({
                "message": e.to_string(),
                "instance_path": e.instance_path.to_string(),
                "schema_path": e.schema_path.to_string(),
            })
        })
        .collect();

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(message).with_reasons(reasons))
    }
}

fn promote_device_identity(message: &mut Value) {
    let Some(metadata) = message
        .pointer("/body/event/metadata")
        .or_else(|| message.pointer("/body/events/0/metadata"))
        .cloned()
    else {
        return;
    };

    let Some(header) = message.get_mut("header").and_then(Value::as_object_mut) else {
        return;
    };

    for field in ["device_id", "device_type"] {
        let missing = header.get(field).map_or(true, Value::is_null);
        if missing {
            if let Some(value) = metadata.get(field).filter(|value| !value.is_null()) {
                header.insert(field.to_string(), value.clone());
            }
        }
    }
}
