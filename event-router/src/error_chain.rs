use std::error::Error;

use serde_json::Value;

use crate::api::{PayloadError, RouterError, ValidationError};
use crate::cbor::CborError;

/// Upper bound on the number of links walked, a chain that keeps
/// returning itself from `source()` stops here.
pub const MAX_CHAIN_DEPTH: usize = 32;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FlattenedError {
    /// One `"<kind>: <message>"` entry per link, outermost first.
    pub messages: Vec<String>,
    /// Structured reasons from every validation link, outermost first.
    pub reasons: Vec<Value>,
}

impl FlattenedError {
    pub fn reason(&self) -> String {
        self.messages.join(", ")
    }
}

pub fn flatten(err: &(dyn Error + 'static)) -> FlattenedError {
    let mut flattened = FlattenedError::default();
    let mut link = Some(err);

    while let Some(current) = link {
        if flattened.messages.len() == MAX_CHAIN_DEPTH {
            break;
        }

        let mut message = format!("{}: {}", error_kind(current), current);
        if let Some(validation) = current.downcast_ref::<ValidationError>() {
            if !validation.reasons.is_empty() {
                let rendered = serde_json::to_string(&validation.reasons)
                    .unwrap_or_else(|_| "[]".to_string());
                message.push_str(". Validation errors => ");
                message.push_str(&rendered);
                flattened.reasons.extend(validation.reasons.iter().cloned());
            }
        }
        flattened.messages.push(message);

        link = current.source();
    }

    flattened
}

fn error_kind(err: &(dyn Error + 'static)) -> &'static str {
    if let Some(err) = err.downcast_ref::<RouterError>() {
        err.kind()
    } else if err.is::<ValidationError>() {
        "ValidationError"
    } else if err.is::<PayloadError>() {
        "PayloadError"
    } else if err.is::<CborError>() {
        "CborError"
    } else if err.is::<serde_json::Error>() {
        "JsonError"
    } else {
        "Error"
    }
}
