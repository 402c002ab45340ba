use std::error::Error as StdError;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::cbor::CborError;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum RouteResponseCode {
    Ok = 1,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteResponse {
    pub status: RouteResponseCode,
    pub published: usize,
    pub dead_lettered: usize,
    pub failed: usize,
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("message contains no 'event' or 'events' field")]
    MalformedEnvelope,
    #[error("message contains 0 events")]
    EmptyEnvelope,
    #[error("failed to determine device ID")]
    MissingDeviceId,
    #[error("failed to determine device type")]
    MissingDeviceType,
    #[error("cannot handle message type {0}")]
    UnsupportedMessageType(String),
    #[error("failed to determine event type")]
    MissingEventType,
    #[error("event data is not an object")]
    InvalidEventData,
    #[error("event content failed validation")]
    ContentValidationFailed(#[source] ValidationError),
    #[error("message header failed validation")]
    HeaderValidationFailed(#[source] ValidationError),
    #[error("unsupported payload content type {0:?}")]
    UnsupportedContentType(String),
    #[error("failed to decode message payload")]
    PayloadDecoding(#[source] PayloadError),
    #[error("failed to serialize event: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
}

impl RouterError {
    /// Stable name of the error class, used in dead-letter reasons and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::MalformedEnvelope => "MalformedEnvelope",
            RouterError::EmptyEnvelope => "EmptyEnvelope",
            RouterError::MissingDeviceId => "MissingDeviceId",
            RouterError::MissingDeviceType => "MissingDeviceType",
            RouterError::UnsupportedMessageType(_) => "UnsupportedMessageType",
            RouterError::MissingEventType => "MissingEventType",
            RouterError::InvalidEventData => "InvalidEventData",
            RouterError::ContentValidationFailed(_) => "ContentValidationFailed",
            RouterError::HeaderValidationFailed(_) => "HeaderValidationFailed",
            RouterError::UnsupportedContentType(_) => "UnsupportedContentType",
            RouterError::PayloadDecoding(_) => "PayloadDecoding",
            RouterError::Serialization(_) => "Serialization",
            RouterError::InternalInconsistency(_) => "InternalInconsistency",
        }
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        match self {
            RouterError::InternalInconsistency(_) | RouterError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            _ => (StatusCode::BAD_REQUEST, self.to_string()),
        }
        .into_response()
    }
}

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("invalid JSON payload")]
    Json(#[from] serde_json::Error),
    #[error("invalid CBOR payload")]
    Cbor(#[from] CborError),
}

/// Failure reported by the content-validation collaborator.
///
/// Carries zero or more structured reasons (one per failed rule) and may wrap
/// the error that caused it.
#[derive(Debug)]
pub struct ValidationError {
    pub message: String,
    pub reasons: Vec<Value>,
    inner: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reasons: Vec::new(),
            inner: None,
        }
    }

    pub fn with_reasons(mut self, reasons: Vec<Value>) -> Self {
        self.reasons = reasons;
        self
    }

    pub fn with_inner(mut self, inner: impl StdError + Send + Sync + 'static) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for ValidationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let inner: &(dyn StdError + 'static) = self.inner.as_deref()?;
        Some(inner)
    }
}
