use serde::Serialize;

use crate::api::RouterError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Publish,
    DeadLetter,
}

/// Identity of the routed event, carried for logging and metrics only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    pub device_id: Option<String>,
    pub device_type: Option<String>,
    pub event_type: Option<String>,
}

/// One message to hand to the publisher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub action: Action,
    pub topic: String,
    pub key: Option<String>,
    pub payload: String,
    pub details: EventDetails,
}

impl Instruction {
    pub fn publish(topic: &str, key: String, payload: String, details: EventDetails) -> Self {
        Self {
            action: Action::Publish,
            topic: topic.to_string(),
            key: Some(key),
            payload,
            details,
        }
    }

    pub fn is_dead_letter(&self) -> bool {
        self.action == Action::DeadLetter
    }
}

/// Payload written to the dead-letter topic.
#[derive(Serialize)]
pub struct DeadLetter<'a, E: Serialize> {
    pub device_type: Option<&'a str>,
    pub device_id: Option<&'a str>,
    pub event_type: Option<&'a str>,
    pub reason: &'a str,
    pub event: &'a E,
}

/// Builds the dead-letter instruction for `event`, keyed by device id.
///
/// Failing to serialize the dead letter itself leaves nowhere to put the
/// event, this is reported as an internal inconsistency.
pub fn dead_letter<E: Serialize>(
    topic: &str,
    details: EventDetails,
    reason: &str,
    event: &E,
) -> Result<Instruction, RouterError> {
    let payload = serde_json::to_string(&DeadLetter {
        device_type: details.device_type.as_deref(),
        device_id: details.device_id.as_deref(),
        event_type: details.event_type.as_deref(),
        reason,
        event,
    })
    .map_err(|e| {
        RouterError::InternalInconsistency(format!("failed to serialize dead letter: {e}"))
    })?;

    Ok(Instruction {
        action: Action::DeadLetter,
        topic: topic.to_string(),
        key: details.device_id.clone(),
        payload,
        details,
    })
}
