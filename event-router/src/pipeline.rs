use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument};

use crate::api::RouterError;
use crate::envelope::{event_type, DeviceIdentity, SingleEventEnvelope};
use crate::error_chain::flatten;
use crate::header::DeviceTypeOverride;
use crate::instruction::{dead_letter, EventDetails, Instruction};
use crate::prometheus::report_dead_letter;
use crate::remap::EventTypeRemapper;
use crate::topics::TopicResolver;
use crate::validation::EventValidator;

/// Process-lifetime routing configuration, read-only once built.
#[derive(Clone, Debug)]
pub struct RoutingRules {
    pub remapper: EventTypeRemapper,
    pub topics: TopicResolver,
    pub device_type_override: DeviceTypeOverride,
}

#[derive(Clone)]
pub struct EventPipeline {
    rules: RoutingRules,
    validator: Arc<dyn EventValidator>,
}

impl EventPipeline {
    pub fn new(rules: RoutingRules, validator: Arc<dyn EventValidator>) -> Self {
        Self { rules, validator }
    }

    pub fn rules(&self) -> &RoutingRules {
        &self.rules
    }

    pub fn validator(&self) -> &dyn EventValidator {
        self.validator.as_ref()
    }

    /// Maps every event to exactly one instruction, in input order.
    ///
    /// Only a failure to build a dead letter is returned as an error.
    #[instrument(skip_all, fields(device_id = %identity.device_id, events = events.len()))]
    pub fn process_events(
        &self,
        header: &Value,
        identity: &DeviceIdentity,
        events: Vec<Value>,
    ) -> Result<Vec<Instruction>, RouterError> {
        events
            .into_iter()
            .map(|event| self.process_event(header, identity, event))
            .collect()
    }

    fn process_event(
        &self,
        header: &Value,
        identity: &DeviceIdentity,
        mut event: Value,
    ) -> Result<Instruction, RouterError> {
        let raw_type = event_type(&event);

        let routed = match raw_type.as_deref() {
            None => Err(RouterError::MissingEventType),
            Some(raw_type) => self
                .validator
                .validate_content(&event)
                .map_err(RouterError::ContentValidationFailed)
                .and_then(|()| self.route_event(header, identity, raw_type, &mut event)),
        };

        match routed {
            Ok(instruction) => Ok(instruction),
            Err(err) => self.dead_letter_event(header, identity, raw_type, &event, &err),
        }
    }

    fn route_event(
        &self,
        header: &Value,
        identity: &DeviceIdentity,
        raw_type: &str,
        event: &mut Value,
    ) -> Result<Instruction, RouterError> {
        // Shape checks come first, a rejected event is dead-lettered unmodified
        match event.get("data") {
            None | Some(Value::Null) | Some(Value::Object(_)) => {}
            Some(_) => return Err(RouterError::InvalidEventData),
        }

        let metadata = event
            .get_mut("metadata")
            .and_then(Value::as_object_mut)
            .ok_or(RouterError::MissingEventType)?;

        let legacy_type = metadata.get("device_type").and_then(Value::as_str);
        if let Some(canonical) =
            legacy_type.and_then(|legacy| self.rules.device_type_override.rewrite(legacy))
        {
            info!(
                device_id = identity.device_id.as_str(),
                "event still published with legacy device type, rewriting to {}", canonical
            );
            let canonical = Value::String(canonical.to_string());
            metadata.insert("device_type".to_string(), canonical);
        }

        let topic = self.rules.topics.resolve(raw_type);
        metadata.insert(
            "event_type".to_string(),
            Value::String(self.rules.remapper.remap(raw_type)),
        );
        let device_id = metadata.get("device_id").cloned();

        let fields = event
            .as_object_mut()
            .ok_or(RouterError::InvalidEventData)?;
        let data = fields
            .entry("data")
            .or_insert_with(|| Value::Object(Map::new()));
        if data.is_null() {
            *data = Value::Object(Map::new());
        }
        let data = data.as_object_mut().ok_or(RouterError::InvalidEventData)?;
        if let Some(device_id) = device_id {
            data.insert("device_id".to_string(), device_id);
        }
        if let Some(asset_id) = &identity.asset_id {
            data.insert("assetId".to_string(), asset_id.clone());
        }

        let payload = serde_json::to_string(&SingleEventEnvelope::new(header, event))
            .map_err(RouterError::Serialization)?;

        debug!(
            device_type = identity.device_type.as_str(),
            device_id = identity.device_id.as_str(),
            event_type = raw_type,
            topic,
            "routing event"
        );

        Ok(Instruction::publish(
            topic,
            identity.device_id.clone(),
            payload,
            EventDetails {
                device_id: Some(identity.device_id.clone()),
                device_type: Some(identity.device_type.clone()),
                event_type: Some(raw_type.to_string()),
            },
        ))
    }

    fn dead_letter_event(
        &self,
        header: &Value,
        identity: &DeviceIdentity,
        raw_type: Option<String>,
        event: &Value,
        err: &RouterError,
    ) -> Result<Instruction, RouterError> {
        let flattened = flatten(err);
        let reason = flattened.reason();
        error!(
            device_id = identity.device_id.as_str(),
            event_type = raw_type.as_deref(),
            reasons = %serde_json::Value::Array(flattened.reasons),
            "dead-lettering event: {}", reason
        );
        report_dead_letter("event", err.kind());

        dead_letter(
            self.rules.topics.dead_letter(),
            EventDetails {
                device_id: Some(identity.device_id.clone()),
                device_type: Some(identity.device_type.clone()),
                event_type: raw_type,
            },
            &reason,
            &SingleEventEnvelope::new(header, event),
        )
    }
}
