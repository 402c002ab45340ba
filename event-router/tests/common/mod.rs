#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use event_router::api::ValidationError;
use event_router::envelope::event_type;
use event_router::header::DeviceTypeOverride;
use event_router::instruction::Instruction;
use event_router::pipeline::{EventPipeline, RoutingRules};
use event_router::processor::MessageProcessor;
use event_router::remap::EventTypeRemapper;
use event_router::router::{router, FatalSignal};
use event_router::sinks::{PublishError, Publisher};
use event_router::topics::{parse_topic_overrides, TopicResolver};
use event_router::validation::{EventValidator, PassthroughValidator};
use health::HealthRegistry;
use serde_json::{json, Value};
use tower::ServiceExt;

pub const DESTINATION_TOPIC: &str = "er.event.sa";
pub const DEAD_LETTER_TOPIC: &str = "dead.letter";

#[derive(Clone, Default)]
pub struct MemoryPublisher {
    sent: Arc<Mutex<Vec<Instruction>>>,
}

impl MemoryPublisher {
    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn instructions(&self) -> Vec<Instruction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.instructions()
            .iter()
            .map(|i| serde_json::from_str(&i.payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, instruction: &Instruction) -> Result<(), PublishError> {
        self.sent.lock().unwrap().push(instruction.clone());
        Ok(())
    }
}

/// Rejects every event whose raw type is in the list.
pub struct RejectEventTypes(pub Vec<&'static str>);

impl EventValidator for RejectEventTypes {
    fn validate_header(&self, _message: &Value) -> Result<(), ValidationError> {
        Ok(())
    }

    fn validate_content(&self, event: &Value) -> Result<(), ValidationError> {
        match event_type(event) {
            Some(t) if self.0.iter().any(|rejected| *rejected == t) => Err(ValidationError::new(format!(
                "{t} rejected"
            ))
            .with_reasons(vec![json!({"message": "required property 'speed'"})])),
            _ => Ok(()),
        }
    }
}

pub fn processor_with(
    validator: Arc<dyn EventValidator>,
    topic_overrides: &str,
) -> MessageProcessor {
    let rules = RoutingRules {
        remapper: EventTypeRemapper::bundled().unwrap(),
        topics: TopicResolver::new(
            DESTINATION_TOPIC,
            DEAD_LETTER_TOPIC,
            parse_topic_overrides(topic_overrides),
        ),
        device_type_override: DeviceTypeOverride::new("fm1", "vam"),
    };
    MessageProcessor::new(EventPipeline::new(rules, validator))
}

pub fn processor() -> MessageProcessor {
    processor_with(Arc::new(PassthroughValidator), "")
}

/// Router with a live producer component, backed by `publisher`.
pub async fn build_app(
    processor: MessageProcessor,
    publisher: MemoryPublisher,
) -> (Router, FatalSignal) {
    let fatal = FatalSignal::default();
    let liveness = HealthRegistry::new("liveness");
    liveness
        .register("rdkafka", Duration::from_secs(30))
        .await
        .report_healthy()
        .await;
    // reports are applied by a background task
    for _ in 0..100 {
        if liveness.get_status().healthy {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    (
        router(processor, publisher, liveness, fatal.clone(), false),
        fatal,
    )
}

pub async fn post(app: Router, content_type: &str, body: Vec<u8>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/event")
        .header("content-type", content_type)
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

pub fn header(device_id: Value) -> Value {
    json!({"device_id": device_id, "device_type": "VAM", "message_type": "Event"})
}

pub fn event(event_type: &str) -> Value {
    json!({"metadata": {"event_type": event_type, "device_id": "d1"}, "data": {}})
}

pub fn message(events: Vec<Value>) -> Value {
    json!({"header": header(json!("d1")), "body": {"events": events}})
}

pub fn by_topic(instructions: &[Instruction]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for instruction in instructions {
        *counts.entry(instruction.topic.clone()).or_insert(0) += 1;
    }
    counts
}
