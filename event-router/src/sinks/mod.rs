use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, instrument};

use crate::instruction::{Action, Instruction};
use crate::prometheus::{report_publish_error, report_published};

pub mod kafka;
pub mod print;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PublishError {
    #[error("failed to produce to {topic}")]
    Retryable { topic: String },
    #[error("message for {topic} exceeds the broker size limit")]
    TooBig { topic: String },
}

impl PublishError {
    pub fn cause(&self) -> &'static str {
        match self {
            PublishError::Retryable { .. } => "retryable",
            PublishError::TooBig { .. } => "too_big",
        }
    }
}

/// Sends one routed message to the bus.
#[async_trait]
pub trait Publisher {
    async fn publish(&self, instruction: &Instruction) -> Result<(), PublishError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: usize,
    pub dead_lettered: usize,
    pub failed: usize,
}

/// Publishes instructions one at a time, in order. A failed send is logged
/// and counted, later instructions are still sent.
#[instrument(skip_all, fields(instructions = instructions.len()))]
pub async fn publish_all(
    publisher: &(dyn Publisher + Send + Sync),
    instructions: &[Instruction],
) -> PublishSummary {
    let mut summary = PublishSummary::default();

    for instruction in instructions {
        match publisher.publish(instruction).await {
            Ok(()) => match instruction.action {
                Action::Publish => summary.published += 1,
                Action::DeadLetter => summary.dead_lettered += 1,
            },
            Err(err) => {
                error!(
                    topic = instruction.topic.as_str(),
                    device_id = instruction.details.device_id.as_deref(),
                    event_type = instruction.details.event_type.as_deref(),
                    "failed to publish: {}", err
                );
                report_publish_error(err.cause());
                summary.failed += 1;
            }
        }
    }

    report_published(summary.published as u64);
    summary
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::instruction::{dead_letter, EventDetails};

    #[derive(Default)]
    struct FlakyPublisher {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Publisher for FlakyPublisher {
        async fn publish(&self, instruction: &Instruction) -> Result<(), PublishError> {
            if instruction.payload.contains("fail") {
                return Err(PublishError::Retryable {
                    topic: instruction.topic.clone(),
                });
            }
            self.sent
                .lock()
                .expect("poisoned")
                .push(instruction.payload.clone());
            Ok(())
        }
    }

    fn publish(payload: &str) -> Instruction {
        Instruction::publish("er.event.sa", "d1".to_string(), payload.to_string(), EventDetails::default())
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_instructions() {
        let publisher = FlakyPublisher::default();
        let instructions = vec![
            publish("first"),
            publish("fail"),
            dead_letter("dead.letter", EventDetails::default(), "reason", &"third")
                .expect("serializable"),
            publish("fourth"),
        ];

        let summary = publish_all(&publisher, &instructions).await;
        assert_eq!(
            summary,
            PublishSummary {
                published: 2,
                dead_lettered: 1,
                failed: 1,
            }
        );

        let sent = publisher.sent.lock().expect("poisoned").clone();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], "first");
        assert!(sent[1].contains("third"));
        assert_eq!(sent[2], "fourth");
    }
}
