use async_trait::async_trait;
use tracing::info;

use crate::instruction::Instruction;
use crate::sinks::{PublishError, Publisher};

/// Logs instructions instead of producing them, for local debugging.
pub struct PrintPublisher {}

#[async_trait]
impl Publisher for PrintPublisher {
    async fn publish(&self, instruction: &Instruction) -> Result<(), PublishError> {
        info!(
            action = ?instruction.action,
            topic = instruction.topic.as_str(),
            key = instruction.key.as_deref(),
            "instruction: {}",
            instruction.payload
        );
        Ok(())
    }
}
