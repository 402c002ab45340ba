use std::time::Duration;

use async_trait::async_trait;
use common_kafka::config::KafkaConfig;
use common_kafka::kafka_producer::{create_kafka_producer, KafkaContext};
use health::HealthHandle;
use metrics::counter;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use tracing::{debug, error, info_span, instrument, Instrument};

use crate::instruction::Instruction;
use crate::sinks::{PublishError, Publisher};

#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
}

impl KafkaPublisher {
    pub async fn new(
        config: &KafkaConfig,
        liveness: HealthHandle,
    ) -> Result<KafkaPublisher, KafkaError> {
        let producer = create_kafka_producer(config, liveness).await?;
        Ok(KafkaPublisher { producer })
    }

    pub fn from_producer(producer: FutureProducer<KafkaContext>) -> Self {
        KafkaPublisher { producer }
    }

    pub fn flush(&self) -> Result<(), KafkaError> {
        self.producer.flush(Duration::new(30, 0))
    }

    fn kafka_send(&self, instruction: &Instruction) -> Result<DeliveryFuture, PublishError> {
        match self.producer.send_result(FutureRecord {
            topic: instruction.topic.as_str(),
            payload: Some(instruction.payload.as_str()),
            partition: None,
            key: instruction.key.as_deref(),
            timestamp: None,
            headers: None,
        }) {
            Ok(ack) => Ok(ack),
            Err((e, _)) => match e.rdkafka_error_code() {
                Some(RDKafkaErrorCode::MessageSizeTooLarge) => Err(PublishError::TooBig {
                    topic: instruction.topic.clone(),
                }),
                _ => {
                    error!("failed to produce event: {}", e);
                    Err(PublishError::Retryable {
                        topic: instruction.topic.clone(),
                    })
                }
            },
        }
    }

    async fn process_ack(topic: &str, delivery: DeliveryFuture) -> Result<(), PublishError> {
        match delivery.await {
            Err(_) => {
                // Cancelled due to timeout while retrying
                counter!("event_router_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka before write timeout");
                Err(PublishError::Retryable {
                    topic: topic.to_string(),
                })
            }
            Ok(Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge), _))) => {
                // Rejected by broker due to message size
                Err(PublishError::TooBig {
                    topic: topic.to_string(),
                })
            }
            Ok(Err((err, _))) => {
                counter!("event_router_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka: {}", err);
                Err(PublishError::Retryable {
                    topic: topic.to_string(),
                })
            }
            Ok(Ok((partition, offset))) => {
                debug!(topic, partition, offset, "produced to Kafka");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    #[instrument(skip_all, fields(topic = instruction.topic.as_str()))]
    async fn publish(&self, instruction: &Instruction) -> Result<(), PublishError> {
        let ack = self.kafka_send(instruction)?;
        Self::process_ack(&instruction.topic, ack)
            .instrument(info_span!("ack_wait_one"))
            .await
    }
}
