use async_trait::async_trait;
use marquee_shared::{EventEnvelope, EventError, EventPublisher};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish_raw(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(5))).await {
            Ok(delivery) => {
                info!("Sent message to {}/{}: {:?}", topic, key, delivery);
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl EventPublisher for EventProducer {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), EventError> {
        let payload = envelope.encode()?;
        self.publish_raw(envelope.routing_key(), envelope.partition_key(), &payload)
            .await
            .map_err(|e| EventError::Publish(e.to_string()))
    }
}
