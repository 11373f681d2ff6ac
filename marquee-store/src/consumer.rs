use marquee_shared::{deliver, Delivery, EventDeduplicator, EventHandler};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::Offset;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const RETRY_BACKOFF: Duration = Duration::from_secs(1);
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka consumer bound to one handler's routing keys.
///
/// Offsets are committed after the handler returns unless the delivery asks for a
/// retry; then the partition is rewound to the message after a backoff.
pub struct EventConsumer {
    consumer: StreamConsumer,
    handler: Arc<dyn EventHandler>,
    dedup: Arc<dyn EventDeduplicator>,
}

impl EventConsumer {
    pub fn new(
        brokers: &str,
        group_id: &str,
        handler: Arc<dyn EventHandler>,
        dedup: Arc<dyn EventDeduplicator>,
    ) -> Result<Self, rdkafka::error::KafkaError> {
        let group = format!("{}.{}", group_id, handler.name());
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", &group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        let topics: Vec<&str> = handler.routing_keys().iter().map(|t| t.routing_key()).collect();
        consumer.subscribe(&topics)?;

        info!(group = %group, topics = ?topics, "Event consumer subscribed");

        Ok(Self { consumer, handler, dedup })
    }

    pub async fn run(self) {
        loop {
            match self.consumer.recv().await {
                Err(e) => error!(consumer = self.handler.name(), "Kafka error: {}", e),
                Ok(m) => {
                    let outcome = match m.payload() {
                        Some(bytes) => deliver(self.handler.as_ref(), self.dedup.as_ref(), m.topic(), bytes).await,
                        None => {
                            warn!(consumer = self.handler.name(), topic = m.topic(), "Empty payload, dropping");
                            Delivery::Dropped
                        }
                    };

                    if !outcome.is_settled() {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                        let rewind = Offset::Offset(m.offset());
                        if let Err(e) = self.consumer.seek(m.topic(), m.partition(), rewind, SEEK_TIMEOUT) {
                            error!(consumer = self.handler.name(), "Rewind for redelivery failed: {}", e);
                        }
                        continue;
                    }

                    if let Err(e) = self.consumer.commit_message(&m, CommitMode::Async) {
                        error!(consumer = self.handler.name(), "Offset commit failed: {}", e);
                    }
                }
            }
        }
    }
}
