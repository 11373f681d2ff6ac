use async_trait::async_trait;
use marquee_core::SagaError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::envelope::{EventEnvelope, EventError, EventType};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), EventError>;
}

/// Remembers which event ids a consumer has already processed.
#[async_trait]
pub trait EventDeduplicator: Send + Sync {
    /// True exactly once per (consumer, event id).
    async fn first_delivery(&self, consumer: &str, event_id: Uuid) -> Result<bool, EventError>;

    /// Forget a delivery so a redelivery is processed again.
    async fn forget(&self, consumer: &str, event_id: Uuid) -> Result<(), EventError>;
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Consumer name, also the dedup namespace and Kafka group suffix.
    fn name(&self) -> &'static str;

    fn routing_keys(&self) -> &'static [EventType];

    async fn handle(&self, envelope: EventEnvelope) -> Result<(), SagaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Handled,
    Duplicate,
    Ignored,
    Dropped,
    /// The store was unavailable; the dedup marker is cleared and the transport
    /// should deliver the message again rather than acknowledge it.
    Retry,
}

impl Delivery {
    /// Whether the transport may acknowledge the message.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Delivery::Retry)
    }
}

/// Decode, deduplicate and dispatch one delivery. Never fails: store outages come
/// back as `Retry`, anything else that cannot be applied is logged and dropped,
/// leaving the sweeper as the backstop.
pub async fn deliver(
    handler: &dyn EventHandler,
    dedup: &dyn EventDeduplicator,
    routing_key: &str,
    bytes: &[u8],
) -> Delivery {
    let envelope = match EventEnvelope::decode(routing_key, bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(consumer = handler.name(), routing_key, error = %e, "Dropping undecodable event");
            return Delivery::Dropped;
        }
    };

    if !handler.routing_keys().contains(&envelope.event_type()) {
        debug!(consumer = handler.name(), routing_key, "No binding for routing key, ignoring");
        return Delivery::Ignored;
    }

    let event_id = envelope.event_id;
    match dedup.first_delivery(handler.name(), event_id).await {
        Ok(true) => {}
        Ok(false) => {
            info!(consumer = handler.name(), %event_id, routing_key, "Duplicate delivery skipped");
            return Delivery::Duplicate;
        }
        Err(e) => {
            // Handlers are idempotent by state check, so processing twice is safe.
            warn!(consumer = handler.name(), %event_id, error = %e, "Dedup unavailable, processing anyway");
        }
    }

    match handler.handle(envelope).await {
        Ok(()) => Delivery::Handled,
        Err(SagaError::Store(e)) => {
            warn!(consumer = handler.name(), %event_id, routing_key, error = %e, "Store unavailable, event will be redelivered");
            if let Err(err) = dedup.forget(handler.name(), event_id).await {
                warn!(consumer = handler.name(), %event_id, error = %err, "Failed to clear dedup marker");
            }
            Delivery::Retry
        }
        Err(e) => {
            warn!(consumer = handler.name(), %event_id, routing_key, error = %e, "Dropping event that could not be applied");
            Delivery::Dropped
        }
    }
}
