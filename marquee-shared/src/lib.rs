pub mod channel;
pub mod envelope;
pub mod models;

pub use channel::{deliver, Delivery, EventDeduplicator, EventHandler, EventPublisher};
pub use envelope::{EventEnvelope, EventError, EventType, SagaEvent, SCHEMA_VERSION};
