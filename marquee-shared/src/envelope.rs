use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::events::{
    BookingSeatMappedEvent, BookingStatusUpdatedEvent, PaymentOutcomeEvent, SeatLockedEvent,
    SeatReleaseRequestEvent, SeatUnlockedEvent,
};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Unknown routing key: {0}")]
    UnknownRoutingKey(String),

    #[error("Malformed event on {routing_key}: {reason}")]
    Malformed { routing_key: String, reason: String },

    #[error("Event {event_id} has type {actual} but arrived on {expected}")]
    TypeMismatch {
        event_id: Uuid,
        expected: EventType,
        actual: String,
    },

    #[error("Unsupported schema version {0}")]
    UnsupportedVersion(u32),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Dedup store failed: {0}")]
    Dedup(String),
}

/// Every event type has exactly one routing key (the Kafka topic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    SeatLocked,
    SeatUnlocked,
    BookingSeatMapped,
    BookingStatusUpdated,
    PaymentBookingSuccess,
    PaymentFailed,
    SeatReleaseRequest,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::SeatLocked,
        EventType::SeatUnlocked,
        EventType::BookingSeatMapped,
        EventType::BookingStatusUpdated,
        EventType::PaymentBookingSuccess,
        EventType::PaymentFailed,
        EventType::SeatReleaseRequest,
    ];

    pub fn routing_key(&self) -> &'static str {
        match self {
            EventType::SeatLocked => "seat.locked",
            EventType::SeatUnlocked => "seat.unlocked",
            EventType::BookingSeatMapped => "booking.seat-mapped",
            EventType::BookingStatusUpdated => "booking.status-updated",
            EventType::PaymentBookingSuccess => "payment.booking-success",
            EventType::PaymentFailed => "payment.failed",
            EventType::SeatReleaseRequest => "seat.release-request",
        }
    }

    pub fn from_routing_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.routing_key() == key)
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventType::SeatLocked => "SeatLocked",
            EventType::SeatUnlocked => "SeatUnlocked",
            EventType::BookingSeatMapped => "BookingSeatMapped",
            EventType::BookingStatusUpdated => "BookingStatusUpdated",
            EventType::PaymentBookingSuccess => "PaymentBookingSuccess",
            EventType::PaymentFailed => "PaymentFailed",
            EventType::SeatReleaseRequest => "SeatReleaseRequest",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SagaEvent {
    SeatLocked(SeatLockedEvent),
    SeatUnlocked(SeatUnlockedEvent),
    BookingSeatMapped(BookingSeatMappedEvent),
    BookingStatusUpdated(BookingStatusUpdatedEvent),
    PaymentBookingSuccess(PaymentOutcomeEvent),
    PaymentFailed(PaymentOutcomeEvent),
    SeatReleaseRequest(SeatReleaseRequestEvent),
}

impl SagaEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            SagaEvent::SeatLocked(_) => EventType::SeatLocked,
            SagaEvent::SeatUnlocked(_) => EventType::SeatUnlocked,
            SagaEvent::BookingSeatMapped(_) => EventType::BookingSeatMapped,
            SagaEvent::BookingStatusUpdated(_) => EventType::BookingStatusUpdated,
            SagaEvent::PaymentBookingSuccess(_) => EventType::PaymentBookingSuccess,
            SagaEvent::PaymentFailed(_) => EventType::PaymentFailed,
            SagaEvent::SeatReleaseRequest(_) => EventType::SeatReleaseRequest,
        }
    }

    pub fn showtime_id(&self) -> &str {
        match self {
            SagaEvent::SeatLocked(e) => &e.showtime_id,
            SagaEvent::SeatUnlocked(e) => &e.showtime_id,
            SagaEvent::BookingSeatMapped(e) => &e.showtime_id,
            SagaEvent::BookingStatusUpdated(e) => &e.showtime_id,
            SagaEvent::PaymentBookingSuccess(e) | SagaEvent::PaymentFailed(e) => &e.showtime_id,
            SagaEvent::SeatReleaseRequest(e) => &e.showtime_id,
        }
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            SagaEvent::SeatLocked(e) => serde_json::to_value(e),
            SagaEvent::SeatUnlocked(e) => serde_json::to_value(e),
            SagaEvent::BookingSeatMapped(e) => serde_json::to_value(e),
            SagaEvent::BookingStatusUpdated(e) => serde_json::to_value(e),
            SagaEvent::PaymentBookingSuccess(e) | SagaEvent::PaymentFailed(e) => serde_json::to_value(e),
            SagaEvent::SeatReleaseRequest(e) => serde_json::to_value(e),
        }
    }

    fn from_payload(event_type: EventType, payload: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match event_type {
            EventType::SeatLocked => SagaEvent::SeatLocked(serde_json::from_value(payload)?),
            EventType::SeatUnlocked => SagaEvent::SeatUnlocked(serde_json::from_value(payload)?),
            EventType::BookingSeatMapped => SagaEvent::BookingSeatMapped(serde_json::from_value(payload)?),
            EventType::BookingStatusUpdated => SagaEvent::BookingStatusUpdated(serde_json::from_value(payload)?),
            EventType::PaymentBookingSuccess => SagaEvent::PaymentBookingSuccess(serde_json::from_value(payload)?),
            EventType::PaymentFailed => SagaEvent::PaymentFailed(serde_json::from_value(payload)?),
            EventType::SeatReleaseRequest => SagaEvent::SeatReleaseRequest(serde_json::from_value(payload)?),
        })
    }
}

/// Wire form: `{eventId, type, schemaVersion, occurredAt, payload}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    event_id: Uuid,
    #[serde(rename = "type")]
    event_type: String,
    schema_version: u32,
    occurred_at: DateTime<Utc>,
    payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub event: SagaEvent,
}

impl EventEnvelope {
    pub fn new(event: SagaEvent) -> Self {
        Self::at(event, Utc::now())
    }

    pub fn at(event: SagaEvent, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            schema_version: SCHEMA_VERSION,
            occurred_at,
            event,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }

    pub fn routing_key(&self) -> &'static str {
        self.event_type().routing_key()
    }

    /// Events of one showtime share a partition.
    pub fn partition_key(&self) -> &str {
        self.event.showtime_id()
    }

    pub fn encode(&self) -> Result<String, EventError> {
        let malformed = |e: serde_json::Error| EventError::Malformed {
            routing_key: self.routing_key().to_string(),
            reason: e.to_string(),
        };

        let wire = WireEnvelope {
            event_id: self.event_id,
            event_type: self.event_type().name().to_string(),
            schema_version: self.schema_version,
            occurred_at: self.occurred_at,
            payload: self.event.payload().map_err(malformed)?,
        };

        serde_json::to_string(&wire).map_err(malformed)
    }

    /// Decodes a delivery; the routing key alone decides which payload type is expected.
    pub fn decode(routing_key: &str, bytes: &[u8]) -> Result<Self, EventError> {
        let expected = EventType::from_routing_key(routing_key)
            .ok_or_else(|| EventError::UnknownRoutingKey(routing_key.to_string()))?;

        let malformed = |e: serde_json::Error| EventError::Malformed {
            routing_key: routing_key.to_string(),
            reason: e.to_string(),
        };

        let wire: WireEnvelope = serde_json::from_slice(bytes).map_err(malformed)?;

        if wire.schema_version == 0 || wire.schema_version > SCHEMA_VERSION {
            return Err(EventError::UnsupportedVersion(wire.schema_version));
        }

        if wire.event_type != expected.name() {
            return Err(EventError::TypeMismatch {
                event_id: wire.event_id,
                expected,
                actual: wire.event_type,
            });
        }

        let event = SagaEvent::from_payload(expected, wire.payload).map_err(malformed)?;

        Ok(Self {
            event_id: wire.event_id,
            schema_version: wire.schema_version,
            occurred_at: wire.occurred_at,
            event,
        })
    }
}
