use crate::booking::BookingStatus;
use crate::saga::SagaTrigger;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    /// Another holder owns at least one of the requested seats.
    #[error("Seats unavailable for showtime {showtime_id}: {}", seats.join(", "))]
    SeatUnavailable {
        showtime_id: String,
        seats: Vec<String>,
    },

    /// The hold is gone: expired, never taken, or owned by someone else.
    #[error("Seat locks not found for showtime {showtime_id}: {}", seats.join(", "))]
    LockNotFound {
        showtime_id: String,
        seats: Vec<String>,
    },

    #[error("Invalid transition from {from} on {trigger:?}")]
    InvalidTransition {
        from: BookingStatus,
        trigger: SagaTrigger,
    },

    #[error("Booking {booking_id} is already {status}")]
    AlreadyTerminal {
        booking_id: Uuid,
        status: BookingStatus,
    },

    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Event delivery failed: {0}")]
    EventDelivery(String),

    #[error("Downstream unavailable: {0}")]
    DownstreamUnavailable(String),
}

impl SagaError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }

    /// Conflicts the client resolves by picking other seats or restarting checkout.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SeatUnavailable { .. } | Self::LockNotFound { .. })
    }
}

pub type SagaResult<T> = Result<T, SagaError>;
