use marquee_core::{BookingStatus, UnlockReason};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeatLockedEvent {
    /// Holder that took the locks (user id or guest session id)
    pub user_id: String,
    pub showtime_id: String,
    pub seat_ids: Vec<String>,
    pub ttl_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeatUnlockedEvent {
    pub showtime_id: String,
    pub seat_ids: Vec<String>,
    pub reason: UnlockReason,
    /// Holder the seats were taken from, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingSeatMappedEvent {
    pub booking_id: Uuid,
    pub showtime_id: String,
    pub seat_ids: Vec<String>,
    /// Session holder whose locks now belong to the booking
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingStatusUpdatedEvent {
    pub booking_id: Uuid,
    pub showtime_id: String,
    pub user_id: Option<String>,
    pub seat_ids: Vec<String>,
    pub new_status: BookingStatus,
    pub previous_status: BookingStatus,
}

/// Shared by PaymentBookingSuccess and PaymentFailed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcomeEvent {
    pub payment_id: String,
    pub booking_id: Uuid,
    pub showtime_id: String,
    pub user_id: Option<String>,
    pub amount: i64,
    pub method: String,
    pub seat_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeatReleaseRequestEvent {
    pub showtime_id: String,
    pub seat_ids: Vec<String>,
    #[serde(default = "default_release_reason")]
    pub reason: UnlockReason,
}

fn default_release_reason() -> UnlockReason {
    UnlockReason::SystemReleased
}
