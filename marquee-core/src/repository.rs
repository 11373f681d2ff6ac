use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{Booking, BookingStatus};
use crate::error::SagaResult;
use crate::lock::{CreateOutcome, SeatKey, SeatLock};

/// TTL-aware key/value store holding one entry per held seat.
///
/// Every method is a single atomic operation on the backing store; callers never
/// combine a read with a later write to make a decision.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create the entry if the key is absent or its entry has expired at `now`.
    async fn try_create(&self, key: &SeatKey, lock: &SeatLock, now: DateTime<Utc>) -> SagaResult<CreateOutcome>;

    async fn get(&self, key: &SeatKey) -> SagaResult<Option<SeatLock>>;

    /// Overwrite `expires_at` of a live entry, optionally only for `holder`.
    /// Returns false when the entry is absent, expired or held by someone else.
    async fn extend(
        &self,
        key: &SeatKey,
        holder: Option<&str>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SagaResult<bool>;

    /// Swap the holder of a live entry, keeping its expiry. Succeeds without a
    /// write when `to` already holds it.
    async fn rebind(
        &self,
        key: &SeatKey,
        from: Option<&str>,
        to: &str,
        now: DateTime<Utc>,
    ) -> SagaResult<bool>;

    /// Unconditional delete, returning the removed entry.
    async fn delete(&self, key: &SeatKey) -> SagaResult<Option<SeatLock>>;

    /// Delete only if `holder` still owns the entry.
    async fn delete_if_holder(&self, key: &SeatKey, holder: &str) -> SagaResult<Option<SeatLock>>;

    /// Delete only if the entry is still expired at call time.
    async fn delete_if_expired(&self, key: &SeatKey, now: DateTime<Utc>) -> SagaResult<Option<SeatLock>>;

    /// Enumerate entries, optionally restricted to one showtime.
    async fn scan(&self, showtime_id: Option<&str>, batch_size: usize) -> SagaResult<Vec<(SeatKey, SeatLock)>>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: &Booking) -> SagaResult<()>;

    async fn get(&self, id: Uuid) -> SagaResult<Option<Booking>>;

    /// Compare-and-set on status; false when the stored status is no longer `expected`.
    async fn update_status(
        &self,
        id: Uuid,
        expected: BookingStatus,
        next: BookingStatus,
        at: DateTime<Utc>,
    ) -> SagaResult<bool>;

    /// Bookings in SEAT_LOCKED or AWAITING_PAYMENT sharing any seat with `seat_ids`.
    async fn find_active_by_seats(&self, showtime_id: &str, seat_ids: &[String]) -> SagaResult<Vec<Booking>>;
}

/// Permanent sold-seat record of a showtime.
#[async_trait]
pub trait SeatMapRepository: Send + Sync {
    /// Marks seats sold to `booking_id`; returns seats already sold to another booking.
    async fn mark_booked(&self, showtime_id: &str, seat_ids: &[String], booking_id: Uuid) -> SagaResult<Vec<String>>;

    /// Subset of `seat_ids` already sold.
    async fn booked_seats(&self, showtime_id: &str, seat_ids: &[String]) -> SagaResult<Vec<String>>;
}
