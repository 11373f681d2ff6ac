use chrono::{DateTime, Duration, Utc};
use marquee_core::booking::validate_seat_ids;
use marquee_core::{
    Booking, BookingRepository, BookingStatus, Clock, RequestContext, SagaError, SagaResult, SagaTrigger,
    UnlockReason,
};
use marquee_shared::models::events::{BookingSeatMappedEvent, BookingStatusUpdatedEvent};
use marquee_shared::{EventEnvelope, EventPublisher, SagaEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::client::SeatLockClient;

#[derive(Debug, Clone)]
pub struct BookingSettings {
    pub payment_hold: Duration,
    pub currency: String,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            payment_hold: Duration::seconds(600),
            currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub showtime_id: String,
    pub seat_ids: Vec<String>,
    pub total_amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHold {
    pub booking: Booking,
    pub hold_expires_at: DateTime<Utc>,
}

/// Whether a transition is announced on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Broadcast {
    Emit,
    Silent,
}

/// Booking side of the saga. Owns every booking status change; seat holds are
/// only touched through the [`SeatLockClient`] or by events the showtime side reacts to.
pub struct BookingCoordinator {
    bookings: Arc<dyn BookingRepository>,
    seat_locks: Arc<dyn SeatLockClient>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    settings: BookingSettings,
}

impl BookingCoordinator {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        seat_locks: Arc<dyn SeatLockClient>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        settings: BookingSettings,
    ) -> Self {
        Self {
            bookings,
            seat_locks,
            publisher,
            clock,
            settings,
        }
    }

    /// Turns the caller's session holds into a booking in SEAT_LOCKED.
    pub async fn create_booking(&self, ctx: &RequestContext, request: NewBooking) -> SagaResult<Booking> {
        // 1. Validate and build the aggregate
        if request.showtime_id.is_empty() {
            return Err(SagaError::Validation("Showtime id is required".to_string()));
        }
        validate_seat_ids(&request.seat_ids)?;

        let now = self.clock.now();
        let mut booking = Booking::new(
            Uuid::new_v4(),
            request.showtime_id,
            ctx.user_id().map(str::to_string),
            ctx.holder_id().to_string(),
            request.seat_ids,
            request.total_amount,
            request.currency.unwrap_or_else(|| self.settings.currency.clone()),
            now,
        )?;

        // 2. Move the session holds onto the booking id
        self.seat_locks
            .bind_holder(booking.id, &booking.showtime_id, &booking.seat_ids, ctx.holder_id())
            .await?;

        // 3. Persist as SEAT_LOCKED
        let previous = booking.apply(SagaTrigger::SeatsLocked, now)?;
        if let Err(e) = self.bookings.insert(&booking).await {
            error!(booking_id = %booking.id, error = %e, "Failed to persist booking, releasing holds");
            let holder = booking.lock_holder();
            if let Err(release_err) = self
                .seat_locks
                .release(&booking.showtime_id, &booking.seat_ids, UnlockReason::Cancelled, Some(&holder))
                .await
            {
                error!(booking_id = %booking.id, error = %release_err, "Release after failed insert also failed");
            }
            return Err(e);
        }

        info!(booking_id = %booking.id, showtime_id = %booking.showtime_id, seats = ?booking.seat_ids, "Booking created");

        // 4. Announce
        self.publish(SagaEvent::BookingSeatMapped(BookingSeatMappedEvent {
            booking_id: booking.id,
            showtime_id: booking.showtime_id.clone(),
            seat_ids: booking.seat_ids.clone(),
            user_id: ctx.holder_id().to_string(),
        }))
        .await;
        self.announce(&booking, previous).await;

        Ok(booking)
    }

    /// SEAT_LOCKED → AWAITING_PAYMENT, stretching the holds to the payment window.
    pub async fn initiate_payment(&self, ctx: &RequestContext, booking_id: Uuid) -> SagaResult<PaymentHold> {
        let mut booking = self.get_booking(ctx, booking_id).await?;

        // Reject illegal starts before touching the holds.
        if booking.status.is_terminal() {
            return Err(SagaError::AlreadyTerminal {
                booking_id,
                status: booking.status,
            });
        }
        booking.status.apply(SagaTrigger::PaymentInitiated)?;

        let ttl_seconds = self.settings.payment_hold.num_seconds().max(1) as u64;
        let hold_expires_at = match self
            .seat_locks
            .extend(&booking.showtime_id, &booking.seat_ids, &booking.lock_holder(), ttl_seconds)
            .await
        {
            Ok(expires_at) => expires_at,
            Err(e @ SagaError::LockNotFound { .. }) => {
                warn!(%booking_id, error = %e, "Holds gone before payment, expiring booking");
                match self.transition(&mut booking, SagaTrigger::HoldExpired, Broadcast::Emit).await {
                    Ok(_) | Err(SagaError::AlreadyTerminal { .. }) | Err(SagaError::InvalidTransition { .. }) => {}
                    Err(other) => return Err(other),
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        self.transition(&mut booking, SagaTrigger::PaymentInitiated, Broadcast::Emit)
            .await?;

        Ok(PaymentHold {
            booking,
            hold_expires_at,
        })
    }

    pub async fn cancel_booking(&self, ctx: &RequestContext, booking_id: Uuid) -> SagaResult<Booking> {
        let mut booking = self.get_booking(ctx, booking_id).await?;
        self.transition(&mut booking, SagaTrigger::CancelRequested, Broadcast::Emit)
            .await?;
        Ok(booking)
    }

    pub async fn get_booking(&self, ctx: &RequestContext, booking_id: Uuid) -> SagaResult<Booking> {
        let booking = self.load(booking_id).await?;
        if !ctx.is_admin() && !booking.is_owned_by(&ctx.subject) {
            return Err(SagaError::Forbidden(format!("Booking {} belongs to another user", booking_id)));
        }
        Ok(booking)
    }

    pub(crate) fn bookings(&self) -> &dyn BookingRepository {
        self.bookings.as_ref()
    }

    pub(crate) async fn load(&self, booking_id: Uuid) -> SagaResult<Booking> {
        self.bookings
            .get(booking_id)
            .await?
            .ok_or(SagaError::BookingNotFound(booking_id))
    }

    /// Guarded transition persisted with compare-and-set on the previous status.
    /// Returns the status the booking left.
    pub(crate) async fn transition(
        &self,
        booking: &mut Booking,
        trigger: SagaTrigger,
        broadcast: Broadcast,
    ) -> SagaResult<BookingStatus> {
        let now = self.clock.now();
        let previous = booking.apply(trigger, now)?;

        if !self
            .bookings
            .update_status(booking.id, previous, booking.status, now)
            .await?
        {
            // Someone else moved it first; report against what is stored now.
            let current = self.load(booking.id).await?;
            *booking = current;
            info!(booking_id = %booking.id, status = %booking.status, ?trigger, "Lost transition race");
            return Err(if booking.status.is_terminal() {
                SagaError::AlreadyTerminal {
                    booking_id: booking.id,
                    status: booking.status,
                }
            } else {
                SagaError::InvalidTransition {
                    from: booking.status,
                    trigger,
                }
            });
        }

        info!(booking_id = %booking.id, from = %previous, to = %booking.status, "Booking transitioned");

        if broadcast == Broadcast::Emit {
            self.announce(booking, previous).await;
        }
        Ok(previous)
    }

    async fn announce(&self, booking: &Booking, previous: BookingStatus) {
        self.publish(SagaEvent::BookingStatusUpdated(BookingStatusUpdatedEvent {
            booking_id: booking.id,
            showtime_id: booking.showtime_id.clone(),
            user_id: booking.user_id.clone(),
            seat_ids: booking.seat_ids.clone(),
            new_status: booking.status,
            previous_status: previous,
        }))
        .await;
    }

    async fn publish(&self, event: SagaEvent) {
        let envelope = EventEnvelope::new(event);
        if let Err(e) = self.publisher.publish(&envelope).await {
            let err = SagaError::DownstreamUnavailable(e.to_string());
            error!(event_id = %envelope.event_id, routing_key = envelope.routing_key(), error = %err, "Event publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LocalSeatLockClient;
    use chrono::TimeZone;
    use marquee_core::{ManualClock, Role};
    use marquee_shared::EventType;
    use marquee_showtime::{LockSettings, SeatLockService};
    use marquee_store::{InMemoryBookingRepository, InMemoryChannel, InMemoryLockStore, InMemorySeatMap};

    struct Fixture {
        coordinator: BookingCoordinator,
        seats: Arc<SeatLockService>,
        channel: Arc<InMemoryChannel>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let channel = Arc::new(InMemoryChannel::new());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let seats = Arc::new(SeatLockService::new(
            Arc::new(InMemoryLockStore::new()),
            Arc::new(InMemorySeatMap::new()),
            channel.clone(),
            clock.clone(),
            LockSettings::default(),
        ));
        let coordinator = BookingCoordinator::new(
            Arc::new(InMemoryBookingRepository::new()),
            Arc::new(LocalSeatLockClient::new(seats.clone())),
            channel.clone(),
            clock.clone(),
            BookingSettings::default(),
        );
        Fixture {
            coordinator,
            seats,
            channel,
            clock,
        }
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn request(seats: &[&str]) -> NewBooking {
        NewBooking {
            showtime_id: "S".to_string(),
            seat_ids: ids(seats),
            total_amount: 2400,
            currency: None,
        }
    }

    #[tokio::test]
    async fn test_create_booking_binds_holds() {
        let f = fixture();
        let ctx = RequestContext::new("guest-1", Role::Guest);
        f.seats.acquire("S", &ids(&["A", "B"]), "guest-1", Duration::seconds(300)).await.unwrap();

        let booking = f.coordinator.create_booking(&ctx, request(&["A", "B"])).await.unwrap();

        assert_eq!(booking.status, BookingStatus::SeatLocked);
        assert!(booking.user_id.is_none());
        let holds = f.seats.locks("S").await.unwrap();
        assert!(holds.iter().all(|h| h.holder_id == booking.id.to_string()));
        assert_eq!(f.channel.published_of(EventType::BookingSeatMapped).await.len(), 1);
        assert_eq!(f.channel.published_of(EventType::BookingStatusUpdated).await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_booking_without_holds_fails() {
        let f = fixture();
        let ctx = RequestContext::new("user-1", Role::Customer);
        let err = f.coordinator.create_booking(&ctx, request(&["A"])).await.unwrap_err();
        assert!(matches!(err, SagaError::LockNotFound { .. }));
        assert!(f.channel.published_of(EventType::BookingSeatMapped).await.is_empty());
    }

    #[tokio::test]
    async fn test_initiate_payment_extends_holds() {
        let f = fixture();
        let ctx = RequestContext::new("user-1", Role::Customer);
        f.seats.acquire("S", &ids(&["A"]), "user-1", Duration::seconds(300)).await.unwrap();
        let booking = f.coordinator.create_booking(&ctx, request(&["A"])).await.unwrap();

        let hold = f.coordinator.initiate_payment(&ctx, booking.id).await.unwrap();

        assert_eq!(hold.booking.status, BookingStatus::AwaitingPayment);
        assert_eq!(hold.hold_expires_at, f.clock.now() + Duration::seconds(600));

        // Only once.
        let err = f.coordinator.initiate_payment(&ctx, booking.id).await.unwrap_err();
        assert!(matches!(err, SagaError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_initiate_payment_after_expiry_expires_booking() {
        let f = fixture();
        let ctx = RequestContext::new("user-1", Role::Customer);
        f.seats.acquire("S", &ids(&["A"]), "user-1", Duration::seconds(300)).await.unwrap();
        let booking = f.coordinator.create_booking(&ctx, request(&["A"])).await.unwrap();

        f.clock.advance(Duration::seconds(301));
        let err = f.coordinator.initiate_payment(&ctx, booking.id).await.unwrap_err();

        assert!(matches!(err, SagaError::LockNotFound { .. }));
        let stored = f.coordinator.get_booking(&ctx, booking.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Expired);
    }

    #[tokio::test]
    async fn test_cancel_is_owner_only_and_final() {
        let f = fixture();
        let owner = RequestContext::new("user-1", Role::Customer);
        let stranger = RequestContext::new("user-2", Role::Customer);
        f.seats.acquire("S", &ids(&["A"]), "user-1", Duration::seconds(300)).await.unwrap();
        let booking = f.coordinator.create_booking(&owner, request(&["A"])).await.unwrap();

        let err = f.coordinator.cancel_booking(&stranger, booking.id).await.unwrap_err();
        assert!(matches!(err, SagaError::Forbidden(_)));

        let cancelled = f.coordinator.cancel_booking(&owner, booking.id).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);

        let err = f.coordinator.cancel_booking(&owner, booking.id).await.unwrap_err();
        assert!(matches!(err, SagaError::AlreadyTerminal { .. }));

        let admin = RequestContext::new("ops", Role::Admin);
        assert!(f.coordinator.get_booking(&admin, booking.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_booking() {
        let f = fixture();
        let ctx = RequestContext::new("user-1", Role::Customer);
        let err = f.coordinator.get_booking(&ctx, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SagaError::BookingNotFound(_)));
    }
}
