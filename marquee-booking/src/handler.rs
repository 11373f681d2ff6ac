use async_trait::async_trait;
use marquee_core::{Booking, SagaError, SagaTrigger, UnlockReason};
use marquee_shared::models::events::{BookingStatusUpdatedEvent, PaymentOutcomeEvent, SeatUnlockedEvent};
use marquee_shared::{EventEnvelope, EventHandler, EventType, SagaEvent};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::coordinator::{Broadcast, BookingCoordinator};

/// Booking side of the saga: applies payment outcomes and seat expiries.
///
/// Every event is checked against the stored status; anything that would move a
/// closed booking, or is otherwise illegal, is logged and discarded.
pub struct BookingSagaHandler {
    coordinator: Arc<BookingCoordinator>,
}

impl BookingSagaHandler {
    pub fn new(coordinator: Arc<BookingCoordinator>) -> Self {
        Self { coordinator }
    }

    async fn on_payment(&self, event: PaymentOutcomeEvent, trigger: SagaTrigger) -> Result<(), SagaError> {
        let Some(mut booking) = self.find(event.booking_id).await? else {
            return Ok(());
        };

        if trigger == SagaTrigger::PaymentSucceeded && event.amount != booking.total_amount {
            warn!(
                booking_id = %booking.id,
                payment_id = %event.payment_id,
                paid = event.amount,
                expected = booking.total_amount,
                "Payment amount differs from booking total"
            );
        }

        self.apply(&mut booking, trigger, Broadcast::Emit).await
    }

    async fn on_seat_unlocked(&self, event: SeatUnlockedEvent) -> Result<(), SagaError> {
        let trigger = match event.reason {
            UnlockReason::Timeout | UnlockReason::SystemReleased => SagaTrigger::from_unlock(event.reason),
            // Releases that follow our own cancellations.
            UnlockReason::Cancelled => return Ok(()),
        };

        for mut booking in self.affected_bookings(&event).await? {
            self.apply(&mut booking, trigger, Broadcast::Emit).await?;
        }
        Ok(())
    }

    /// Replayed or foreign status broadcasts: applied only when legal, never re-emitted.
    async fn on_status_updated(&self, event: BookingStatusUpdatedEvent) -> Result<(), SagaError> {
        let Some(mut booking) = self.find(event.booking_id).await? else {
            return Ok(());
        };

        if booking.status == event.new_status {
            debug!(booking_id = %booking.id, status = %booking.status, "Status broadcast already applied");
            return Ok(());
        }

        let Some(trigger) = SagaTrigger::reaching(event.new_status) else {
            return Ok(());
        };
        self.apply(&mut booking, trigger, Broadcast::Silent).await
    }

    async fn affected_bookings(&self, event: &SeatUnlockedEvent) -> Result<Vec<Booking>, SagaError> {
        match event.holder_id.as_deref() {
            Some(holder) => {
                // Session holders belong to no booking yet.
                let Ok(booking_id) = Uuid::parse_str(holder) else {
                    return Ok(Vec::new());
                };
                Ok(self
                    .find(booking_id)
                    .await?
                    .filter(|b| b.status.holds_seats() && b.overlaps(&event.showtime_id, &event.seat_ids))
                    .into_iter()
                    .collect())
            }
            None => {
                self.coordinator
                    .bookings()
                    .find_active_by_seats(&event.showtime_id, &event.seat_ids)
                    .await
            }
        }
    }

    async fn find(&self, booking_id: Uuid) -> Result<Option<Booking>, SagaError> {
        match self.coordinator.load(booking_id).await {
            Ok(booking) => Ok(Some(booking)),
            Err(SagaError::BookingNotFound(_)) => {
                warn!(%booking_id, "Event for unknown booking, discarding");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn apply(&self, booking: &mut Booking, trigger: SagaTrigger, broadcast: Broadcast) -> Result<(), SagaError> {
        match self.coordinator.transition(booking, trigger, broadcast).await {
            Ok(_) => Ok(()),
            Err(SagaError::AlreadyTerminal { booking_id, status }) => {
                info!(%booking_id, %status, ?trigger, "Booking already closed, event discarded");
                Ok(())
            }
            Err(SagaError::InvalidTransition { from, trigger }) => {
                info!(booking_id = %booking.id, %from, ?trigger, "Illegal transition, event discarded");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl EventHandler for BookingSagaHandler {
    fn name(&self) -> &'static str {
        "booking-saga"
    }

    fn routing_keys(&self) -> &'static [EventType] {
        &[
            EventType::PaymentBookingSuccess,
            EventType::PaymentFailed,
            EventType::SeatUnlocked,
            EventType::BookingStatusUpdated,
        ]
    }

    async fn handle(&self, envelope: EventEnvelope) -> Result<(), SagaError> {
        match envelope.event {
            SagaEvent::PaymentBookingSuccess(e) => self.on_payment(e, SagaTrigger::PaymentSucceeded).await,
            SagaEvent::PaymentFailed(e) => self.on_payment(e, SagaTrigger::PaymentFailed).await,
            SagaEvent::SeatUnlocked(e) => self.on_seat_unlocked(e).await,
            SagaEvent::BookingStatusUpdated(e) => self.on_status_updated(e).await,
            other => {
                debug!(event_type = %other.event_type(), "Unhandled event type");
                Ok(())
            }
        }
    }
}
