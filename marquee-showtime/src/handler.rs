use async_trait::async_trait;
use marquee_core::{BookingStatus, SagaError, UnlockReason};
use marquee_shared::{EventEnvelope, EventHandler, EventType, SagaEvent};
use std::sync::Arc;
use tracing::{debug, info};

use crate::lock_service::SeatLockService;

/// Showtime side of the saga: keeps seat holds in step with booking decisions.
pub struct ShowtimeSagaHandler {
    service: Arc<SeatLockService>,
}

impl ShowtimeSagaHandler {
    pub fn new(service: Arc<SeatLockService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for ShowtimeSagaHandler {
    fn name(&self) -> &'static str {
        "showtime-saga"
    }

    fn routing_keys(&self) -> &'static [EventType] {
        &[
            EventType::BookingSeatMapped,
            EventType::BookingStatusUpdated,
            EventType::SeatReleaseRequest,
        ]
    }

    async fn handle(&self, envelope: EventEnvelope) -> Result<(), SagaError> {
        match envelope.event {
            SagaEvent::BookingSeatMapped(e) => {
                self.service
                    .bind_holder(e.booking_id, &e.showtime_id, &e.seat_ids, Some(&e.user_id))
                    .await
            }
            SagaEvent::BookingStatusUpdated(e) => match e.new_status {
                BookingStatus::Confirmed => {
                    self.service.confirm(e.booking_id, &e.showtime_id, &e.seat_ids).await?;
                    Ok(())
                }
                BookingStatus::Cancelled | BookingStatus::Expired => {
                    let reason = e.new_status.release_reason().unwrap_or(UnlockReason::Cancelled);
                    let holder = e.booking_id.to_string();
                    let released = self
                        .service
                        .release(&e.showtime_id, &e.seat_ids, reason, Some(&holder))
                        .await?;
                    info!(booking_id = %e.booking_id, reason = %reason, released = released.len(), "Released seats of closed booking");
                    Ok(())
                }
                other => {
                    debug!(booking_id = %e.booking_id, status = %other, "No seat action for status");
                    Ok(())
                }
            },
            SagaEvent::SeatReleaseRequest(e) => {
                self.service.release(&e.showtime_id, &e.seat_ids, e.reason, None).await?;
                Ok(())
            }
            other => {
                debug!(event_type = %other.event_type(), "Unhandled event type");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock_service::LockSettings;
    use chrono::{Duration, TimeZone, Utc};
    use marquee_core::{LockStore, ManualClock, SeatKey, SeatMapRepository};
    use marquee_shared::models::events::{BookingSeatMappedEvent, BookingStatusUpdatedEvent, SeatReleaseRequestEvent};
    use marquee_store::{InMemoryChannel, InMemoryDeduplicator, InMemoryLockStore, InMemorySeatMap};
    use marquee_shared::EventPublisher;
    use uuid::Uuid;

    struct Fixture {
        handler: ShowtimeSagaHandler,
        service: Arc<SeatLockService>,
        store: Arc<InMemoryLockStore>,
        seat_map: Arc<InMemorySeatMap>,
        channel: Arc<InMemoryChannel>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryLockStore::new());
        let seat_map = Arc::new(InMemorySeatMap::new());
        let channel = Arc::new(InMemoryChannel::new());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let service = Arc::new(SeatLockService::new(
            store.clone(),
            seat_map.clone(),
            channel.clone(),
            clock,
            LockSettings::default(),
        ));
        Fixture {
            handler: ShowtimeSagaHandler::new(service.clone()),
            service,
            store,
            seat_map,
            channel,
        }
    }

    fn seats(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn status_update(booking_id: Uuid, seat_ids: Vec<String>, new_status: BookingStatus) -> EventEnvelope {
        EventEnvelope::new(SagaEvent::BookingStatusUpdated(BookingStatusUpdatedEvent {
            booking_id,
            showtime_id: "S".to_string(),
            user_id: None,
            seat_ids,
            new_status,
            previous_status: BookingStatus::AwaitingPayment,
        }))
    }

    #[tokio::test]
    async fn test_seat_mapped_binds_holder() {
        let f = fixture();
        let ab = seats(&["A", "B"]);
        f.service.acquire("S", &ab, "guest-1", Duration::seconds(300)).await.unwrap();
        let booking_id = Uuid::new_v4();

        f.handler
            .handle(EventEnvelope::new(SagaEvent::BookingSeatMapped(BookingSeatMappedEvent {
                booking_id,
                showtime_id: "S".to_string(),
                seat_ids: ab.clone(),
                user_id: "guest-1".to_string(),
            })))
            .await
            .unwrap();

        let lock = f.store.get(&SeatKey::new("S", "A")).await.unwrap().unwrap();
        assert!(lock.is_held_by(&booking_id.to_string()));
    }

    #[tokio::test]
    async fn test_confirmed_booking_sells_seats() {
        let f = fixture();
        let booking_id = Uuid::new_v4();
        let ab = seats(&["A", "B"]);
        f.service
            .acquire("S", &ab, &booking_id.to_string(), Duration::seconds(300))
            .await
            .unwrap();

        f.handler
            .handle(status_update(booking_id, ab.clone(), BookingStatus::Confirmed))
            .await
            .unwrap();

        assert!(f.store.is_empty().await);
        assert_eq!(f.seat_map.booked_seats("S", &ab).await.unwrap(), ab);
        assert!(f.channel.published_of(EventType::SeatUnlocked).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_booking_releases_only_its_own_holds() {
        let f = fixture();
        let booking_id = Uuid::new_v4();
        f.service
            .acquire("S", &seats(&["A"]), &booking_id.to_string(), Duration::seconds(300))
            .await
            .unwrap();
        f.service.acquire("S", &seats(&["B"]), "U2", Duration::seconds(300)).await.unwrap();

        f.handler
            .handle(status_update(booking_id, seats(&["A", "B"]), BookingStatus::Cancelled))
            .await
            .unwrap();

        assert!(f.store.get(&SeatKey::new("S", "A")).await.unwrap().is_none());
        assert!(f.store.get(&SeatKey::new("S", "B")).await.unwrap().is_some());
        let unlocked = f.channel.published_of(EventType::SeatUnlocked).await;
        assert_eq!(unlocked.len(), 1);
        match &unlocked[0].event {
            SagaEvent::SeatUnlocked(e) => assert_eq!(e.reason, UnlockReason::Cancelled),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_release_request_is_unconditional_and_deduplicated() {
        let f = fixture();
        f.service.acquire("S", &seats(&["A"]), "U1", Duration::seconds(300)).await.unwrap();

        let request = EventEnvelope::new(SagaEvent::SeatReleaseRequest(SeatReleaseRequestEvent {
            showtime_id: "S".to_string(),
            seat_ids: seats(&["A"]),
            reason: UnlockReason::SystemReleased,
        }));
        f.channel.publish(&request).await.unwrap();
        f.channel.publish(&request).await.unwrap();

        let dedup = InMemoryDeduplicator::new();
        assert_eq!(f.channel.pump(&[&f.handler], &dedup).await, 1);
        assert!(f.store.is_empty().await);
        assert_eq!(f.channel.published_of(EventType::SeatUnlocked).await.len(), 1);
    }
}
