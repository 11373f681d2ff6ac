//! In-process backends: lock store, repositories, dedup store and event channel.
//!
//! Used by `backend = "memory"` and by tests. Each store guards its map with a single
//! async mutex, which gives the same per-key atomicity the Redis scripts provide.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::{
    Booking, BookingRepository, BookingStatus, CreateOutcome, LockStore, SagaError, SagaResult, SeatKey,
    SeatLock, SeatMapRepository,
};
use marquee_shared::{
    deliver, Delivery, EventDeduplicator, EventEnvelope, EventError, EventHandler, EventPublisher, EventType,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<SeatKey, SeatLock>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_create(&self, key: &SeatKey, lock: &SeatLock, now: DateTime<Utc>) -> SagaResult<CreateOutcome> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(existing) if !existing.is_expired(now) => Ok(CreateOutcome::Held(existing.clone())),
            _ => match entries.insert(key.clone(), lock.clone()) {
                Some(lapsed) => Ok(CreateOutcome::Replaced(lapsed)),
                None => Ok(CreateOutcome::Created),
            },
        }
    }

    async fn get(&self, key: &SeatKey) -> SagaResult<Option<SeatLock>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn extend(
        &self,
        key: &SeatKey,
        holder: Option<&str>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SagaResult<bool> {
        let mut entries = self.entries.lock().await;
        let Some(lock) = entries.get_mut(key) else {
            return Ok(false);
        };
        if lock.is_expired(now) || holder.is_some_and(|h| !lock.is_held_by(h)) {
            return Ok(false);
        }
        lock.expires_at = expires_at;
        Ok(true)
    }

    async fn rebind(&self, key: &SeatKey, from: Option<&str>, to: &str, now: DateTime<Utc>) -> SagaResult<bool> {
        let mut entries = self.entries.lock().await;
        let Some(lock) = entries.get_mut(key) else {
            return Ok(false);
        };
        if lock.is_held_by(to) {
            return Ok(true);
        }
        if lock.is_expired(now) || from.is_some_and(|h| !lock.is_held_by(h)) {
            return Ok(false);
        }
        lock.holder_id = to.to_string();
        Ok(true)
    }

    async fn delete(&self, key: &SeatKey) -> SagaResult<Option<SeatLock>> {
        Ok(self.entries.lock().await.remove(key))
    }

    async fn delete_if_holder(&self, key: &SeatKey, holder: &str) -> SagaResult<Option<SeatLock>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(lock) if lock.is_held_by(holder) => Ok(entries.remove(key)),
            _ => Ok(None),
        }
    }

    async fn delete_if_expired(&self, key: &SeatKey, now: DateTime<Utc>) -> SagaResult<Option<SeatLock>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(lock) if lock.is_expired(now) => Ok(entries.remove(key)),
            _ => Ok(None),
        }
    }

    async fn scan(&self, showtime_id: Option<&str>, _batch_size: usize) -> SagaResult<Vec<(SeatKey, SeatLock)>> {
        let entries = self.entries.lock().await;
        let mut found: Vec<(SeatKey, SeatLock)> = entries
            .iter()
            .filter(|(key, _)| showtime_id.map_or(true, |id| key.showtime_id == id))
            .map(|(key, lock)| (key.clone(), lock.clone()))
            .collect();
        found.sort_by(|(a, _), (b, _)| (&a.showtime_id, &a.seat_id).cmp(&(&b.showtime_id, &b.seat_id)));
        Ok(found)
    }
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: Mutex<HashMap<Uuid, Booking>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert(&self, booking: &Booking) -> SagaResult<()> {
        let mut bookings = self.bookings.lock().await;
        if bookings.contains_key(&booking.id) {
            return Err(SagaError::Store(format!("Booking {} already exists", booking.id)));
        }
        bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> SagaResult<Option<Booking>> {
        Ok(self.bookings.lock().await.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: BookingStatus,
        next: BookingStatus,
        at: DateTime<Utc>,
    ) -> SagaResult<bool> {
        let mut bookings = self.bookings.lock().await;
        match bookings.get_mut(&id) {
            Some(booking) if booking.status == expected => {
                booking.status = next;
                booking.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_active_by_seats(&self, showtime_id: &str, seat_ids: &[String]) -> SagaResult<Vec<Booking>> {
        let bookings = self.bookings.lock().await;
        let mut active: Vec<Booking> = bookings
            .values()
            .filter(|b| b.status.holds_seats() && b.overlaps(showtime_id, seat_ids))
            .cloned()
            .collect();
        active.sort_by_key(|b| b.created_at);
        Ok(active)
    }
}

#[derive(Default)]
pub struct InMemorySeatMap {
    sold: Mutex<HashMap<(String, String), Uuid>>,
}

impl InMemorySeatMap {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeatMapRepository for InMemorySeatMap {
    async fn mark_booked(&self, showtime_id: &str, seat_ids: &[String], booking_id: Uuid) -> SagaResult<Vec<String>> {
        let mut sold = self.sold.lock().await;
        let mut conflicts = Vec::new();
        for seat in seat_ids {
            let owner = sold
                .entry((showtime_id.to_string(), seat.clone()))
                .or_insert(booking_id);
            if *owner != booking_id {
                conflicts.push(seat.clone());
            }
        }
        conflicts.sort();
        Ok(conflicts)
    }

    async fn booked_seats(&self, showtime_id: &str, seat_ids: &[String]) -> SagaResult<Vec<String>> {
        let sold = self.sold.lock().await;
        let mut booked: Vec<String> = seat_ids
            .iter()
            .filter(|seat| sold.contains_key(&(showtime_id.to_string(), (*seat).clone())))
            .cloned()
            .collect();
        booked.sort();
        Ok(booked)
    }
}

/// Dedup markers that lapse after a TTL, mirroring the `SET NX EX` markers in Redis.
/// Lapsed markers are pruned on insert; a process restart forgets them all.
pub struct InMemoryDeduplicator {
    seen: Mutex<HashMap<(String, Uuid), Instant>>,
    ttl: Duration,
}

const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(24 * 60 * 60);

impl Default for InMemoryDeduplicator {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_DEDUP_TTL)
    }
}

impl InMemoryDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seen.lock().await.is_empty()
    }
}

#[async_trait]
impl EventDeduplicator for InMemoryDeduplicator {
    async fn first_delivery(&self, consumer: &str, event_id: Uuid) -> Result<bool, EventError> {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;
        seen.retain(|_, expires_at| *expires_at > now);

        let key = (consumer.to_string(), event_id);
        if seen.contains_key(&key) {
            return Ok(false);
        }
        seen.insert(key, now + self.ttl);
        Ok(true)
    }

    async fn forget(&self, consumer: &str, event_id: Uuid) -> Result<(), EventError> {
        self.seen.lock().await.remove(&(consumer.to_string(), event_id));
        Ok(())
    }
}

/// One published message as it went over the wire.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub routing_key: String,
    pub payload: String,
    pub envelope: EventEnvelope,
}

/// In-process event channel: fan-out to spawned consumers through a broadcast
/// channel. A recording channel also keeps every message so tests can inspect
/// them and pump them through handlers step by step; a live channel keeps nothing.
pub struct InMemoryChannel {
    sender: broadcast::Sender<Arc<PublishedEvent>>,
    record_history: bool,
    history: Mutex<Vec<Arc<PublishedEvent>>>,
    cursors: Mutex<HashMap<&'static str, usize>>,
    failing: AtomicBool,
}

const CHANNEL_CAPACITY: usize = 1024;
const MAX_PUMP_ROUNDS: usize = 64;
const MAX_REDELIVERIES: u32 = 5;
const REDELIVERY_BACKOFF: Duration = Duration::from_millis(100);

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChannel {
    /// Recording channel for tests.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Channel for a running process; only spawned consumers see messages.
    pub fn live() -> Self {
        Self::build(false)
    }

    fn build(record_history: bool) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            record_history,
            history: Mutex::new(Vec::new()),
            cursors: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent publish fail, simulating a broker outage.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<EventEnvelope> {
        self.history.lock().await.iter().map(|p| p.envelope.clone()).collect()
    }

    pub async fn published_of(&self, event_type: EventType) -> Vec<EventEnvelope> {
        self.history
            .lock()
            .await
            .iter()
            .filter(|p| p.envelope.event_type() == event_type)
            .map(|p| p.envelope.clone())
            .collect()
    }

    pub async fn raw(&self) -> Vec<PublishedEvent> {
        self.history.lock().await.iter().map(|p| (**p).clone()).collect()
    }

    /// Delivers every message each handler has not seen yet, in publish order,
    /// repeating until no handler publishes anything new. Returns the number of
    /// deliveries the handlers acted on.
    pub async fn pump(&self, handlers: &[&dyn EventHandler], dedup: &dyn EventDeduplicator) -> usize {
        let mut handled = 0;

        for _ in 0..MAX_PUMP_ROUNDS {
            let mut progressed = false;

            for handler in handlers {
                loop {
                    let next = {
                        let cursors = self.cursors.lock().await;
                        let position = cursors.get(handler.name()).copied().unwrap_or(0);
                        let history = self.history.lock().await;
                        history.get(position).cloned()
                    };
                    let Some(message) = next else { break };

                    *self.cursors.lock().await.entry(handler.name()).or_insert(0) += 1;
                    progressed = true;

                    let outcome = deliver(*handler, dedup, &message.routing_key, message.payload.as_bytes()).await;
                    if outcome == Delivery::Handled {
                        handled += 1;
                    }
                }
            }

            if !progressed {
                return handled;
            }
        }

        warn!(handled, "Event pump did not settle");
        handled
    }

    /// Runs `handler` against the live broadcast stream until the channel closes.
    pub fn spawn_consumer(
        &self,
        handler: Arc<dyn EventHandler>,
        dedup: Arc<dyn EventDeduplicator>,
    ) -> JoinHandle<()> {
        let mut receiver = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        for attempt in 1..=MAX_REDELIVERIES {
                            let outcome =
                                deliver(handler.as_ref(), dedup.as_ref(), &message.routing_key, message.payload.as_bytes())
                                    .await;
                            if outcome.is_settled() {
                                break;
                            }
                            if attempt == MAX_REDELIVERIES {
                                warn!(consumer = handler.name(), event_id = %message.envelope.event_id, "Giving up on redelivery");
                                break;
                            }
                            tokio::time::sleep(REDELIVERY_BACKOFF).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(consumer = handler.name(), skipped, "Consumer lagged, events lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[async_trait]
impl EventPublisher for InMemoryChannel {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), EventError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EventError::Publish("In-memory channel is failing".to_string()));
        }

        let message = Arc::new(PublishedEvent {
            routing_key: envelope.routing_key().to_string(),
            payload: envelope.encode()?,
            envelope: envelope.clone(),
        });

        if self.record_history {
            self.history.lock().await.push(message.clone());
        }
        // No live subscribers is fine.
        let _ = self.sender.send(message);

        debug!(event_id = %envelope.event_id, routing_key = envelope.routing_key(), "Event published in-memory");
        Ok(())
    }
}
