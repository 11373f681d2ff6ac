use chrono::{DateTime, Duration, Utc};
use marquee_core::booking::validate_seat_ids;
use marquee_core::{
    Clock, CreateOutcome, LockStore, SagaError, SagaResult, SeatKey, SeatLock, SeatMapRepository, UnlockReason,
};
use marquee_shared::models::events::{SeatLockedEvent, SeatUnlockedEvent};
use marquee_shared::{EventEnvelope, EventPublisher, SagaEvent};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LockSettings {
    pub seat_hold: Duration,
    pub payment_hold: Duration,
    pub max_seats_per_request: usize,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            seat_hold: Duration::seconds(300),
            payment_hold: Duration::seconds(600),
            max_seats_per_request: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockGrant {
    pub showtime_id: String,
    pub seat_ids: Vec<String>,
    pub holder_id: String,
    pub expires_at: DateTime<Utc>,
}

/// A live hold as shown on a showtime's seat map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatHold {
    pub seat_id: String,
    pub holder_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfirmReport {
    pub sold: Vec<String>,
    pub conflicts: Vec<String>,
}

/// Sole writer of the Lock Store.
///
/// All mutual exclusion comes from the store's conditional operations; the service
/// keeps no in-process locks, so any number of instances can run side by side.
pub struct SeatLockService {
    store: Arc<dyn LockStore>,
    seat_map: Arc<dyn SeatMapRepository>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    settings: LockSettings,
}

impl SeatLockService {
    pub fn new(
        store: Arc<dyn LockStore>,
        seat_map: Arc<dyn SeatMapRepository>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        settings: LockSettings,
    ) -> Self {
        Self {
            store,
            seat_map,
            publisher,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Locks every seat for `holder_id` or none of them.
    pub async fn acquire(
        &self,
        showtime_id: &str,
        seat_ids: &[String],
        holder_id: &str,
        ttl: Duration,
    ) -> SagaResult<LockGrant> {
        // 1. Validate request
        validate_showtime(showtime_id)?;
        validate_seat_ids(seat_ids)?;
        if seat_ids.len() > self.settings.max_seats_per_request {
            return Err(SagaError::Validation(format!(
                "At most {} seats per request",
                self.settings.max_seats_per_request
            )));
        }
        if holder_id.is_empty() {
            return Err(SagaError::Validation("Holder id is required".to_string()));
        }
        validate_ttl(ttl)?;

        // 2. Sold seats never become lockable again
        let sold = self.seat_map.booked_seats(showtime_id, seat_ids).await?;
        if !sold.is_empty() {
            return Err(SagaError::SeatUnavailable {
                showtime_id: showtime_id.to_string(),
                seats: sold,
            });
        }

        // 3. Conditional create per seat, in a fixed order so overlapping requests
        //    contend on the same seat first.
        let now = self.clock.now();
        let expires_at = now + ttl;
        let lock = SeatLock::new(holder_id, expires_at);
        let mut ordered: Vec<&String> = seat_ids.iter().collect();
        ordered.sort();

        let mut created: Vec<SeatKey> = Vec::with_capacity(ordered.len());
        let mut lapsed: Vec<(String, SeatLock)> = Vec::new();
        let mut conflicts: Vec<String> = Vec::new();
        let mut failure = None;

        for seat_id in ordered {
            let key = SeatKey::new(showtime_id, seat_id.as_str());

            // Past the first conflict only look, so a losing request never takes a
            // seat that a winning one still has to reach.
            let outcome = if conflicts.is_empty() {
                self.store.try_create(&key, &lock, now).await
            } else {
                self.store.get(&key).await.map(|held| match held {
                    Some(existing) if !existing.is_expired(now) => CreateOutcome::Held(existing),
                    _ => CreateOutcome::Created,
                })
            };

            match outcome {
                Ok(CreateOutcome::Created) if conflicts.is_empty() => created.push(key),
                Ok(CreateOutcome::Created) => {}
                Ok(CreateOutcome::Replaced(previous)) => {
                    created.push(key);
                    lapsed.push((seat_id.clone(), previous));
                }
                Ok(CreateOutcome::Held(_)) => conflicts.push(seat_id.clone()),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // Overwritten holds had already expired; announce them as the sweeper would.
        if !lapsed.is_empty() {
            info!(showtime_id, count = lapsed.len(), "Acquire took over expired holds");
            announce_unlocked(self.publisher.as_ref(), showtime_id, lapsed, UnlockReason::Timeout).await;
        }

        if let Some(e) = failure {
            self.roll_back(&created, holder_id).await;
            return Err(e);
        }

        // 4. All-or-nothing
        if !conflicts.is_empty() {
            self.roll_back(&created, holder_id).await;
            info!(showtime_id, holder_id, seats = ?conflicts, "Seat acquisition denied");
            return Err(SagaError::SeatUnavailable {
                showtime_id: showtime_id.to_string(),
                seats: conflicts,
            });
        }

        info!(showtime_id, holder_id, seats = ?seat_ids, %expires_at, "Seats locked");

        self.emit(SagaEvent::SeatLocked(SeatLockedEvent {
            user_id: holder_id.to_string(),
            showtime_id: showtime_id.to_string(),
            seat_ids: seat_ids.to_vec(),
            ttl_seconds: ttl.num_seconds().max(0) as u64,
        }))
        .await;

        Ok(LockGrant {
            showtime_id: showtime_id.to_string(),
            seat_ids: seat_ids.to_vec(),
            holder_id: holder_id.to_string(),
            expires_at,
        })
    }

    /// Moves the expiry of live holds to now + `ttl`.
    pub async fn extend(
        &self,
        showtime_id: &str,
        seat_ids: &[String],
        holder_id: Option<&str>,
        ttl: Duration,
    ) -> SagaResult<DateTime<Utc>> {
        validate_showtime(showtime_id)?;
        validate_seat_ids(seat_ids)?;
        validate_ttl(ttl)?;

        let now = self.clock.now();
        let expires_at = now + ttl;
        let mut missing = Vec::new();

        for seat_id in seat_ids {
            let key = SeatKey::new(showtime_id, seat_id.as_str());
            if !self.store.extend(&key, holder_id, expires_at, now).await? {
                missing.push(seat_id.clone());
            }
        }

        if !missing.is_empty() {
            warn!(showtime_id, holder_id, seats = ?missing, "Extend found no live hold");
            return Err(SagaError::LockNotFound {
                showtime_id: showtime_id.to_string(),
                seats: missing,
            });
        }

        info!(showtime_id, holder_id, seats = ?seat_ids, %expires_at, "Seat holds extended");
        Ok(expires_at)
    }

    /// Deletes holds regardless of remaining time. Absent seats are skipped, so
    /// calling twice is harmless; only seats actually removed are announced.
    pub async fn release(
        &self,
        showtime_id: &str,
        seat_ids: &[String],
        reason: UnlockReason,
        holder_id: Option<&str>,
    ) -> SagaResult<Vec<String>> {
        validate_showtime(showtime_id)?;
        validate_seat_ids(seat_ids)?;

        let mut removed: Vec<(String, SeatLock)> = Vec::new();
        for seat_id in seat_ids {
            let key = SeatKey::new(showtime_id, seat_id.as_str());
            let deleted = match holder_id {
                Some(holder) => self.store.delete_if_holder(&key, holder).await?,
                None => self.store.delete(&key).await?,
            };
            if let Some(lock) = deleted {
                removed.push((seat_id.clone(), lock));
            }
        }

        let released: Vec<String> = removed.iter().map(|(seat, _)| seat.clone()).collect();
        if released.is_empty() {
            info!(showtime_id, reason = %reason, "Release was a no-op");
            return Ok(released);
        }

        info!(showtime_id, reason = %reason, seats = ?released, "Seats released");
        announce_unlocked(self.publisher.as_ref(), showtime_id, removed, reason).await;
        Ok(released)
    }

    /// Hands session holds over to `booking_id`, keeping their expiry.
    pub async fn bind_holder(
        &self,
        booking_id: Uuid,
        showtime_id: &str,
        seat_ids: &[String],
        from_holder: Option<&str>,
    ) -> SagaResult<()> {
        validate_showtime(showtime_id)?;
        validate_seat_ids(seat_ids)?;

        let now = self.clock.now();
        let to = booking_id.to_string();
        let mut bound: Vec<SeatKey> = Vec::new();
        let mut missing: Vec<String> = Vec::new();

        for seat_id in seat_ids {
            let key = SeatKey::new(showtime_id, seat_id.as_str());
            if self.store.rebind(&key, from_holder, &to, now).await? {
                bound.push(key);
            } else {
                missing.push(seat_id.clone());
            }
        }

        if !missing.is_empty() {
            // Give the seats that did move back to the session.
            if let Some(from) = from_holder {
                for key in &bound {
                    if let Err(e) = self.store.rebind(key, Some(&to), from, now).await {
                        error!(key = %key, error = %e, "Failed to restore session holder");
                    }
                }
            }
            warn!(%booking_id, showtime_id, seats = ?missing, "Bind found no live hold");
            return Err(SagaError::LockNotFound {
                showtime_id: showtime_id.to_string(),
                seats: missing,
            });
        }

        info!(%booking_id, showtime_id, seats = ?seat_ids, "Seat holds bound to booking");
        Ok(())
    }

    /// Turns the booking's holds into permanent sales.
    ///
    /// Seats still held by the booking, or no longer held at all, are sold; seats
    /// someone else holds are reported as conflicts and left alone.
    pub async fn confirm(&self, booking_id: Uuid, showtime_id: &str, seat_ids: &[String]) -> SagaResult<ConfirmReport> {
        let holder = booking_id.to_string();
        let mut sellable = Vec::new();
        let mut conflicts = Vec::new();

        for seat_id in seat_ids {
            let key = SeatKey::new(showtime_id, seat_id.as_str());
            match self.store.get(&key).await? {
                Some(lock) if !lock.is_held_by(&holder) => conflicts.push(seat_id.clone()),
                _ => sellable.push(seat_id.clone()),
            }
        }

        if !sellable.is_empty() {
            let sold_elsewhere = self.seat_map.mark_booked(showtime_id, &sellable, booking_id).await?;
            if !sold_elsewhere.is_empty() {
                sellable.retain(|seat| !sold_elsewhere.contains(seat));
                conflicts.extend(sold_elsewhere);
            }

            for seat_id in &sellable {
                let key = SeatKey::new(showtime_id, seat_id.as_str());
                self.store.delete_if_holder(&key, &holder).await?;
            }
        }

        if !conflicts.is_empty() {
            conflicts.sort();
            error!(%booking_id, showtime_id, seats = ?conflicts, "Confirmed booking conflicts with other holders");
        }
        info!(%booking_id, showtime_id, seats = ?sellable, "Seats sold");

        Ok(ConfirmReport {
            sold: sellable,
            conflicts,
        })
    }

    /// Live holds of a showtime.
    pub async fn locks(&self, showtime_id: &str) -> SagaResult<Vec<SeatHold>> {
        validate_showtime(showtime_id)?;
        let now = self.clock.now();
        let entries = self.store.scan(Some(showtime_id), 500).await?;

        Ok(entries
            .into_iter()
            .filter(|(_, lock)| !lock.is_expired(now))
            .map(|(key, lock)| SeatHold {
                seat_id: key.seat_id,
                holder_id: lock.holder_id,
                expires_at: lock.expires_at,
            })
            .collect())
    }

    async fn roll_back(&self, created: &[SeatKey], holder_id: &str) {
        for key in created {
            // A leftover is collected by the sweeper once it expires.
            if let Err(e) = self.store.delete_if_holder(key, holder_id).await {
                error!(key = %key, error = %e, "Rollback of partial acquisition failed");
            }
        }
    }

    async fn emit(&self, event: SagaEvent) {
        publish_or_log(self.publisher.as_ref(), EventEnvelope::new(event)).await;
    }
}

/// Longest hold a single Acquire or Extend may grant.
pub const MAX_HOLD_SECONDS: i64 = 24 * 60 * 60;

/// Converts a TTL received over the wire into a hold duration.
pub fn hold_duration(ttl_seconds: u64) -> SagaResult<Duration> {
    let ttl = i64::try_from(ttl_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| SagaError::Validation(format!("Hold duration out of range: {}s", ttl_seconds)))?;
    validate_ttl(ttl)?;
    Ok(ttl)
}

fn validate_ttl(ttl: Duration) -> SagaResult<()> {
    if ttl <= Duration::zero() || ttl > Duration::seconds(MAX_HOLD_SECONDS) {
        return Err(SagaError::Validation(format!(
            "Hold duration must be between 1 and {} seconds",
            MAX_HOLD_SECONDS
        )));
    }
    Ok(())
}

fn validate_showtime(showtime_id: &str) -> SagaResult<()> {
    if showtime_id.is_empty() || showtime_id.contains(':') {
        return Err(SagaError::Validation(format!("Invalid showtime id: {:?}", showtime_id)));
    }
    Ok(())
}

/// Publishes one SeatUnlocked per previous holder.
pub(crate) async fn announce_unlocked(
    publisher: &dyn EventPublisher,
    showtime_id: &str,
    removed: Vec<(String, SeatLock)>,
    reason: UnlockReason,
) {
    let mut by_holder: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (seat_id, lock) in removed {
        by_holder.entry(lock.holder_id).or_default().push(seat_id);
    }

    for (holder_id, seat_ids) in by_holder {
        let event = SagaEvent::SeatUnlocked(SeatUnlockedEvent {
            showtime_id: showtime_id.to_string(),
            seat_ids,
            reason,
            holder_id: Some(holder_id),
        });
        publish_or_log(publisher, EventEnvelope::new(event)).await;
    }
}

/// Publishing follows a completed state change, so a failure is only logged.
pub(crate) async fn publish_or_log(publisher: &dyn EventPublisher, envelope: EventEnvelope) {
    if let Err(e) = publisher.publish(&envelope).await {
        let err = SagaError::DownstreamUnavailable(e.to_string());
        error!(event_id = %envelope.event_id, routing_key = envelope.routing_key(), error = %err, "Event publish failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use marquee_core::ManualClock;
    use marquee_shared::EventType;
    use marquee_store::{InMemoryChannel, InMemoryLockStore, InMemorySeatMap};

    struct Fixture {
        service: Arc<SeatLockService>,
        store: Arc<InMemoryLockStore>,
        channel: Arc<InMemoryChannel>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryLockStore::new());
        let channel = Arc::new(InMemoryChannel::new());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let service = Arc::new(SeatLockService::new(
            store.clone(),
            Arc::new(InMemorySeatMap::new()),
            channel.clone(),
            clock.clone(),
            LockSettings::default(),
        ));
        Fixture {
            service,
            store,
            channel,
            clock,
        }
    }

    fn seats(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_overlapping_request_names_conflict_and_leaves_others() {
        let f = fixture();
        let grant = f
            .service
            .acquire("S", &seats(&["A", "B"]), "U1", Duration::seconds(300))
            .await
            .unwrap();
        assert_eq!(grant.expires_at, f.clock.now() + Duration::seconds(300));

        let err = f
            .service
            .acquire("S", &seats(&["B", "C"]), "U2", Duration::seconds(300))
            .await
            .unwrap_err();
        match err {
            SagaError::SeatUnavailable { seats, .. } => assert_eq!(seats, vec!["B"]),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(f.store.get(&SeatKey::new("S", "C")).await.unwrap().is_none());
        assert!(f.store.get(&SeatKey::new("S", "A")).await.unwrap().unwrap().is_held_by("U1"));
        assert_eq!(f.channel.published_of(EventType::SeatLocked).await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_exactly_one_winner() {
        let f = fixture();
        let mut tasks = Vec::new();
        for i in 0..16 {
            let service = f.service.clone();
            tasks.push(tokio::spawn(async move {
                service
                    .acquire("S", &seats(&["A1", "A2"]), &format!("U{i}"), Duration::seconds(300))
                    .await
            }));
        }

        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => winners += 1,
                Err(SagaError::SeatUnavailable { seats, .. }) => assert!(!seats.is_empty()),
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(f.store.len().await, 2);
    }

    #[tokio::test]
    async fn test_extend_fails_after_expiry() {
        let f = fixture();
        let ab = seats(&["A", "B"]);
        f.service.acquire("S", &ab, "U1", Duration::seconds(300)).await.unwrap();

        let extended = f.service.extend("S", &ab, Some("U1"), Duration::seconds(600)).await.unwrap();
        assert_eq!(extended, f.clock.now() + Duration::seconds(600));

        f.clock.advance(Duration::seconds(601));
        let err = f.service.extend("S", &ab, Some("U1"), Duration::seconds(600)).await.unwrap_err();
        assert!(matches!(err, SagaError::LockNotFound { ref seats, .. } if seats == &ab));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_extend_rejects_other_holder() {
        let f = fixture();
        f.service.acquire("S", &seats(&["A"]), "U1", Duration::seconds(300)).await.unwrap();
        let err = f
            .service
            .extend("S", &seats(&["A"]), Some("U2"), Duration::seconds(600))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::LockNotFound { .. }));
    }

    #[tokio::test]
    async fn test_extend_rejects_out_of_range_ttl() {
        let f = fixture();
        let a = seats(&["A"]);
        let grant = f.service.acquire("S", &a, "U1", Duration::seconds(300)).await.unwrap();

        for ttl in [
            Duration::seconds(-10),
            Duration::zero(),
            Duration::seconds(MAX_HOLD_SECONDS + 1),
        ] {
            let err = f.service.extend("S", &a, Some("U1"), ttl).await.unwrap_err();
            assert!(matches!(err, SagaError::Validation(_)), "ttl {ttl} gave {err:?}");
        }

        let lock = f.store.get(&SeatKey::new("S", "A")).await.unwrap().unwrap();
        assert_eq!(lock.expires_at, grant.expires_at);
    }

    #[tokio::test]
    async fn test_lapsed_hold_is_taken_over_and_announced() {
        let f = fixture();
        f.service.acquire("S", &seats(&["A"]), "U1", Duration::seconds(10)).await.unwrap();
        f.service.acquire("S", &seats(&["B"]), "U2", Duration::seconds(300)).await.unwrap();
        f.clock.advance(Duration::seconds(11));

        // A has lapsed but B is live: the request fails and gives A back.
        let err = f
            .service
            .acquire("S", &seats(&["A", "B"]), "U3", Duration::seconds(300))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::SeatUnavailable { ref seats, .. } if seats == &["B"]));
        assert!(f.store.get(&SeatKey::new("S", "A")).await.unwrap().is_none());

        let unlocked = f.channel.published_of(EventType::SeatUnlocked).await;
        assert_eq!(unlocked.len(), 1);
        match &unlocked[0].event {
            SagaEvent::SeatUnlocked(e) => {
                assert_eq!(e.seat_ids, vec!["A"]);
                assert_eq!(e.reason, UnlockReason::Timeout);
                assert_eq!(e.holder_id.as_deref(), Some("U1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        f.service.acquire("S", &seats(&["A"]), "U3", Duration::seconds(300)).await.unwrap();
        assert!(f.store.get(&SeatKey::new("S", "A")).await.unwrap().unwrap().is_held_by("U3"));
    }

    #[test]
    fn test_hold_duration_bounds() {
        assert_eq!(hold_duration(600).unwrap(), Duration::seconds(600));
        assert_eq!(
            hold_duration(MAX_HOLD_SECONDS as u64).unwrap(),
            Duration::seconds(MAX_HOLD_SECONDS)
        );
        for ttl in [0, MAX_HOLD_SECONDS as u64 + 1, 10_000_000_000_000_000, u64::MAX] {
            assert!(matches!(hold_duration(ttl), Err(SagaError::Validation(_))), "ttl {ttl}");
        }
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let f = fixture();
        let ab = seats(&["A", "B"]);
        f.service.acquire("S", &ab, "U1", Duration::seconds(300)).await.unwrap();

        let first = f.service.release("S", &ab, UnlockReason::Cancelled, None).await.unwrap();
        let second = f.service.release("S", &ab, UnlockReason::Cancelled, None).await.unwrap();

        assert_eq!(first, ab);
        assert!(second.is_empty());
        let unlocked = f.channel.published_of(EventType::SeatUnlocked).await;
        assert_eq!(unlocked.len(), 1);
        match &unlocked[0].event {
            SagaEvent::SeatUnlocked(e) => {
                assert_eq!(e.reason, UnlockReason::Cancelled);
                assert_eq!(e.holder_id.as_deref(), Some("U1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_guarded_release_spares_new_holder() {
        let f = fixture();
        let a = seats(&["A"]);
        f.service.acquire("S", &a, "U1", Duration::seconds(300)).await.unwrap();
        f.service.release("S", &a, UnlockReason::Timeout, None).await.unwrap();
        f.service.acquire("S", &a, "U2", Duration::seconds(300)).await.unwrap();

        let released = f.service.release("S", &a, UnlockReason::Cancelled, Some("U1")).await.unwrap();
        assert!(released.is_empty());
        assert!(f.store.get(&SeatKey::new("S", "A")).await.unwrap().unwrap().is_held_by("U2"));
    }

    #[tokio::test]
    async fn test_bind_holder_keeps_expiry_and_is_idempotent() {
        let f = fixture();
        let ab = seats(&["A", "B"]);
        let grant = f.service.acquire("S", &ab, "session-1", Duration::seconds(300)).await.unwrap();
        let booking_id = Uuid::new_v4();

        f.service.bind_holder(booking_id, "S", &ab, Some("session-1")).await.unwrap();
        f.service.bind_holder(booking_id, "S", &ab, Some("session-1")).await.unwrap();

        let lock = f.store.get(&SeatKey::new("S", "B")).await.unwrap().unwrap();
        assert_eq!(lock, SeatLock::new(booking_id.to_string(), grant.expires_at));
    }

    #[tokio::test]
    async fn test_failed_bind_restores_session_holder() {
        let f = fixture();
        f.service.acquire("S", &seats(&["A"]), "session-1", Duration::seconds(300)).await.unwrap();
        let booking_id = Uuid::new_v4();

        let err = f
            .service
            .bind_holder(booking_id, "S", &seats(&["A", "B"]), Some("session-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::LockNotFound { ref seats, .. } if seats == &vec!["B".to_string()]));
        assert!(f.store.get(&SeatKey::new("S", "A")).await.unwrap().unwrap().is_held_by("session-1"));
    }

    #[tokio::test]
    async fn test_confirm_sells_seats_and_blocks_reacquire() {
        let f = fixture();
        let ab = seats(&["A", "B"]);
        let booking_id = Uuid::new_v4();
        f.service
            .acquire("S", &ab, &booking_id.to_string(), Duration::seconds(300))
            .await
            .unwrap();

        let report = f.service.confirm(booking_id, "S", &ab).await.unwrap();
        assert_eq!(report.sold, ab);
        assert!(report.conflicts.is_empty());
        assert!(f.store.is_empty().await);

        let err = f.service.acquire("S", &seats(&["B"]), "U9", Duration::seconds(300)).await.unwrap_err();
        assert!(matches!(err, SagaError::SeatUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_confirm_skips_seats_held_by_others() {
        let f = fixture();
        let booking_id = Uuid::new_v4();
        f.service.acquire("S", &seats(&["B"]), "U2", Duration::seconds(300)).await.unwrap();

        let report = f.service.confirm(booking_id, "S", &seats(&["A", "B"])).await.unwrap();
        assert_eq!(report.sold, vec!["A"]);
        assert_eq!(report.conflicts, vec!["B"]);
        assert!(f.store.get(&SeatKey::new("S", "B")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_validation() {
        let f = fixture();
        let too_many: Vec<String> = (0..11).map(|i| format!("A{i}")).collect();
        for request in [vec![], seats(&["A", "A"]), too_many] {
            let err = f.service.acquire("S", &request, "U1", Duration::seconds(300)).await.unwrap_err();
            assert!(matches!(err, SagaError::Validation(_)));
        }
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_locks_lists_only_live_holds() {
        let f = fixture();
        f.service.acquire("S", &seats(&["A"]), "U1", Duration::seconds(10)).await.unwrap();
        f.service.acquire("S", &seats(&["B"]), "U2", Duration::seconds(300)).await.unwrap();
        f.clock.advance(Duration::seconds(11));

        let holds = f.service.locks("S").await.unwrap();
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].seat_id, "B");
    }

    #[tokio::test]
    async fn test_failed_publish_does_not_undo_lock() {
        let f = fixture();
        f.channel.set_failing(true);
        f.service.acquire("S", &seats(&["A"]), "U1", Duration::seconds(300)).await.unwrap();
        assert_eq!(f.store.len().await, 1);
    }
}
