use marquee_core::{Clock, LockStore, SagaResult, SeatLock, UnlockReason};
use marquee_shared::EventPublisher;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::lock_service::announce_unlocked;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub released: usize,
    /// Expired at scan time but extended or removed before the delete
    pub skipped: usize,
}

/// Periodically removes holds whose expiry has passed.
///
/// The sweep is the system of record for expiry: the Lock Store carries no native
/// TTL, so a hold only disappears through an explicit release or through here.
pub struct ExpirationSweeper {
    store: Arc<dyn LockStore>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl ExpirationSweeper {
    pub fn new(
        store: Arc<dyn LockStore>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn sweep_once(&self) -> SagaResult<SweepReport> {
        let entries = self.store.scan(None, self.batch_size).await?;
        let mut report = SweepReport {
            scanned: entries.len(),
            ..Default::default()
        };

        let scanned_at = self.clock.now();
        let mut removed: BTreeMap<String, Vec<(String, SeatLock)>> = BTreeMap::new();

        for (key, lock) in entries {
            if !lock.is_expired(scanned_at) {
                continue;
            }

            // Re-checked atomically: an Extend that landed after the scan wins.
            match self.store.delete_if_expired(&key, self.clock.now()).await {
                Ok(Some(deleted)) => {
                    report.released += 1;
                    removed
                        .entry(key.showtime_id)
                        .or_default()
                        .push((key.seat_id, deleted));
                }
                Ok(None) => {
                    debug!(key = %key, "Hold no longer expired, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(key = %key, error = %e, "Failed to delete expired hold");
                    report.skipped += 1;
                }
            }
        }

        for (showtime_id, seats) in removed {
            announce_unlocked(self.publisher.as_ref(), &showtime_id, seats, UnlockReason::Timeout).await;
        }

        if report.released > 0 {
            info!(scanned = report.scanned, released = report.released, skipped = report.skipped, "Sweep released expired holds");
        }
        Ok(report)
    }

    pub async fn run(self: Arc<Self>, interval: Duration) {
        info!(interval_ms = interval.as_millis() as u64, "Expiration sweeper started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock_service::{LockSettings, SeatLockService};
    use chrono::{TimeZone, Utc};
    use marquee_core::{SeatKey, ManualClock};
    use marquee_shared::{EventType, SagaEvent};
    use marquee_store::{InMemoryChannel, InMemoryLockStore, InMemorySeatMap};

    struct Fixture {
        service: SeatLockService,
        sweeper: ExpirationSweeper,
        store: Arc<InMemoryLockStore>,
        channel: Arc<InMemoryChannel>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryLockStore::new());
        let channel = Arc::new(InMemoryChannel::new());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let service = SeatLockService::new(
            store.clone(),
            Arc::new(InMemorySeatMap::new()),
            channel.clone(),
            clock.clone(),
            LockSettings::default(),
        );
        let sweeper = ExpirationSweeper::new(store.clone(), channel.clone(), clock.clone(), 100);
        Fixture {
            service,
            sweeper,
            store,
            channel,
            clock,
        }
    }

    fn seats(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_expired_holds_are_released_with_timeout() {
        let f = fixture();
        f.service
            .acquire("S", &seats(&["A", "B"]), "U1", chrono::Duration::seconds(300))
            .await
            .unwrap();
        f.service
            .acquire("S", &seats(&["C"]), "U2", chrono::Duration::seconds(900))
            .await
            .unwrap();

        assert_eq!(f.sweeper.sweep_once().await.unwrap().released, 0);

        f.clock.advance(chrono::Duration::seconds(300));
        let report = f.sweeper.sweep_once().await.unwrap();
        assert_eq!(report, SweepReport { scanned: 3, released: 2, skipped: 0 });
        assert!(f.store.get(&SeatKey::new("S", "C")).await.unwrap().is_some());

        let unlocked = f.channel.published_of(EventType::SeatUnlocked).await;
        assert_eq!(unlocked.len(), 1);
        match &unlocked[0].event {
            SagaEvent::SeatUnlocked(e) => {
                assert_eq!(e.seat_ids, vec!["A", "B"]);
                assert_eq!(e.reason, UnlockReason::Timeout);
                assert_eq!(e.holder_id.as_deref(), Some("U1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Re-sweeping is a no-op.
        assert_eq!(f.sweeper.sweep_once().await.unwrap().released, 0);
        assert_eq!(f.channel.published_of(EventType::SeatUnlocked).await.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_seat_is_reacquirable_before_sweep() {
        let f = fixture();
        let a = seats(&["A"]);
        f.service.acquire("S", &a, "U1", chrono::Duration::seconds(10)).await.unwrap();
        f.clock.advance(chrono::Duration::seconds(11));

        f.service.acquire("S", &a, "U2", chrono::Duration::seconds(10)).await.unwrap();
        assert!(f.store.get(&SeatKey::new("S", "A")).await.unwrap().unwrap().is_held_by("U2"));

        // The lapsed hold was announced once, by the acquire; the sweep has nothing left.
        let report = f.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.released, 0);
        let unlocked = f.channel.published_of(EventType::SeatUnlocked).await;
        assert_eq!(unlocked.len(), 1);
        match &unlocked[0].event {
            SagaEvent::SeatUnlocked(e) => {
                assert_eq!(e.reason, UnlockReason::Timeout);
                assert_eq!(e.holder_id.as_deref(), Some("U1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    /// Store whose scan returns a stale snapshot, standing in for an Extend that
    /// lands between enumeration and delete.
    struct StaleScan {
        inner: Arc<InMemoryLockStore>,
        snapshot: Vec<(SeatKey, SeatLock)>,
    }

    #[async_trait::async_trait]
    impl LockStore for StaleScan {
        async fn try_create(
            &self,
            key: &SeatKey,
            lock: &SeatLock,
            now: chrono::DateTime<Utc>,
        ) -> SagaResult<marquee_core::CreateOutcome> {
            self.inner.try_create(key, lock, now).await
        }
        async fn get(&self, key: &SeatKey) -> SagaResult<Option<SeatLock>> {
            self.inner.get(key).await
        }
        async fn extend(
            &self,
            key: &SeatKey,
            holder: Option<&str>,
            expires_at: chrono::DateTime<Utc>,
            now: chrono::DateTime<Utc>,
        ) -> SagaResult<bool> {
            self.inner.extend(key, holder, expires_at, now).await
        }
        async fn rebind(&self, key: &SeatKey, from: Option<&str>, to: &str, now: chrono::DateTime<Utc>) -> SagaResult<bool> {
            self.inner.rebind(key, from, to, now).await
        }
        async fn delete(&self, key: &SeatKey) -> SagaResult<Option<SeatLock>> {
            self.inner.delete(key).await
        }
        async fn delete_if_holder(&self, key: &SeatKey, holder: &str) -> SagaResult<Option<SeatLock>> {
            self.inner.delete_if_holder(key, holder).await
        }
        async fn delete_if_expired(&self, key: &SeatKey, now: chrono::DateTime<Utc>) -> SagaResult<Option<SeatLock>> {
            self.inner.delete_if_expired(key, now).await
        }
        async fn scan(&self, _showtime_id: Option<&str>, _batch_size: usize) -> SagaResult<Vec<(SeatKey, SeatLock)>> {
            Ok(self.snapshot.clone())
        }
    }

    #[tokio::test]
    async fn test_hold_extended_after_scan_is_skipped() {
        let f = fixture();
        let a = seats(&["A"]);
        f.service.acquire("S", &a, "U1", chrono::Duration::seconds(10)).await.unwrap();
        let snapshot = f.store.scan(None, 10).await.unwrap();

        // Extend lands while the hold is still live; the snapshot still shows the old expiry.
        f.clock.advance(chrono::Duration::seconds(5));
        f.service.extend("S", &a, Some("U1"), chrono::Duration::seconds(600)).await.unwrap();
        f.clock.advance(chrono::Duration::seconds(6));

        let sweeper = ExpirationSweeper::new(
            Arc::new(StaleScan { inner: f.store.clone(), snapshot }),
            f.channel.clone(),
            f.clock.clone(),
            100,
        );
        let report = sweeper.sweep_once().await.unwrap();

        assert_eq!(report, SweepReport { scanned: 1, released: 0, skipped: 1 });
        assert!(f.store.get(&SeatKey::new("S", "A")).await.unwrap().is_some());
        assert!(f.channel.published_of(EventType::SeatUnlocked).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_within_one_interval() {
        let f = fixture();
        f.service.acquire("S", &seats(&["A"]), "U1", chrono::Duration::seconds(1)).await.unwrap();
        f.clock.advance(chrono::Duration::seconds(2));

        let sweeper = Arc::new(f.sweeper);
        let task = tokio::spawn(sweeper.run(Duration::from_millis(5_000)));

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert!(f.store.is_empty().await);
        task.abort();
    }
}
