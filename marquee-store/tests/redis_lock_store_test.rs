//! Lock Store scripts against a real Redis.
//!
//! Needs Docker, or `MARQUEE_TEST_REDIS_URL` pointing at a disposable server:
//! `cargo test -p marquee-store --test redis_lock_store_test -- --ignored`

use chrono::{DateTime, TimeZone, Utc};
use marquee_core::{CreateOutcome, LockStore, SeatKey, SeatLock};
use marquee_shared::EventDeduplicator;
use marquee_store::RedisClient;
use std::sync::Arc;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use uuid::Uuid;

struct TestRedis {
    #[allow(dead_code)]
    container: Option<ContainerAsync<GenericImage>>,
    url: String,
}

impl TestRedis {
    async fn start() -> Self {
        if let Some(url) = std::env::var("MARQUEE_TEST_REDIS_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            return Self { container: None, url };
        }

        let container = GenericImage::new("redis", "7-alpine")
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .with_exposed_port(6379.tcp())
            .start()
            .await
            .expect("Failed to start Redis");
        let port = container.get_host_port_ipv4(6379).await.unwrap();

        Self {
            container: Some(container),
            url: format!("redis://127.0.0.1:{}", port),
        }
    }

    async fn client(&self) -> RedisClient {
        RedisClient::new(&self.url, 60).await.expect("Failed to connect to Redis")
    }

    async fn set_raw(&self, key: &str, value: &str) {
        let client = redis::Client::open(self.url.as_str()).unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let _: () = redis::cmd("SET").arg(key).arg(value).query_async(&mut conn).await.unwrap();
    }
}

fn t(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

/// Showtime id no other test touches, so tests can share one server.
fn showtime() -> String {
    format!("show-{}", Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_lock_store_conditional_ops() {
    let redis = TestRedis::start().await;
    let store = redis.client().await;
    let key = SeatKey::new(showtime(), "A1");

    assert_eq!(store.try_create(&key, &SeatLock::new("u1", t(60)), t(0)).await.unwrap(), CreateOutcome::Created);
    assert_eq!(
        store.try_create(&key, &SeatLock::new("u2", t(60)), t(0)).await.unwrap(),
        CreateOutcome::Held(SeatLock::new("u1", t(60)))
    );

    assert!(!store.extend(&key, Some("u2"), t(120), t(0)).await.unwrap());
    assert!(store.extend(&key, Some("u1"), t(120), t(0)).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), Some(SeatLock::new("u1", t(120))));

    assert!(store.rebind(&key, Some("u1"), "b1", t(0)).await.unwrap());
    assert!(store.rebind(&key, Some("u1"), "b1", t(0)).await.unwrap(), "rebinding to the current holder succeeds");
    assert_eq!(store.get(&key).await.unwrap(), Some(SeatLock::new("b1", t(120))), "rebind keeps the expiry");

    assert!(store.delete_if_holder(&key, "u1").await.unwrap().is_none());
    assert!(store.delete_if_expired(&key, t(10)).await.unwrap().is_none());

    let removed = store.delete_if_expired(&key, t(120)).await.unwrap();
    assert_eq!(removed, Some(SeatLock::new("b1", t(120))));
    assert!(store.get(&key).await.unwrap().is_none());
    assert!(store.delete(&key).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_expired_entries_cannot_be_extended() {
    let redis = TestRedis::start().await;
    let store = redis.client().await;
    let key = SeatKey::new(showtime(), "A1");
    store.try_create(&key, &SeatLock::new("u1", t(10)), t(0)).await.unwrap();

    // Expiry equal to now already counts as lapsed.
    assert!(!store.extend(&key, None, t(100), t(10)).await.unwrap());
    assert!(!store.rebind(&key, None, "b1", t(11)).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), Some(SeatLock::new("u1", t(10))));

    assert!(store.delete_if_expired(&key, t(9)).await.unwrap().is_none());
    assert!(store.delete_if_expired(&key, t(10)).await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_takes_over_lapsed_entries() {
    let redis = TestRedis::start().await;
    let store = redis.client().await;
    let key = SeatKey::new(showtime(), "A1");
    store.try_create(&key, &SeatLock::new("u1", t(10)), t(0)).await.unwrap();

    assert_eq!(
        store.try_create(&key, &SeatLock::new("u2", t(70)), t(9)).await.unwrap(),
        CreateOutcome::Held(SeatLock::new("u1", t(10)))
    );
    assert_eq!(
        store.try_create(&key, &SeatLock::new("u2", t(70)), t(10)).await.unwrap(),
        CreateOutcome::Replaced(SeatLock::new("u1", t(10)))
    );
    assert_eq!(store.get(&key).await.unwrap(), Some(SeatLock::new("u2", t(70))));
    assert_eq!(
        store.try_create(&key, &SeatLock::new("u3", t(80)), t(20)).await.unwrap(),
        CreateOutcome::Held(SeatLock::new("u2", t(70)))
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_holder_ids_with_pipes_round_trip() {
    let redis = TestRedis::start().await;
    let store = redis.client().await;
    let key = SeatKey::new(showtime(), "A1");
    let holder = "guest|tab|7";

    store.try_create(&key, &SeatLock::new(holder, t(60)), t(0)).await.unwrap();
    assert!(store.extend(&key, Some(holder), t(90), t(0)).await.unwrap());
    assert!(!store.extend(&key, Some("guest"), t(95), t(0)).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), Some(SeatLock::new(holder, t(90))));

    let removed = store.delete_if_holder(&key, holder).await.unwrap();
    assert_eq!(removed, Some(SeatLock::new(holder, t(90))));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_scan_filters_by_showtime() {
    let redis = TestRedis::start().await;
    let store = redis.client().await;
    let show = showtime();
    let other = showtime();
    for (s, seat) in [(&show, "B1"), (&show, "A1"), (&other, "A1")] {
        store.try_create(&SeatKey::new(s.as_str(), seat), &SeatLock::new("u", t(60)), t(0)).await.unwrap();
    }

    let mut seats: Vec<String> = store
        .scan(Some(show.as_str()), 1)
        .await
        .unwrap()
        .into_iter()
        .map(|(k, _)| k.seat_id)
        .collect();
    seats.sort();
    assert_eq!(seats, vec!["A1", "B1"]);

    let all = store.scan(None, 100).await.unwrap();
    assert!(all.iter().any(|(k, _)| k.showtime_id == other));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_scan_treats_glob_characters_literally() {
    let redis = TestRedis::start().await;
    let store = redis.client().await;
    let prefix = Uuid::new_v4();
    let plain = format!("{}-1", prefix);
    let globbed = format!("{}-*", prefix);
    store.try_create(&SeatKey::new(plain.as_str(), "A1"), &SeatLock::new("u", t(60)), t(0)).await.unwrap();
    store.try_create(&SeatKey::new(globbed.as_str(), "A1"), &SeatLock::new("u", t(60)), t(0)).await.unwrap();

    let found = store.scan(Some(globbed.as_str()), 10).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].0.showtime_id, globbed);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_load_skips_missing_and_malformed_entries() {
    let redis = TestRedis::start().await;
    let store = redis.client().await;
    let show = showtime();
    let live = SeatKey::new(show.as_str(), "A1");
    let gone = SeatKey::new(show.as_str(), "A2");
    let garbled = SeatKey::new(show.as_str(), "A3");

    store.try_create(&live, &SeatLock::new("u", t(60)), t(0)).await.unwrap();
    store.try_create(&gone, &SeatLock::new("u", t(60)), t(0)).await.unwrap();
    redis.set_raw(&garbled.to_string(), "no-separator").await;

    // Listed, then deleted before the values are read.
    let keys = vec![live.to_string(), gone.to_string(), garbled.to_string()];
    store.delete(&gone).await.unwrap();

    let entries = store.load(&keys, 2).await.unwrap();
    assert_eq!(entries, vec![(live, SeatLock::new("u", t(60)))]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_scan_tolerates_concurrent_deletes() {
    let redis = TestRedis::start().await;
    let store = Arc::new(redis.client().await);
    let show = showtime();
    let keys: Vec<SeatKey> = (0..200).map(|i| SeatKey::new(show.as_str(), format!("S{i}"))).collect();
    for key in &keys {
        store.try_create(key, &SeatLock::new("u", t(60)), t(0)).await.unwrap();
    }

    let deleter = {
        let store = store.clone();
        let keys = keys.clone();
        tokio::spawn(async move {
            for key in keys.iter().step_by(2) {
                store.delete(key).await.unwrap();
            }
        })
    };

    let scanned = store.scan(Some(show.as_str()), 10).await.unwrap();
    deleter.await.unwrap();

    assert!(scanned.len() >= 100 && scanned.len() <= 200);
    for (key, lock) in &scanned {
        assert_eq!(key.showtime_id, show);
        assert_eq!(lock, &SeatLock::new("u", t(60)));
    }
    assert_eq!(store.scan(Some(show.as_str()), 10).await.unwrap().len(), 100);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_dedup_marker_is_set_once_and_can_be_cleared() {
    let redis = TestRedis::start().await;
    let dedup = redis.client().await;
    let event_id = Uuid::new_v4();

    assert!(dedup.first_delivery("showtime-saga", event_id).await.unwrap());
    assert!(!dedup.first_delivery("showtime-saga", event_id).await.unwrap());
    assert!(dedup.first_delivery("booking-saga", event_id).await.unwrap());

    dedup.forget("showtime-saga", event_id).await.unwrap();
    assert!(dedup.first_delivery("showtime-saga", event_id).await.unwrap());
}
