use anyhow::Context;
use marquee_booking::{
    BookingCoordinator, BookingSagaHandler, BookingSettings, HttpSeatLockClient, LocalSeatLockClient, SeatLockClient,
};
use marquee_core::{BookingRepository, Clock, LockStore, SeatMapRepository, SystemClock};
use marquee_shared::{EventDeduplicator, EventPublisher};
use marquee_showtime::{hold_duration, ExpirationSweeper, LockSettings, SeatLockService, ShowtimeSagaHandler};
use marquee_store::{
    Backend, Config, DbClient, EventProducer, InMemoryBookingRepository, InMemoryChannel, InMemoryDeduplicator,
    InMemoryLockStore, InMemorySeatMap, PgBookingRepository, PgSeatMapRepository, RedisClient,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::state::{AppState, AuthConfig};

/// Storage and messaging the services run on.
pub struct Backends {
    pub store: Arc<dyn LockStore>,
    pub seat_map: Arc<dyn SeatMapRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub publisher: Arc<dyn EventPublisher>,
    pub dedup: Arc<dyn EventDeduplicator>,
    pub redis: Option<RedisClient>,
    /// Set for the in-memory backend; consumers subscribe to it directly
    pub channel: Option<Arc<InMemoryChannel>>,
}

impl Backends {
    /// In-memory backends over a recording channel, so callers can pump events by hand.
    pub fn in_memory() -> Self {
        Self::memory(InMemoryChannel::new(), InMemoryDeduplicator::new())
    }

    fn memory(channel: InMemoryChannel, dedup: InMemoryDeduplicator) -> Self {
        let channel = Arc::new(channel);
        Self {
            store: Arc::new(InMemoryLockStore::new()),
            seat_map: Arc::new(InMemorySeatMap::new()),
            bookings: Arc::new(InMemoryBookingRepository::new()),
            publisher: channel.clone(),
            dedup: Arc::new(dedup),
            redis: None,
            channel: Some(channel),
        }
    }

    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        if config.backend == Backend::Memory {
            info!("Using in-memory backend");
            let dedup_ttl = Duration::from_secs(config.reservation.dedup_ttl_seconds);
            return Ok(Self::memory(InMemoryChannel::live(), InMemoryDeduplicator::with_ttl(dedup_ttl)));
        }

        // Redis Connection
        let redis = RedisClient::new(&config.redis.url, config.reservation.dedup_ttl_seconds)
            .await
            .context("Failed to connect to Redis")?;

        // Kafka Connection
        let producer = EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?;

        // Postgres Connection
        let db = DbClient::new(&config.database.url, config.database.max_connections)
            .await
            .context("Failed to connect to Postgres")?;
        db.migrate().await.context("Failed to run migrations")?;

        let redis_arc = Arc::new(redis.clone());
        Ok(Self {
            store: redis_arc.clone(),
            seat_map: Arc::new(PgSeatMapRepository::new(db.pool.clone())),
            bookings: Arc::new(PgBookingRepository::new(db.pool)),
            publisher: Arc::new(producer),
            dedup: redis_arc,
            redis: Some(redis),
            channel: None,
        })
    }
}

/// Both sides of the saga wired onto one set of backends.
pub struct Services {
    pub seats: Arc<SeatLockService>,
    pub sweeper: Arc<ExpirationSweeper>,
    pub coordinator: Arc<BookingCoordinator>,
    pub showtime_handler: Arc<ShowtimeSagaHandler>,
    pub booking_handler: Arc<BookingSagaHandler>,
}

impl Services {
    pub fn build(config: &Config, backends: &Backends, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let rules = &config.reservation;
        let seat_hold = hold_duration(rules.seat_hold_seconds).context("Invalid reservation.seat_hold_seconds")?;
        let payment_hold =
            hold_duration(rules.payment_hold_seconds).context("Invalid reservation.payment_hold_seconds")?;

        let seats = Arc::new(SeatLockService::new(
            backends.store.clone(),
            backends.seat_map.clone(),
            backends.publisher.clone(),
            clock.clone(),
            LockSettings {
                seat_hold,
                payment_hold,
                max_seats_per_request: rules.max_seats_per_request,
            },
        ));

        let sweeper = Arc::new(ExpirationSweeper::new(
            backends.store.clone(),
            backends.publisher.clone(),
            clock.clone(),
            rules.sweep_batch_size,
        ));

        let seat_locks: Arc<dyn SeatLockClient> = match &config.booking.showtime_base_url {
            Some(base_url) => {
                info!(base_url = %base_url, "Booking side reaches seat locks over HTTP");
                Arc::new(
                    HttpSeatLockClient::new(base_url, &config.auth.internal_secret)
                        .context("Failed to build seat lock client")?,
                )
            }
            None => Arc::new(LocalSeatLockClient::new(seats.clone())),
        };

        let coordinator = Arc::new(BookingCoordinator::new(
            backends.bookings.clone(),
            seat_locks,
            backends.publisher.clone(),
            clock,
            BookingSettings {
                payment_hold,
                ..BookingSettings::default()
            },
        ));

        Ok(Self {
            showtime_handler: Arc::new(ShowtimeSagaHandler::new(seats.clone())),
            booking_handler: Arc::new(BookingSagaHandler::new(coordinator.clone())),
            seats,
            sweeper,
            coordinator,
        })
    }

    pub fn state(&self, config: &Config, backends: &Backends) -> AppState {
        AppState {
            seats: self.seats.clone(),
            bookings: self.coordinator.clone(),
            auth: AuthConfig {
                secret: config.auth.jwt_secret.clone(),
                expiration: config.auth.jwt_expiration_seconds,
                internal_secret: config.auth.internal_secret.clone(),
            },
            redis: backends.redis.clone(),
        }
    }
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
