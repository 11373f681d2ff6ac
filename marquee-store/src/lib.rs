pub mod app_config;
pub mod booking_repo;
pub mod consumer;
pub mod database;
pub mod events;
pub mod memory;
pub mod redis_repo;
pub mod seat_map_repo;

pub use app_config::{Backend, Config};
pub use booking_repo::PgBookingRepository;
pub use consumer::EventConsumer;
pub use database::DbClient;
pub use events::EventProducer;
pub use memory::{
    InMemoryBookingRepository, InMemoryChannel, InMemoryDeduplicator, InMemoryLockStore, InMemorySeatMap,
    PublishedEvent,
};
pub use redis_repo::RedisClient;
pub use seat_map_repo::PgSeatMapRepository;
