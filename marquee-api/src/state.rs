use marquee_booking::BookingCoordinator;
use marquee_showtime::SeatLockService;
use marquee_store::RedisClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
    pub internal_secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub seats: Arc<SeatLockService>,
    pub bookings: Arc<BookingCoordinator>,
    pub auth: AuthConfig,
    /// Pinged by the health check when running against Redis
    pub redis: Option<RedisClient>,
}
