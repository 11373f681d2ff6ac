use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub reservation: ReservationRules,
    #[serde(default)]
    pub booking: BookingConfig,
}

/// `redis` runs against Redis + Kafka + Postgres; `memory` keeps everything in-process.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationRules {
    #[serde(default = "default_seat_hold")]
    pub seat_hold_seconds: u64,
    #[serde(default = "default_payment_hold")]
    pub payment_hold_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_sweep_batch")]
    pub sweep_batch_size: usize,
    #[serde(default = "default_max_seats")]
    pub max_seats_per_request: usize,
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_seconds: u64,
}

fn default_seat_hold() -> u64 { 300 }
fn default_payment_hold() -> u64 { 600 }
fn default_sweep_interval() -> u64 { 5_000 }
fn default_sweep_batch() -> usize { 500 }
fn default_max_seats() -> usize { 10 }
fn default_dedup_ttl() -> u64 { 86_400 }

impl Default for ReservationRules {
    fn default() -> Self {
        Self {
            seat_hold_seconds: default_seat_hold(),
            payment_hold_seconds: default_payment_hold(),
            sweep_interval_ms: default_sweep_interval(),
            sweep_batch_size: default_sweep_batch(),
            max_seats_per_request: default_max_seats(),
            dedup_ttl_seconds: default_dedup_ttl(),
        }
    }
}

impl ReservationRules {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BookingConfig {
    /// Reach the Seat Lock Service over internal HTTP instead of in-process.
    pub showtime_base_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
    /// Shared secret for service-to-service endpoints
    pub internal_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `MARQUEE__RESERVATION__SEAT_HOLD_SECONDS=120`
            .add_source(config::Environment::with_prefix("MARQUEE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
