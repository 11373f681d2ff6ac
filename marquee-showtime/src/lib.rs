pub mod handler;
pub mod lock_service;
pub mod sweeper;

pub use handler::ShowtimeSagaHandler;
pub use lock_service::{hold_duration, ConfirmReport, LockGrant, LockSettings, SeatHold, SeatLockService, MAX_HOLD_SECONDS};
pub use sweeper::{ExpirationSweeper, SweepReport};
