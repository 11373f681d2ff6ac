pub mod client;
pub mod coordinator;
pub mod handler;

pub use client::{HttpSeatLockClient, LocalSeatLockClient, SeatLockClient, INTERNAL_SECRET_HEADER};
pub use coordinator::{BookingCoordinator, BookingSettings, NewBooking, PaymentHold};
pub use handler::BookingSagaHandler;
