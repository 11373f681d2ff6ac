pub mod booking;
pub mod clock;
pub mod context;
pub mod error;
pub mod lock;
pub mod repository;
pub mod saga;

pub use booking::{Booking, BookingStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{RequestContext, Role};
pub use error::{SagaError, SagaResult};
pub use lock::{CreateOutcome, SeatKey, SeatLock, UnlockReason};
pub use repository::{BookingRepository, LockStore, SeatMapRepository};
pub use saga::SagaTrigger;

