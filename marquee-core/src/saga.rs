//! Guarded transitions of the booking saga.
//!
//! Every status change goes through [`BookingStatus::apply`]; anything not listed in the
//! table below is rejected, so callers never branch on raw status values.
//!
//! | from                             | trigger            | to                 |
//! |----------------------------------|--------------------|--------------------|
//! | PENDING                          | SeatsLocked        | SEAT_LOCKED        |
//! | SEAT_LOCKED                      | PaymentInitiated   | AWAITING_PAYMENT   |
//! | AWAITING_PAYMENT                 | PaymentSucceeded   | CONFIRMED          |
//! | AWAITING_PAYMENT                 | PaymentFailed      | CANCELLED          |
//! | SEAT_LOCKED / AWAITING_PAYMENT   | CancelRequested    | CANCELLED          |
//! | SEAT_LOCKED / AWAITING_PAYMENT   | ReleaseCommanded   | CANCELLED          |
//! | SEAT_LOCKED / AWAITING_PAYMENT   | HoldExpired        | EXPIRED            |

use serde::{Deserialize, Serialize};

use crate::booking::BookingStatus;
use crate::error::SagaError;
use crate::lock::UnlockReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaTrigger {
    SeatsLocked,
    PaymentInitiated,
    PaymentSucceeded,
    PaymentFailed,
    CancelRequested,
    ReleaseCommanded,
    HoldExpired,
}

impl SagaTrigger {
    /// Trigger that moves a booking into `status`, used when replaying status broadcasts.
    pub fn reaching(status: BookingStatus) -> Option<Self> {
        match status {
            BookingStatus::Pending => None,
            BookingStatus::SeatLocked => Some(SagaTrigger::SeatsLocked),
            BookingStatus::AwaitingPayment => Some(SagaTrigger::PaymentInitiated),
            BookingStatus::Confirmed => Some(SagaTrigger::PaymentSucceeded),
            BookingStatus::Cancelled => Some(SagaTrigger::CancelRequested),
            BookingStatus::Expired => Some(SagaTrigger::HoldExpired),
        }
    }

    /// Trigger raised by a seat-unlock event that the booking side did not initiate.
    pub fn from_unlock(reason: UnlockReason) -> Self {
        match reason {
            UnlockReason::Timeout => SagaTrigger::HoldExpired,
            UnlockReason::Cancelled => SagaTrigger::CancelRequested,
            UnlockReason::SystemReleased => SagaTrigger::ReleaseCommanded,
        }
    }
}

impl BookingStatus {
    pub fn apply(self, trigger: SagaTrigger) -> Result<BookingStatus, SagaError> {
        use BookingStatus::*;
        use SagaTrigger::*;

        let next = match (self, trigger) {
            (Pending, SeatsLocked) => SeatLocked,
            (SeatLocked, PaymentInitiated) => AwaitingPayment,
            (AwaitingPayment, PaymentSucceeded) => Confirmed,
            (AwaitingPayment, PaymentFailed) => Cancelled,
            (SeatLocked | AwaitingPayment, CancelRequested | ReleaseCommanded) => Cancelled,
            (SeatLocked | AwaitingPayment, HoldExpired) => Expired,
            (from, trigger) => return Err(SagaError::InvalidTransition { from, trigger }),
        };

        Ok(next)
    }

    /// Reason recorded on the seat release that follows reaching this status.
    pub fn release_reason(&self) -> Option<UnlockReason> {
        match self {
            BookingStatus::Cancelled => Some(UnlockReason::Cancelled),
            BookingStatus::Expired => Some(UnlockReason::Timeout),
            _ => None,
        }
    }
}
