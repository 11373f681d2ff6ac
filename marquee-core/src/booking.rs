use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SagaError;
use crate::saga::SagaTrigger;

/// Booking status in the saga lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    SeatLocked,
    AwaitingPayment,
    Confirmed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::SeatLocked => "SEAT_LOCKED",
            BookingStatus::AwaitingPayment => "AWAITING_PAYMENT",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Confirmed | BookingStatus::Cancelled | BookingStatus::Expired
        )
    }

    /// Statuses during which every seat of the booking must be held in the Lock Store.
    pub fn holds_seats(&self) -> bool {
        matches!(self, BookingStatus::SeatLocked | BookingStatus::AwaitingPayment)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BookingStatus::Pending),
            "SEAT_LOCKED" => Ok(BookingStatus::SeatLocked),
            "AWAITING_PAYMENT" => Ok(BookingStatus::AwaitingPayment),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            "EXPIRED" => Ok(BookingStatus::Expired),
            other => Err(SagaError::Validation(format!("Unknown booking status: {}", other))),
        }
    }
}

/// A user's attempt to purchase seats for one showtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub showtime_id: String,
    /// None for guest checkouts
    pub user_id: Option<String>,
    /// Session identity that selected the seats before the booking existed
    pub holder_id: String,
    pub seat_ids: Vec<String>,
    /// Minor currency units
    pub total_amount: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(
        id: Uuid,
        showtime_id: String,
        user_id: Option<String>,
        holder_id: String,
        seat_ids: Vec<String>,
        total_amount: i64,
        currency: String,
        now: DateTime<Utc>,
    ) -> Result<Self, SagaError> {
        validate_seat_ids(&seat_ids)?;
        if total_amount < 0 {
            return Err(SagaError::Validation("Total amount must not be negative".to_string()));
        }

        Ok(Self {
            id,
            showtime_id,
            user_id,
            holder_id,
            seat_ids,
            total_amount,
            currency,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a saga trigger, returning the status the booking moved from.
    pub fn apply(&mut self, trigger: SagaTrigger, now: DateTime<Utc>) -> Result<BookingStatus, SagaError> {
        if self.status.is_terminal() {
            return Err(SagaError::AlreadyTerminal {
                booking_id: self.id,
                status: self.status,
            });
        }

        let previous = self.status;
        self.status = previous.apply(trigger)?;
        self.updated_at = now;
        Ok(previous)
    }

    /// Identifier written into seat locks once the booking owns them.
    pub fn lock_holder(&self) -> String {
        self.id.to_string()
    }

    pub fn overlaps(&self, showtime_id: &str, seat_ids: &[String]) -> bool {
        self.showtime_id == showtime_id && self.seat_ids.iter().any(|s| seat_ids.contains(s))
    }

    pub fn is_owned_by(&self, subject: &str) -> bool {
        self.holder_id == subject || self.user_id.as_deref() == Some(subject)
    }
}

/// Seat sets are ordered, non-empty and duplicate-free.
pub fn validate_seat_ids(seat_ids: &[String]) -> Result<(), SagaError> {
    if seat_ids.is_empty() {
        return Err(SagaError::Validation("At least one seat is required".to_string()));
    }

    let mut seen = HashSet::with_capacity(seat_ids.len());
    for seat in seat_ids {
        if seat.is_empty() || seat.contains(':') || seat.contains('|') {
            return Err(SagaError::Validation(format!("Invalid seat id: {:?}", seat)));
        }
        if !seen.insert(seat.as_str()) {
            return Err(SagaError::Validation(format!("Duplicate seat id: {}", seat)));
        }
    }

    Ok(())
}
