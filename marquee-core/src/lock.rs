use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SagaError;

const KEY_PREFIX: &str = "seat:";

/// Lock Store key: `seat:{showtimeId}:{seatId}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeatKey {
    pub showtime_id: String,
    pub seat_id: String,
}

impl SeatKey {
    pub fn new(showtime_id: impl Into<String>, seat_id: impl Into<String>) -> Self {
        Self {
            showtime_id: showtime_id.into(),
            seat_id: seat_id.into(),
        }
    }

    pub fn pattern() -> String {
        format!("{}*", KEY_PREFIX)
    }

    /// SCAN pattern for one showtime; glob metacharacters in the id match literally.
    pub fn showtime_pattern(showtime_id: &str) -> String {
        let mut escaped = String::with_capacity(showtime_id.len());
        for c in showtime_id.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        format!("{}{}:*", KEY_PREFIX, escaped)
    }

    /// Seat ids must not contain ':' so the key splits unambiguously from the right.
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(KEY_PREFIX)?;
        let (showtime_id, seat_id) = rest.rsplit_once(':')?;
        if showtime_id.is_empty() || seat_id.is_empty() {
            return None;
        }
        Some(Self::new(showtime_id, seat_id))
    }
}

impl fmt::Display for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{}", KEY_PREFIX, self.showtime_id, self.seat_id)
    }
}

/// Value of a Lock Store entry, encoded as `{holderId}|{expiresAtEpochMillis}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatLock {
    pub holder_id: String,
    pub expires_at: DateTime<Utc>,
}

impl SeatLock {
    pub fn new(holder_id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            holder_id: holder_id.into(),
            expires_at,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}|{}", self.holder_id, self.expires_at.timestamp_millis())
    }

    pub fn decode(value: &str) -> Result<Self, SagaError> {
        let (holder, millis) = value
            .rsplit_once('|')
            .ok_or_else(|| SagaError::Store(format!("Malformed lock value: {}", value)))?;

        let millis: i64 = millis
            .parse()
            .map_err(|_| SagaError::Store(format!("Malformed lock expiry: {}", value)))?;

        let expires_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| SagaError::Store(format!("Lock expiry out of range: {}", value)))?;

        Ok(Self::new(holder, expires_at))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_held_by(&self, holder_id: &str) -> bool {
        self.holder_id == holder_id
    }
}

/// Result of a conditional create on a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The key held a lapsed entry, now overwritten; carries the displaced entry.
    Replaced(SeatLock),
    Held(SeatLock),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockReason {
    Timeout,
    Cancelled,
    SystemReleased,
}

impl UnlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnlockReason::Timeout => "timeout",
            UnlockReason::Cancelled => "cancelled",
            UnlockReason::SystemReleased => "system_released",
        }
    }
}

impl fmt::Display for UnlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnlockReason {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(UnlockReason::Timeout),
            "cancelled" => Ok(UnlockReason::Cancelled),
            "system_released" => Ok(UnlockReason::SystemReleased),
            other => Err(SagaError::Validation(format!("Unknown unlock reason: {}", other))),
        }
    }
}
