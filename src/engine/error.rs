use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{BookingStatus, SlotIndex};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input: unknown slot, missing client fields, oversized values.
    Validation(String),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The slot is held by this live booking.
    SlotTaken(Ulid),
    TherapistOff {
        therapist_id: Ulid,
        date: NaiveDate,
    },
    SlotSuppressed {
        therapist_id: Ulid,
        date: NaiveDate,
        slot: SlotIndex,
    },
    InvalidTransition {
        id: Ulid,
        status: BookingStatus,
        action: &'static str,
    },
    HasLiveBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Slot taken, therapist off, or slot suppressed: pick another slot.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::SlotTaken(_)
                | EngineError::TherapistOff { .. }
                | EngineError::SlotSuppressed { .. }
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotTaken(id) => write!(f, "slot already held by booking {id}"),
            EngineError::TherapistOff { therapist_id, date } => {
                write!(f, "therapist {therapist_id} is off on {date}")
            }
            EngineError::SlotSuppressed {
                therapist_id,
                date,
                slot,
            } => write!(
                f,
                "slot {slot} on {date} is unavailable for therapist {therapist_id}"
            ),
            EngineError::InvalidTransition { id, status, action } => {
                write!(f, "cannot {action} booking {id}: status is {status}")
            }
            EngineError::HasLiveBookings(id) => {
                write!(f, "cannot remove therapist {id}: has live bookings")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
