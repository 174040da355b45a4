use chrono::{NaiveDate, NaiveDateTime};

use crate::catalog::Slot;
use crate::model::{Booking, BookingStatus};

/// Absolute `[start, end)` of a slot on a given date.
pub fn slot_window(date: NaiveDate, slot: &Slot) -> (NaiveDateTime, NaiveDateTime) {
    (date.and_time(slot.start), date.and_time(slot.end))
}

/// Map a slot on a date to where its booking stands at `now`.
///
/// Start is inclusive and end is exclusive, so at the exact end instant a
/// booking is `Completed` and never both `InProgress` and `Completed`.
pub fn resolve_status(
    now: NaiveDateTime,
    date: NaiveDate,
    slot: &Slot,
    cancelled: bool,
) -> BookingStatus {
    if cancelled {
        return BookingStatus::Cancelled;
    }
    let (start, end) = slot_window(date, slot);
    if now < start {
        BookingStatus::Pending
    } else if now < end {
        BookingStatus::InProgress
    } else {
        BookingStatus::Completed
    }
}

/// Status of a persisted booking as seen at `now`. Terminal statuses stick.
pub fn effective_status(booking: &Booking, slot: &Slot, now: NaiveDateTime) -> BookingStatus {
    if booking.status.is_terminal() {
        booking.status
    } else {
        resolve_status(now, booking.date, slot, false)
    }
}
