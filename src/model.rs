use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use crate::catalog::SlotIndex;

/// Where a booking is in its lifecycle. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque contact details, filled in by whoever looked the client up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub therapist_id: Ulid,
    pub client: ClientInfo,
    pub date: NaiveDate,
    pub slot: SlotIndex,
    pub status: BookingStatus,
    pub created_at: NaiveDateTime,
}

/// Everything known about one therapist: their bookings and availability overrides.
#[derive(Debug, Clone)]
pub struct TherapistState {
    pub id: Ulid,
    pub name: String,
    pub bookings: HashMap<Ulid, Booking>,
    /// Uniqueness index over non-cancelled bookings: at most one holder per (date, slot).
    pub live: BTreeMap<(NaiveDate, SlotIndex), Ulid>,
    pub days_off: BTreeSet<NaiveDate>,
    pub suppressed: BTreeSet<(NaiveDate, SlotIndex)>,
}

impl TherapistState {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            bookings: HashMap::new(),
            live: BTreeMap::new(),
            days_off: BTreeSet::new(),
            suppressed: BTreeSet::new(),
        }
    }

    /// Insert a booking. Non-cancelled bookings claim their slot in the live index.
    pub fn insert_booking(&mut self, booking: Booking) {
        if booking.status != BookingStatus::Cancelled {
            self.live.insert((booking.date, booking.slot), booking.id);
        }
        self.bookings.insert(booking.id, booking);
    }

    /// Update a booking's status. Cancelling releases the slot.
    pub fn set_status(&mut self, id: Ulid, status: BookingStatus) -> Option<&Booking> {
        let booking = self.bookings.get_mut(&id)?;
        booking.status = status;
        if status == BookingStatus::Cancelled {
            let key = (booking.date, booking.slot);
            if self.live.get(&key) == Some(&id) {
                self.live.remove(&key);
            }
        }
        Some(booking)
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let booking = self.bookings.remove(&id)?;
        let key = (booking.date, booking.slot);
        if self.live.get(&key) == Some(&id) {
            self.live.remove(&key);
        }
        Some(booking)
    }

    /// The live booking holding `(date, slot)`, if any.
    pub fn holder(&self, date: NaiveDate, slot: SlotIndex) -> Option<&Booking> {
        self.live
            .get(&(date, slot))
            .and_then(|id| self.bookings.get(id))
    }

    pub fn has_live_bookings(&self) -> bool {
        !self.live.is_empty()
    }

    pub fn is_off(&self, date: NaiveDate) -> bool {
        self.days_off.contains(&date)
    }

    pub fn is_suppressed(&self, date: NaiveDate, slot: SlotIndex) -> bool {
        self.suppressed.contains(&(date, slot))
    }

    /// Flip membership of `date` in the off set. Returns true if the date is now off.
    pub fn toggle_day_off(&mut self, date: NaiveDate) -> bool {
        if self.days_off.remove(&date) {
            false
        } else {
            self.days_off.insert(date);
            true
        }
    }

    /// Flip membership of `(date, slot)` in the suppressed set. Returns true if now suppressed.
    pub fn toggle_slot(&mut self, date: NaiveDate, slot: SlotIndex) -> bool {
        if self.suppressed.remove(&(date, slot)) {
            false
        } else {
            self.suppressed.insert((date, slot));
            true
        }
    }

    pub fn override_count(&self) -> usize {
        self.days_off.len() + self.suppressed.len()
    }

    /// Count of override entries dated strictly before `before`.
    pub fn expired_overrides(&self, before: NaiveDate) -> usize {
        self.days_off.range(..before).count()
            + self
                .suppressed
                .range(..(before, SlotIndex::MIN))
                .count()
    }

    /// Drop override entries dated strictly before `before`. Returns how many were removed.
    pub fn purge_overrides_before(&mut self, before: NaiveDate) -> usize {
        let kept_days = self.days_off.split_off(&before);
        let removed_days = std::mem::replace(&mut self.days_off, kept_days).len();
        let kept_slots = self.suppressed.split_off(&(before, SlotIndex::MIN));
        let removed_slots = std::mem::replace(&mut self.suppressed, kept_slots).len();
        removed_days + removed_slots
    }
}

/// Flat event types, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TherapistAdded {
        id: Ulid,
        name: String,
    },
    TherapistRemoved {
        id: Ulid,
    },
    BookingReserved {
        id: Ulid,
        therapist_id: Ulid,
        date: NaiveDate,
        slot: SlotIndex,
        client: ClientInfo,
        status: BookingStatus,
        created_at: NaiveDateTime,
    },
    BookingStatusChanged {
        id: Ulid,
        therapist_id: Ulid,
        status: BookingStatus,
    },
    BookingDeleted {
        id: Ulid,
        therapist_id: Ulid,
    },
    DayOffToggled {
        therapist_id: Ulid,
        date: NaiveDate,
    },
    SlotToggled {
        therapist_id: Ulid,
        date: NaiveDate,
        slot: SlotIndex,
    },
    OverridesPurged {
        therapist_id: Ulid,
        before: NaiveDate,
    },
}

impl Event {
    /// Short name used for SSE event types and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::TherapistAdded { .. } => "therapist_added",
            Event::TherapistRemoved { .. } => "therapist_removed",
            Event::BookingReserved { .. } => "booking_reserved",
            Event::BookingStatusChanged { .. } => "booking_status_changed",
            Event::BookingDeleted { .. } => "booking_deleted",
            Event::DayOffToggled { .. } => "day_off_toggled",
            Event::SlotToggled { .. } => "slot_toggled",
            Event::OverridesPurged { .. } => "overrides_purged",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TherapistInfo {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingSummary {
    pub id: Ulid,
    pub client_name: String,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotState {
    Free,
    Booked(BookingSummary),
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAvailability {
    pub slot: SlotIndex,
    pub label: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub state: SlotState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TherapistDay {
    pub therapist_id: Ulid,
    pub name: String,
    pub date: NaiveDate,
    pub off: bool,
    pub slots: Vec<SlotAvailability>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuppressedSlot {
    pub date: NaiveDate,
    pub slot: SlotIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overrides {
    pub therapist_id: Ulid,
    pub days_off: Vec<NaiveDate>,
    pub suppressed: Vec<SuppressedSlot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn booking(therapist_id: Ulid, date: NaiveDate, slot: SlotIndex) -> Booking {
        Booking {
            id: Ulid::new(),
            therapist_id,
            client: ClientInfo {
                name: "Alice".into(),
                phone: "555-0100".into(),
            },
            date,
            slot,
            status: BookingStatus::Pending,
            created_at: day(1).and_hms_opt(7, 0, 0).unwrap(),
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(!BookingStatus::InProgress.is_terminal());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
    }

    #[test]
    fn insert_claims_slot() {
        let mut ts = TherapistState::new(Ulid::new(), "Dana".into());
        let b = booking(ts.id, day(2), 0);
        let id = b.id;
        ts.insert_booking(b);
        assert_eq!(ts.holder(day(2), 0).map(|b| b.id), Some(id));
        assert!(ts.holder(day(2), 1).is_none());
        assert!(ts.has_live_bookings());
    }

    #[test]
    fn cancel_releases_slot_but_keeps_row() {
        let mut ts = TherapistState::new(Ulid::new(), "Dana".into());
        let b = booking(ts.id, day(2), 0);
        let id = b.id;
        ts.insert_booking(b);
        ts.set_status(id, BookingStatus::Cancelled);
        assert!(ts.holder(day(2), 0).is_none());
        assert_eq!(ts.bookings[&id].status, BookingStatus::Cancelled);
        assert!(!ts.has_live_bookings());
    }

    #[test]
    fn completed_still_holds_slot() {
        let mut ts = TherapistState::new(Ulid::new(), "Dana".into());
        let b = booking(ts.id, day(2), 0);
        let id = b.id;
        ts.insert_booking(b);
        ts.set_status(id, BookingStatus::Completed);
        assert_eq!(ts.holder(day(2), 0).map(|b| b.id), Some(id));
    }

    #[test]
    fn cancelled_row_does_not_evict_new_holder() {
        let mut ts = TherapistState::new(Ulid::new(), "Dana".into());
        let first = booking(ts.id, day(2), 0);
        let first_id = first.id;
        ts.insert_booking(first);
        ts.set_status(first_id, BookingStatus::Cancelled);

        let second = booking(ts.id, day(2), 0);
        let second_id = second.id;
        ts.insert_booking(second);

        // Deleting the old cancelled row must leave the new holder alone.
        ts.remove_booking(first_id);
        assert_eq!(ts.holder(day(2), 0).map(|b| b.id), Some(second_id));
    }

    #[test]
    fn toggle_day_off_flips() {
        let mut ts = TherapistState::new(Ulid::new(), "Dana".into());
        assert!(ts.toggle_day_off(day(4)));
        assert!(ts.is_off(day(4)));
        assert!(!ts.toggle_day_off(day(4)));
        assert!(!ts.is_off(day(4)));
    }

    #[test]
    fn toggle_slot_flips() {
        let mut ts = TherapistState::new(Ulid::new(), "Dana".into());
        assert!(ts.toggle_slot(day(4), 2));
        assert!(ts.is_suppressed(day(4), 2));
        assert!(!ts.is_suppressed(day(4), 1));
        assert!(!ts.toggle_slot(day(4), 2));
        assert!(!ts.is_suppressed(day(4), 2));
    }

    #[test]
    fn purge_drops_only_past_entries() {
        let mut ts = TherapistState::new(Ulid::new(), "Dana".into());
        ts.toggle_day_off(day(1));
        ts.toggle_day_off(day(5));
        ts.toggle_slot(day(2), 0);
        ts.toggle_slot(day(5), 1);
        ts.toggle_slot(day(9), 3);

        assert_eq!(ts.expired_overrides(day(5)), 2);
        assert_eq!(ts.purge_overrides_before(day(5)), 2);
        assert_eq!(ts.days_off.iter().copied().collect::<Vec<_>>(), vec![day(5)]);
        assert_eq!(
            ts.suppressed.iter().copied().collect::<Vec<_>>(),
            vec![(day(5), 1), (day(9), 3)]
        );
        assert_eq!(ts.purge_overrides_before(day(5)), 0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingReserved {
            id: Ulid::new(),
            therapist_id: Ulid::new(),
            date: day(2),
            slot: 0,
            client: ClientInfo {
                name: "Alice".into(),
                phone: "555-0100".into(),
            },
            status: BookingStatus::Pending,
            created_at: day(1).and_hms_opt(7, 0, 0).unwrap(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn slot_state_json_shape() {
        let free = serde_json::to_value(SlotState::Free).unwrap();
        assert_eq!(free, serde_json::json!({ "kind": "free" }));

        let id = Ulid::new();
        let booked = serde_json::to_value(SlotState::Booked(BookingSummary {
            id,
            client_name: "Alice".into(),
            status: BookingStatus::InProgress,
        }))
        .unwrap();
        assert_eq!(booked["kind"], "booked");
        assert_eq!(booked["status"], "in_progress");
        assert_eq!(booked["id"], id.to_string());
    }
}
