use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::*;

use super::lifecycle::effective_status;
use super::{Engine, EngineError};

impl Engine {
    /// Status of every catalog slot on `date`, per therapist.
    ///
    /// A held slot reports `Booked` even if it was suppressed afterwards;
    /// suppression only blocks new reservations.
    pub async fn query_day(
        &self,
        therapist_id: Option<Ulid>,
        date: NaiveDate,
    ) -> Result<Vec<TherapistDay>, EngineError> {
        let ids = match therapist_id {
            Some(id) => {
                if !self.state.contains_key(&id) {
                    return Err(EngineError::NotFound(id));
                }
                vec![id]
            }
            None => self.sorted_therapist_ids(),
        };

        let now = self.clock.now();
        let mut days = Vec::with_capacity(ids.len());
        for id in ids {
            // Removed between listing and locking: skip.
            let Some(ts) = self.get_therapist(&id) else {
                continue;
            };
            let guard = ts.read().await;
            days.push(self.day_view(&guard, date, now));
        }
        Ok(days)
    }

    fn day_view(&self, ts: &TherapistState, date: NaiveDate, now: NaiveDateTime) -> TherapistDay {
        let off = ts.is_off(date);
        let slots = self
            .catalog
            .iter()
            .map(|(index, slot)| {
                let state = match ts.holder(date, index) {
                    Some(b) => SlotState::Booked(BookingSummary {
                        id: b.id,
                        client_name: b.client.name.clone(),
                        status: effective_status(b, slot, now),
                    }),
                    None if off || ts.is_suppressed(date, index) => SlotState::Suppressed,
                    None => SlotState::Free,
                };
                SlotAvailability {
                    slot: index,
                    label: slot.label.clone(),
                    start: slot.start,
                    end: slot.end,
                    state,
                }
            })
            .collect();
        TherapistDay {
            therapist_id: ts.id,
            name: ts.name.clone(),
            date,
            off,
            slots,
        }
    }

    pub async fn list_therapists(&self) -> Vec<TherapistInfo> {
        let mut out = Vec::with_capacity(self.state.len());
        for id in self.sorted_therapist_ids() {
            if let Some(ts) = self.get_therapist(&id) {
                let guard = ts.read().await;
                out.push(TherapistInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                });
            }
        }
        out
    }

    /// Bookings on `date` (cancelled included), optionally for one therapist,
    /// with statuses resolved at read time.
    pub async fn list_bookings(
        &self,
        date: NaiveDate,
        therapist_id: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        let ids = match therapist_id {
            Some(id) => {
                if !self.state.contains_key(&id) {
                    return Err(EngineError::NotFound(id));
                }
                vec![id]
            }
            None => self.sorted_therapist_ids(),
        };

        let now = self.clock.now();
        let mut out = Vec::new();
        for id in ids {
            let Some(ts) = self.get_therapist(&id) else {
                continue;
            };
            let guard = ts.read().await;
            let mut day: Vec<Booking> = guard
                .bookings
                .values()
                .filter(|b| b.date == date)
                .map(|b| self.resolved(b, now))
                .collect();
            day.sort_by_key(|b| (b.slot, b.id));
            out.extend(day);
        }
        Ok(out)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let therapist_id = self
            .get_therapist_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let ts = self
            .get_therapist(&therapist_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = ts.read().await;
        let booking = guard.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
        Ok(self.resolved(booking, self.clock.now()))
    }

    pub async fn overrides(&self, therapist_id: Ulid) -> Result<Overrides, EngineError> {
        let ts = self
            .get_therapist(&therapist_id)
            .ok_or(EngineError::NotFound(therapist_id))?;
        let guard = ts.read().await;
        Ok(Overrides {
            therapist_id,
            days_off: guard.days_off.iter().copied().collect(),
            suppressed: guard
                .suppressed
                .iter()
                .map(|&(date, slot)| SuppressedSlot { date, slot })
                .collect(),
        })
    }

    /// Copy of `booking` with the status it has at `now`. The persisted row is not touched.
    fn resolved(&self, booking: &Booking, now: NaiveDateTime) -> Booking {
        let mut out = booking.clone();
        if let Some(slot) = self.catalog.get(booking.slot) {
            out.status = effective_status(booking, slot, now);
        }
        out
    }

    fn sorted_therapist_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }
}
