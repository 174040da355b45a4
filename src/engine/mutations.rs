use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    OVERRIDES_PURGED_TOTAL, RESERVATIONS_TOTAL, STATUS_TRANSITIONS_TOTAL, SWEEP_DURATION_SECONDS,
    THERAPISTS_ACTIVE,
};

use super::conflict::{check_slot_free, validate_client, validate_name, validate_slot};
use super::lifecycle::{effective_status, resolve_status};
use super::{detached, wal_append, Engine, EngineError, WalCommand};

impl Engine {
    // ── Roster ───────────────────────────────────────────────

    pub async fn create_therapist(&self, id: Ulid, name: &str) -> Result<TherapistInfo, EngineError> {
        let name = validate_name(name)?;
        let roster = self.roster.clone().lock_owned().await;
        if self.state.len() >= MAX_THERAPISTS {
            return Err(EngineError::LimitExceeded("too many therapists"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::TherapistAdded { id, name: name.clone() };
        let wal_tx = self.wal_tx.clone();
        let state = self.state.clone();
        let notify = self.notify.clone();
        let ts = TherapistState::new(id, name.clone());
        detached(async move {
            let _roster = roster;
            wal_append(&wal_tx, vec![event.clone()]).await?;
            state.insert(id, Arc::new(RwLock::new(ts)));
            notify.send(id, &event);
            metrics::gauge!(THERAPISTS_ACTIVE).set(state.len() as f64);
            Ok::<_, EngineError>(())
        })
        .await?;
        info!("therapist {id} added: {name}");
        Ok(TherapistInfo { id, name })
    }

    /// Remove a therapist. Refused while they still hold non-cancelled bookings.
    pub async fn remove_therapist(&self, id: Ulid) -> Result<(), EngineError> {
        let roster = self.roster.clone().lock_owned().await;
        let ts = self.get_therapist(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ts.write_owned().await;
        if guard.has_live_bookings() {
            return Err(EngineError::HasLiveBookings(id));
        }

        let event = Event::TherapistRemoved { id };
        let wal_tx = self.wal_tx.clone();
        let state = self.state.clone();
        let booking_map = self.booking_to_therapist.clone();
        let notify = self.notify.clone();
        detached(async move {
            let _roster = roster;
            wal_append(&wal_tx, vec![event.clone()]).await?;
            for booking_id in guard.bookings.keys() {
                booking_map.remove(booking_id);
            }
            // Unlink before releasing the lock so waiters see the removal.
            state.remove(&id);
            drop(guard);
            notify.send(id, &event);
            notify.remove(&id);
            metrics::gauge!(THERAPISTS_ACTIVE).set(state.len() as f64);
            Ok::<_, EngineError>(())
        })
        .await?;
        info!("therapist {id} removed");
        Ok(())
    }

    // ── Slot allocator ───────────────────────────────────────

    /// Reserve `(therapist, date, slot)` for a client.
    ///
    /// The availability check, the WAL commit and the in-memory insert all
    /// happen under the therapist's write lock, so competing reservations for
    /// the same slot are totally ordered and exactly one of them wins.
    pub async fn reserve(
        &self,
        therapist_id: Ulid,
        date: NaiveDate,
        slot: SlotIndex,
        client: ClientInfo,
    ) -> Result<Booking, EngineError> {
        let result = self.reserve_inner(therapist_id, date, slot, client).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_conflict() => "conflict",
            Err(EngineError::Validation(_) | EngineError::LimitExceeded(_)) => "invalid",
            Err(EngineError::NotFound(_)) => "not_found",
            Err(_) => "error",
        };
        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn reserve_inner(
        &self,
        therapist_id: Ulid,
        date: NaiveDate,
        slot: SlotIndex,
        client: ClientInfo,
    ) -> Result<Booking, EngineError> {
        let slot_def = validate_slot(&self.catalog, slot)?;
        let client = validate_client(&client)?;
        let guard = self.therapist_write(therapist_id).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_THERAPIST {
            return Err(EngineError::LimitExceeded("too many bookings for therapist"));
        }

        check_slot_free(&guard, date, slot)?;

        let now = self.clock.now();
        let id = Ulid::new();
        let status = resolve_status(now, date, slot_def, false);
        let event = Event::BookingReserved {
            id,
            therapist_id,
            date,
            slot,
            client,
            status,
            created_at: now,
        };
        let guard = self.commit(therapist_id, guard, vec![event]).await?;
        info!("booking {id} reserved: therapist {therapist_id} {date} slot {slot}");

        guard
            .bookings
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    // ── Manual transitions ───────────────────────────────────

    /// Cancel a pending or in-progress booking. Frees the slot.
    pub async fn cancel(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.manual_transition(id, "cancel", BookingStatus::Cancelled).await
    }

    /// Mark an in-progress booking completed ahead of its slot end.
    /// A booking whose slot has not started yet cannot be confirmed.
    pub async fn confirm(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.manual_transition(id, "confirm", BookingStatus::Completed).await
    }

    async fn manual_transition(
        &self,
        id: Ulid,
        action: &'static str,
        target: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let (therapist_id, guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
        let current = match self.catalog.get(booking.slot) {
            Some(slot) => effective_status(booking, slot, self.clock.now()),
            None => booking.status,
        };
        let allowed = match target {
            BookingStatus::Completed => current == BookingStatus::InProgress,
            _ => !current.is_terminal(),
        };
        if !allowed {
            return Err(EngineError::InvalidTransition {
                id,
                status: current,
                action,
            });
        }

        let event = Event::BookingStatusChanged {
            id,
            therapist_id,
            status: target,
        };
        let guard = self.commit(therapist_id, guard, vec![event]).await?;
        metrics::counter!(STATUS_TRANSITIONS_TOTAL, "status" => target.as_str(), "source" => "manual")
            .increment(1);
        info!("booking {id}: {current} -> {target} ({action})");

        guard
            .bookings
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Delete a booking row. Only cancelled bookings may be deleted.
    pub async fn delete_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (therapist_id, guard) = self.resolve_booking_write(&id).await?;
        let status = guard
            .bookings
            .get(&id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound(id))?;
        if status != BookingStatus::Cancelled {
            return Err(EngineError::InvalidTransition {
                id,
                status,
                action: "delete",
            });
        }
        let event = Event::BookingDeleted { id, therapist_id };
        self.commit(therapist_id, guard, vec![event]).await?;
        info!("booking {id} deleted");
        Ok(())
    }

    // ── Availability overrides ───────────────────────────────

    /// Flip whether the therapist is off on `date`. Returns the new off-date set.
    /// Existing bookings on that date are left untouched.
    pub async fn toggle_day_off(
        &self,
        therapist_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        let guard = self.therapist_write(therapist_id).await?;
        if !guard.is_off(date) && guard.override_count() >= MAX_OVERRIDES_PER_THERAPIST {
            return Err(EngineError::LimitExceeded("too many overrides for therapist"));
        }
        let event = Event::DayOffToggled { therapist_id, date };
        let guard = self.commit(therapist_id, guard, vec![event]).await?;
        info!("therapist {therapist_id} off on {date}: {}", guard.is_off(date));
        Ok(guard.days_off.iter().copied().collect())
    }

    /// Flip whether `(date, slot)` is suppressed. Returns the new suppressed set.
    pub async fn toggle_slot(
        &self,
        therapist_id: Ulid,
        date: NaiveDate,
        slot: SlotIndex,
    ) -> Result<Vec<SuppressedSlot>, EngineError> {
        validate_slot(&self.catalog, slot)?;
        let guard = self.therapist_write(therapist_id).await?;
        if !guard.is_suppressed(date, slot) && guard.override_count() >= MAX_OVERRIDES_PER_THERAPIST {
            return Err(EngineError::LimitExceeded("too many overrides for therapist"));
        }
        let event = Event::SlotToggled {
            therapist_id,
            date,
            slot,
        };
        let guard = self.commit(therapist_id, guard, vec![event]).await?;
        info!(
            "therapist {therapist_id} slot {slot} on {date} suppressed: {}",
            guard.is_suppressed(date, slot)
        );
        Ok(guard
            .suppressed
            .iter()
            .map(|&(date, slot)| SuppressedSlot { date, slot })
            .collect())
    }

    /// Drop every override dated before `today`. Returns how many entries went.
    pub async fn purge_expired_overrides(&self, today: NaiveDate) -> Result<usize, EngineError> {
        let therapist_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut purged = 0;
        for therapist_id in therapist_ids {
            let Ok(guard) = self.therapist_write(therapist_id).await else {
                continue;
            };
            let expired = guard.expired_overrides(today);
            if expired == 0 {
                continue;
            }
            let event = Event::OverridesPurged {
                therapist_id,
                before: today,
            };
            self.commit(therapist_id, guard, vec![event]).await?;
            purged += expired;
        }
        if purged > 0 {
            metrics::counter!(OVERRIDES_PURGED_TOTAL).increment(purged as u64);
            info!("purged {purged} overrides dated before {today}");
        }
        Ok(purged)
    }

    // ── Lifecycle sweep ──────────────────────────────────────

    /// Persist every status change that time alone has caused by `now`.
    ///
    /// Only non-terminal bookings are looked at and only changed rows are
    /// written, so running it twice with the same `now` writes nothing the
    /// second time. Cancel and sweep serialize on the therapist lock, which
    /// keeps a cancelled booking cancelled. Each therapist's changes go to
    /// the WAL as one entry, so the lock is held for a single fsync.
    pub async fn sweep(&self, now: NaiveDateTime) -> Result<usize, EngineError> {
        let started = std::time::Instant::now();
        let therapist_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut updated = 0;

        for therapist_id in therapist_ids {
            let Ok(guard) = self.therapist_write(therapist_id).await else {
                continue;
            };
            let mut due: Vec<(Ulid, BookingStatus)> = guard
                .bookings
                .values()
                .filter(|b| !b.status.is_terminal())
                .filter_map(|b| {
                    let slot = self.catalog.get(b.slot)?;
                    let next = resolve_status(now, b.date, slot, false);
                    (next != b.status).then_some((b.id, next))
                })
                .collect();
            if due.is_empty() {
                continue;
            }
            due.sort_by_key(|(id, _)| *id);

            let events = due
                .iter()
                .map(|&(id, status)| Event::BookingStatusChanged {
                    id,
                    therapist_id,
                    status,
                })
                .collect();
            self.commit(therapist_id, guard, events).await?;
            for (id, status) in &due {
                metrics::counter!(STATUS_TRANSITIONS_TOTAL, "status" => status.as_str(), "source" => "sweep")
                    .increment(1);
                debug!("sweep: booking {id} -> {status}");
            }
            updated += due.len();
        }

        metrics::histogram!(SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(updated)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Hold the roster lock and a read lock on every therapist until the
        // swap is done: no event can be appended between snapshot and swap.
        let _roster = self.roster.lock().await;
        let mut therapist_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        therapist_ids.sort();

        let mut guards = Vec::with_capacity(therapist_ids.len());
        for id in &therapist_ids {
            if let Some(ts) = self.get_therapist(id) {
                guards.push(ts.read_owned().await);
            }
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::TherapistAdded {
                id: guard.id,
                name: guard.name.clone(),
            });

            let mut bookings: Vec<&Booking> = guard.bookings.values().collect();
            bookings.sort_by_key(|b| b.id);
            for b in bookings {
                events.push(Event::BookingReserved {
                    id: b.id,
                    therapist_id: guard.id,
                    date: b.date,
                    slot: b.slot,
                    client: b.client.clone(),
                    status: b.status,
                    created_at: b.created_at,
                });
            }
            for &date in &guard.days_off {
                events.push(Event::DayOffToggled {
                    therapist_id: guard.id,
                    date,
                });
            }
            for &(date, slot) in &guard.suppressed {
                events.push(Event::SlotToggled {
                    therapist_id: guard.id,
                    date,
                    slot,
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
