mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;

pub use error::EngineError;
pub use lifecycle::{effective_status, resolve_status, slot_window};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::catalog::SlotCatalog;
use crate::clock::Clock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedTherapistState = Arc<RwLock<TherapistState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// Events from one mutation. They share a single fsync.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => {
                            batch.push((events, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    let event_count: usize = batch.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(event_count as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {event_count} events: {e}");
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    'outer: for (events, _) in batch {
        for event in events {
            if let Err(e) = wal.append_buffered(event) {
                append_err = Some(e);
                break 'outer;
            }
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Hand events to the group-commit writer and wait for the fsync.
pub(super) async fn wal_append(
    wal_tx: &mpsc::Sender<WalCommand>,
    events: Vec<Event>,
) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append { events, response: tx })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

/// Run a commit on its own task and wait for it.
///
/// Once an event is handed to the writer it will reach disk, so the in-memory
/// apply must happen too even if the caller's future is dropped mid-await.
/// The task owns whatever locks the commit needs until it is done.
pub(super) async fn detached<T, F>(commit: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, EngineError>> + Send + 'static,
{
    tokio::spawn(commit)
        .await
        .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking engine: one write lock per therapist, every mutation committed
/// to the WAL before it becomes visible in memory.
pub struct Engine {
    pub state: Arc<DashMap<Ulid, SharedTherapistState>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub catalog: Arc<SlotCatalog>,
    pub clock: Arc<dyn Clock>,
    /// Reverse lookup: booking id → therapist id
    pub(super) booking_to_therapist: Arc<DashMap<Ulid, Ulid>>,
    /// Serializes roster changes against WAL compaction.
    pub(super) roster: Arc<Mutex<()>>,
}

/// Apply an event directly to a TherapistState (no locking, caller holds the lock).
fn apply_to_therapist(ts: &mut TherapistState, event: &Event, booking_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingReserved {
            id,
            therapist_id,
            date,
            slot,
            client,
            status,
            created_at,
        } => {
            ts.insert_booking(Booking {
                id: *id,
                therapist_id: *therapist_id,
                client: client.clone(),
                date: *date,
                slot: *slot,
                status: *status,
                created_at: *created_at,
            });
            booking_map.insert(*id, *therapist_id);
        }
        Event::BookingStatusChanged { id, status, .. } => {
            ts.set_status(*id, *status);
        }
        Event::BookingDeleted { id, .. } => {
            ts.remove_booking(*id);
            booking_map.remove(id);
        }
        Event::DayOffToggled { date, .. } => {
            ts.toggle_day_off(*date);
        }
        Event::SlotToggled { date, slot, .. } => {
            ts.toggle_slot(*date, *slot);
        }
        Event::OverridesPurged { before, .. } => {
            ts.purge_overrides_before(*before);
        }
        // TherapistAdded/Removed are handled at the DashMap level, not here
        Event::TherapistAdded { .. } | Event::TherapistRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        catalog: Arc<SlotCatalog>,
        clock: Arc<dyn Clock>,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: Arc::new(DashMap::new()),
            wal_tx,
            notify,
            catalog,
            clock,
            booking_to_therapist: Arc::new(DashMap::new()),
            roster: Arc::new(Mutex::new(())),
        };

        // Replay events. We are the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this runs
        // inside an async context.
        for event in &events {
            match event {
                Event::TherapistAdded { id, name } => {
                    let ts = TherapistState::new(*id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(ts)));
                }
                Event::TherapistRemoved { id } => {
                    engine.booking_to_therapist.retain(|_, tid| tid != id);
                    engine.state.remove(id);
                }
                Event::BookingReserved { id, slot, .. } if !engine.catalog.contains(*slot) => {
                    tracing::warn!("replay: booking {id} refers to slot {slot} missing from catalog, skipped");
                }
                other => {
                    let therapist_id = event_therapist_id(other);
                    if let Some(therapist_id) = therapist_id
                        && let Some(entry) = engine.state.get(&therapist_id) {
                            let ts_arc = entry.clone();
                            let mut guard = ts_arc.try_write().expect("replay: uncontended write");
                            apply_to_therapist(&mut guard, other, &engine.booking_to_therapist);
                        }
                }
            }
        }

        metrics::gauge!(crate::observability::THERAPISTS_ACTIVE).set(engine.state.len() as f64);
        tracing::info!(
            "replayed {} events: {} therapists, {} bookings",
            events.len(),
            engine.state.len(),
            engine.booking_to_therapist.len()
        );
        Ok(engine)
    }

    pub fn get_therapist(&self, id: &Ulid) -> Option<SharedTherapistState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_therapist_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_therapist.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify, run to completion under `guard`.
    ///
    /// All `events` go to disk in one group-commit entry and are applied
    /// together. The guard comes back once they are visible.
    pub(super) async fn commit(
        &self,
        therapist_id: Ulid,
        mut guard: OwnedRwLockWriteGuard<TherapistState>,
        events: Vec<Event>,
    ) -> Result<OwnedRwLockWriteGuard<TherapistState>, EngineError> {
        let wal_tx = self.wal_tx.clone();
        let booking_map = self.booking_to_therapist.clone();
        let notify = self.notify.clone();
        detached(async move {
            wal_append(&wal_tx, events.clone()).await?;
            for event in &events {
                apply_to_therapist(&mut guard, event, &booking_map);
                notify.send(therapist_id, event);
            }
            Ok::<_, EngineError>(guard)
        })
        .await
    }

    /// Get a therapist and acquire its write lock, failing if the therapist
    /// was removed while we waited.
    pub(super) async fn therapist_write(
        &self,
        therapist_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<TherapistState>, EngineError> {
        let ts = self
            .get_therapist(&therapist_id)
            .ok_or(EngineError::NotFound(therapist_id))?;
        let guard = ts.write_owned().await;
        if !self.state.contains_key(&therapist_id) {
            return Err(EngineError::NotFound(therapist_id));
        }
        Ok(guard)
    }

    /// Lookup booking → therapist, get therapist, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<TherapistState>), EngineError> {
        let therapist_id = self
            .get_therapist_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let guard = self.therapist_write(therapist_id).await?;
        // The booking may have been deleted while we waited for the lock.
        if !guard.bookings.contains_key(booking_id) {
            return Err(EngineError::NotFound(*booking_id));
        }
        Ok((therapist_id, guard))
    }
}

/// Extract the therapist id from an event (for non-Add/Remove events).
fn event_therapist_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingReserved { therapist_id, .. }
        | Event::BookingStatusChanged { therapist_id, .. }
        | Event::BookingDeleted { therapist_id, .. }
        | Event::DayOffToggled { therapist_id, .. }
        | Event::SlotToggled { therapist_id, .. }
        | Event::OverridesPurged { therapist_id, .. } => Some(*therapist_id),
        Event::TherapistAdded { .. } | Event::TherapistRemoved { .. } => None,
    }
}
