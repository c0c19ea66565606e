mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use conflict::{check_no_conflict, scan_conflicts, AppointmentLookup, StoredConflict};
pub use error::EngineError;
pub use store::InMemoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::wal::Wal;

pub type SharedSchedule = Arc<RwLock<SellerSchedule>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Several events that are durable together or not at all.
    AppendBatch {
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

impl WalCommand {
    fn into_pending(self) -> Result<PendingAppend, WalCommand> {
        match self {
            WalCommand::Append { event, response } => Ok((vec![event], response)),
            WalCommand::AppendBatch { events, response } => Ok((events, response)),
            other => Err(other),
        }
    }
}

/// Owns the WAL. Appends that arrive while one is being handled are drained
/// into the same batch and made durable by a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let first = match cmd.into_pending() {
            Ok(pending) => pending,
            Err(other) => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![first];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next.into_pending() {
                Ok(pending) => batch.push(pending),
                Err(other) => {
                    // Commit what we have before compaction sees the file.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    debug!("WAL writer stopped");
}

/// Append and fsync every pending entry. On any failure the whole group is
/// rolled back out of the file and every sender gets the error.
fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    let frames: usize = batch.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(frames as f64);
    let started = Instant::now();

    let mut result = batch
        .iter()
        .flat_map(|(events, _)| events.iter())
        .try_for_each(|event| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        warn!(error = %e, frames, "WAL batch failed, rolling back");
        if let Err(rollback) = wal.discard_unsynced() {
            warn!(error = %rollback, "WAL rollback failed");
            result = Err(rollback);
        }
    }

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd.into_pending() {
        Ok(pending) => commit_batch(wal, vec![pending]),
        Err(WalCommand::Compact { events, response }) => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        Err(WalCommand::AppendsSinceCompact { response }) => {
            let _ = response.send(wal.appends_since_compact());
        }
        Err(WalCommand::Append { .. } | WalCommand::AppendBatch { .. }) => {}
    }
}

/// Durable appointment store.
///
/// Each seller's schedule sits behind its own lock. Every mutation holds the
/// seller's write lock across conflict check, log append and apply, so two
/// writers can never both pass the check for overlapping windows.
pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedSchedule>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: appointment id → seller id
    pub(super) entity_to_seller: DashMap<Ulid, Ulid>,
    /// Mutations hold this shared; compaction holds it exclusively, so its
    /// snapshot covers every acknowledged write, including new sellers.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply an event to the schedule it names (caller holds the lock).
/// A seller change on update is handled by the caller, which owns both locks.
fn apply_to_schedule(
    schedule: &mut SellerSchedule,
    event: &Event,
    entity_map: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::AppointmentCreated { appointment } => {
            schedule.insert(appointment.clone());
            entity_map.insert(appointment.id, appointment.seller_id);
        }
        Event::AppointmentUpdated { appointment, .. } => {
            schedule.remove(appointment.id);
            schedule.insert(appointment.clone());
            entity_map.insert(appointment.id, appointment.seller_id);
        }
        Event::StatusChanged { id, status, .. } => {
            schedule.set_status(*id, *status);
        }
        Event::AppointmentDeleted { id, .. } => {
            schedule.remove(*id);
            entity_map.remove(id);
        }
    }
}

impl Engine {
    /// Open the log at `wal_path`, rebuild state from it and start the writer.
    /// Must be called inside a Tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?.with_backlog(events.len() as u64);
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            entity_to_seller: DashMap::new(),
            compaction_gate: RwLock::new(()),
        };

        // Nobody else holds these locks yet, so try_write always succeeds.
        // Never block here: this may run inside an async context.
        for event in &events {
            if let Event::AppointmentUpdated {
                appointment,
                previous_seller_id,
            } = event
                && *previous_seller_id != appointment.seller_id
                && let Some(prev) = engine.state.get(previous_seller_id)
                && let Ok(mut guard) = prev.value().try_write()
            {
                guard.remove(appointment.id);
            }
            let schedule = engine.schedule_for(event.seller_id());
            if let Ok(mut guard) = schedule.try_write() {
                apply_to_schedule(&mut guard, event, &engine.entity_to_seller);
            };
        }

        info!(
            path = %wal_path.display(),
            events = events.len(),
            appointments = engine.entity_to_seller.len(),
            "appointment log replayed"
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await?;
        Self::wal_reply(rx).await
    }

    /// Write several events as one unit: all durable, or none in the log.
    async fn wal_append_all(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::AppendBatch {
            events,
            response: tx,
        })
        .await?;
        Self::wal_reply(rx).await
    }

    pub(super) async fn wal_request(&self, cmd: WalCommand) -> Result<(), EngineError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))
    }

    pub(super) async fn wal_reply(
        rx: oneshot::Receiver<io::Result<()>>,
    ) -> Result<(), EngineError> {
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_schedule(&self, seller_id: &Ulid) -> Option<SharedSchedule> {
        self.state.get(seller_id).map(|e| e.value().clone())
    }

    /// Sellers live outside this store; their schedule appears on first use.
    pub(super) fn schedule_for(&self, seller_id: Ulid) -> SharedSchedule {
        self.state
            .entry(seller_id)
            .or_insert_with(|| Arc::new(RwLock::new(SellerSchedule::new(seller_id))))
            .value()
            .clone()
    }

    pub fn get_seller_for_appointment(&self, id: &Ulid) -> Option<Ulid> {
        self.entity_to_seller.get(id).map(|e| *e.value())
    }

    pub fn appointment_count(&self) -> usize {
        self.entity_to_seller.len()
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        schedule: &mut SellerSchedule,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_schedule(schedule, event, &self.entity_to_seller);
        Ok(())
    }

    /// Lookup appointment → seller, acquire that seller's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SellerSchedule>, EngineError> {
        loop {
            let seller_id = self
                .get_seller_for_appointment(id)
                .ok_or(EngineError::NotFound(*id))?;
            let schedule = self
                .get_schedule(&seller_id)
                .ok_or(EngineError::NotFound(*id))?;
            let guard = schedule.write_owned().await;
            if guard.get(*id).is_some() {
                return Ok(guard);
            }
            // Moved to another seller while we waited: follow it.
        }
    }
}
