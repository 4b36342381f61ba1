mod conflict;
mod error;
pub mod lifecycle;
mod mutations;
mod queries;

pub use conflict::{Clock, SystemClock, find_conflict, find_overlap};
pub use error::SchedulerError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::DEFAULT_SERVICE_DURATION_MIN;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedLane = Arc<RwLock<ProviderLane>>;

// ── Group-commit journal channel ─────────────────────────

enum JournalCommand {
    Append {
        event: Event,
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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the journal and batches appends for group
/// commit: take the first append, drain whatever else is already queued,
/// then fsync once for the whole batch.
async fn journal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            JournalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(JournalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE)
            .record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_batch(wal: &mut Wal<Event>, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so the partial batch does not leak
    // into the next one; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        JournalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// The booking scheduler.
///
/// Bookings are grouped into one lane per provider. Every check-then-write
/// on a provider's bookings (new booking, status change, service delete)
/// holds that lane's write lock across the check, the journal append and
/// the in-memory apply, so two requests for one provider never both pass
/// the overlap check.
pub struct Scheduler {
    lanes: DashMap<Ulid, SharedLane>,
    /// booking id → provider id
    booking_to_provider: DashMap<Ulid, Ulid>,
    /// requester id → booking ids
    requester_index: DashMap<Ulid, Vec<Ulid>>,
    services: DashMap<Ulid, Service>,
    users: DashMap<Ulid, UserProfile>,
    journal_tx: mpsc::Sender<JournalCommand>,
    /// Shared by every journal-append-then-apply; compaction takes it
    /// exclusively so its snapshot never misses a journaled event.
    commit_gate: RwLock<()>,
    pub notify: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Replay the journal at `path` and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn open(path: PathBuf, notify: Arc<NotifyHub>, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let replay = Wal::<Event>::replay(&path)?;
        if !replay.clean {
            warn!(path = %path.display(), "journal had a torn or corrupt tail; it was dropped");
        }
        let wal = Wal::open(&path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(wal, journal_rx));

        let scheduler = Self {
            lanes: DashMap::new(),
            booking_to_provider: DashMap::new(),
            requester_index: DashMap::new(),
            services: DashMap::new(),
            users: DashMap::new(),
            journal_tx,
            commit_gate: RwLock::new(()),
            notify,
            clock,
        };

        // Sole owner of every lane during replay, so try_write never contends.
        for event in &replay.records {
            match event.lane() {
                Some(provider_id) => {
                    let lane = scheduler.lane(provider_id);
                    let Ok(mut guard) = lane.try_write() else {
                        return Err(io::Error::other("replay: lane unexpectedly locked"));
                    };
                    scheduler.apply_to_lane(&mut guard, event);
                }
                None => scheduler.apply_to_directory(event),
            }
        }
        info!(
            events = replay.records.len(),
            users = scheduler.users.len(),
            services = scheduler.services.len(),
            bookings = scheduler.booking_to_provider.len(),
            "journal replayed"
        );

        Ok(scheduler)
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Lane for a provider, created on first use.
    fn lane(&self, provider_id: Ulid) -> SharedLane {
        self.lanes
            .entry(provider_id)
            .or_insert_with(|| Arc::new(RwLock::new(ProviderLane::new(provider_id))))
            .value()
            .clone()
    }

    async fn lane_write(&self, provider_id: Ulid) -> OwnedRwLockWriteGuard<ProviderLane> {
        self.lane(provider_id).write_owned().await
    }

    /// Look up booking → provider, then lock that provider's lane.
    async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ProviderLane>, SchedulerError> {
        let provider_id = self
            .booking_to_provider
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or(SchedulerError::NotFound("booking", *booking_id))?;
        Ok(self.lane_write(provider_id).await)
    }

    /// Current duration of a service, or the default when it is gone.
    fn service_duration_min(&self, service_id: &Ulid) -> u32 {
        self.services
            .get(service_id)
            .map(|s| s.duration_min)
            .unwrap_or(DEFAULT_SERVICE_DURATION_MIN)
    }

    /// Write an event through the group-commit writer.
    async fn journal_append(&self, event: &Event) -> Result<(), SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| SchedulerError::Storage("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| SchedulerError::Storage("journal writer dropped response".into()))?
            .map_err(|e| SchedulerError::Storage(e.to_string()))
    }

    /// Journal a lane event, then apply it. The caller holds the lane lock.
    async fn persist_lane(&self, lane: &mut ProviderLane, event: &Event) -> Result<(), SchedulerError> {
        let _gate = self.commit_gate.read().await;
        self.journal_append(event).await?;
        self.apply_to_lane(lane, event);
        Ok(())
    }

    async fn persist_directory(&self, event: &Event) -> Result<(), SchedulerError> {
        let _gate = self.commit_gate.read().await;
        self.journal_append(event).await?;
        self.apply_to_directory(event);
        Ok(())
    }

    fn apply_to_lane(&self, lane: &mut ProviderLane, event: &Event) {
        match event {
            Event::BookingRequested { booking } => {
                self.booking_to_provider.insert(booking.id, booking.provider_id);
                self.requester_index
                    .entry(booking.requester_id)
                    .or_default()
                    .push(booking.id);
                lane.insert_booking(booking.clone());
            }
            Event::BookingStatusChanged { id, status, at, .. } => {
                lane.set_status(id, *status, *at);
            }
            _ => {}
        }
    }

    fn apply_to_directory(&self, event: &Event) {
        match event {
            Event::UserRegistered { id, name, role, phone } => {
                self.users.insert(
                    *id,
                    UserProfile {
                        id: *id,
                        name: name.clone(),
                        role: *role,
                        phone: phone.clone(),
                    },
                );
            }
            Event::PhoneSaved { user_id, phone } => {
                if let Some(mut user) = self.users.get_mut(user_id) {
                    user.phone = Some(phone.clone());
                }
            }
            Event::ServiceSaved { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceDeleted { id, .. } => {
                self.services.remove(id);
            }
            Event::BookingRequested { .. } | Event::BookingStatusChanged { .. } => {}
        }
    }

    /// Rewrite the journal as the minimal event set for the current state.
    ///
    /// Lock order: every lane (by provider id) before the commit gate. A
    /// mutation holds a lane before the gate too, so the two never wait on
    /// each other in a cycle.
    pub async fn compact_journal(&self) -> Result<(), SchedulerError> {
        let mut lanes: Vec<(Ulid, SharedLane)> = self
            .lanes
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        lanes.sort_by_key(|(id, _)| *id);
        let mut guards = Vec::with_capacity(lanes.len());
        for (_, lane) in lanes {
            guards.push(lane.read_owned().await);
        }
        let _gate = self.commit_gate.write().await;

        let mut events: Vec<Event> = self
            .users
            .iter()
            .map(|u| Event::UserRegistered {
                id: u.id,
                name: u.name.clone(),
                role: u.role,
                phone: u.phone.clone(),
            })
            .collect();
        events.extend(
            self.services
                .iter()
                .map(|s| Event::ServiceSaved { service: s.value().clone() }),
        );
        for guard in &guards {
            events.extend(
                guard
                    .iter()
                    .map(|b| Event::BookingRequested { booking: b.clone() }),
            );
        }

        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| SchedulerError::Storage("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| SchedulerError::Storage("journal writer dropped response".into()))?
            .map_err(|e| SchedulerError::Storage(e.to_string()))
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
