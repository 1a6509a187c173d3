mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod overlap;
mod queries;
mod slots;
mod validator;

pub use conflict::{find_conflict, spans_conflict};
pub use error::{BookingError, EngineError, ErrorClass, TransitionError};
pub use lifecycle::{Transition, party_of, plan_transition};
pub use mutations::{BookingRepository, SchedulePatch};
pub use overlap::find_schedule_overlap;
pub use slots::{Slots, schedule_slots, slots};
pub use validator::validate_booking;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::limits::DEFAULT_COMMIT_TIMEOUT_MS;
use crate::model::*;
use crate::notify::Notifier;
use crate::wal::Wal;

pub type SharedProviderState = Arc<RwLock<ProviderState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        claim: CommitClaim,
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

/// Ownership of one append's outcome. The writer takes it before buffering
/// the event; a caller whose commit timeout fires takes it instead. Whoever
/// loses defers to the winner.
#[derive(Clone, Default)]
pub(super) struct CommitClaim(Arc<AtomicBool>);

impl CommitClaim {
    /// True for exactly one taker.
    pub(super) fn take(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

type PendingAppend = (Event, CommitClaim, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Claim each append; drop those whose caller already gave up waiting.
/// 4. Buffer the rest and fsync once for the whole batch.
/// 5. Respond to every remaining sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append {
                event,
                claim,
                response,
            } => {
                let mut batch = vec![(event, claim, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append {
                            event,
                            claim,
                            response,
                        }) => {
                            batch.push((event, claim, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, mut batch: Vec<PendingAppend>) {
    let before = batch.len();
    batch.retain(|(_, claim, tx)| !tx.is_closed() && claim.take());
    let abandoned = before - batch.len();
    if abandoned > 0 {
        tracing::warn!("WAL: dropped {abandoned} append(s) after commit timeout");
    }
    if batch.is_empty() {
        return;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, &batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed: {e}");
    }

    for (_, _, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes never leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
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
        WalCommand::Append {
            event,
            claim,
            response,
        } => commit_batch(wal, vec![(event, claim, response)]),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub providers: DashMap<Ulid, SharedProviderState>,
    pub users: DashSet<Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notifier: Arc<dyn Notifier>,
    pub(super) clock: Arc<dyn Clock>,
    /// Reverse lookup: schedule/appointment id → provider id
    pub(super) entity_to_provider: DashMap<Ulid, Ulid>,
    pub(super) commit_timeout: Duration,
    /// Mutations hold it shared; compaction holds it exclusively so no
    /// append can land between the snapshot and the file swap.
    pub(super) write_gate: RwLock<()>,
    /// Serializes user/provider registration.
    pub(super) registry: Mutex<()>,
}

/// Apply an event directly to a ProviderState (no locking; caller holds the lock).
fn apply_to_provider(ps: &mut ProviderState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ScheduleAdded {
            id,
            provider_id,
            day,
            span,
            hours_per_session,
        }
        | Event::ScheduleUpdated {
            id,
            provider_id,
            day,
            span,
            hours_per_session,
        } => {
            ps.remove_schedule(*id);
            ps.insert_schedule(WeeklySchedule {
                id: *id,
                provider_id: *provider_id,
                day: *day,
                span: *span,
                hours_per_session: *hours_per_session,
            });
            entity_map.insert(*id, *provider_id);
        }
        Event::ScheduleRemoved { id, .. } => {
            ps.remove_schedule(*id);
            entity_map.remove(id);
            for appt in ps.appointments.iter_mut().filter(|a| a.schedule_id == Some(*id)) {
                appt.schedule_id = None;
            }
        }
        Event::AppointmentBooked {
            id,
            provider_id,
            client_id,
            schedule_id,
            date,
            span,
            status,
            created_at,
            updated_at,
        } => {
            ps.insert_appointment(Appointment {
                id: *id,
                client_id: *client_id,
                provider_id: *provider_id,
                schedule_id: *schedule_id,
                date: *date,
                span: *span,
                status: *status,
                created_at: *created_at,
                updated_at: *updated_at,
            });
            entity_map.insert(*id, *provider_id);
        }
        Event::AppointmentStatusChanged { id, status, at, .. } => {
            let mut entered_confirmed = false;
            if let Some(appt) = ps.appointment_mut(*id) {
                entered_confirmed = appt.status != AppointmentStatus::Confirmed
                    && *status == AppointmentStatus::Confirmed;
                appt.status = *status;
                appt.updated_at = *at;
            }
            if entered_confirmed {
                ps.service_count += 1;
            }
        }
        // Registrations are handled at the DashMap level, not here
        Event::UserRegistered { .. } | Event::ProviderRegistered { .. } => {}
    }
}

fn writer_reply(
    reply: Result<io::Result<()>, oneshot::error::RecvError>,
) -> Result<(), EngineError> {
    reply
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

/// The provider an event belongs to (None for registrations).
fn event_provider_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ScheduleAdded { provider_id, .. }
        | Event::ScheduleUpdated { provider_id, .. }
        | Event::ScheduleRemoved { provider_id, .. }
        | Event::AppointmentBooked { provider_id, .. }
        | Event::AppointmentStatusChanged { provider_id, .. } => Some(*provider_id),
        Event::UserRegistered { .. } | Event::ProviderRegistered { .. } => None,
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    pub fn new(wal_path: PathBuf, notifier: Arc<dyn Notifier>) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let providers: DashMap<Ulid, ProviderState> = DashMap::new();
        let users = DashSet::new();
        let entity_to_provider = DashMap::new();

        // Replay into plain state first; nothing is shared yet.
        for event in &events {
            match event {
                Event::UserRegistered { id } => {
                    users.insert(*id);
                }
                Event::ProviderRegistered {
                    id,
                    user_id,
                    fixed_schedule,
                    service_count,
                } => {
                    providers.insert(
                        *id,
                        ProviderState::new(*id, *user_id, *fixed_schedule, *service_count),
                    );
                }
                other => {
                    if let Some(provider_id) = event_provider_id(other)
                        && let Some(mut ps) = providers.get_mut(&provider_id)
                    {
                        apply_to_provider(&mut ps, other, &entity_to_provider);
                    }
                }
            }
        }

        let providers = providers
            .into_iter()
            .map(|(id, ps)| (id, Arc::new(RwLock::new(ps))))
            .collect();

        tracing::debug!("replayed {} event(s) from {}", events.len(), wal_path.display());

        Ok(Self {
            providers,
            users,
            wal_tx,
            notifier,
            clock: Arc::new(SystemClock),
            entity_to_provider,
            commit_timeout: Duration::from_millis(DEFAULT_COMMIT_TIMEOUT_MS),
            write_gate: RwLock::new(()),
            registry: Mutex::new(()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Write event to WAL via the background group-commit writer.
    ///
    /// Gives up after `commit_timeout` only if the writer has not claimed
    /// the append yet; a claimed append is awaited to completion.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let claim = CommitClaim::default();
        let (tx, mut rx) = oneshot::channel();
        let commit = async {
            self.wal_tx
                .send(WalCommand::Append {
                    event: event.clone(),
                    claim: claim.clone(),
                    response: tx,
                })
                .await
                .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
            writer_reply((&mut rx).await)
        };
        let outcome = tokio::time::timeout(self.commit_timeout, commit).await;
        match outcome {
            Ok(result) => result,
            Err(_) if claim.take() => {
                metrics::counter!(crate::observability::COMMIT_TIMEOUTS_TOTAL).increment(1);
                Err(EngineError::CommitTimeout)
            }
            Err(_) => {
                tracing::debug!("commit timeout after writer claimed the append; awaiting flush");
                writer_reply(rx.await)
            }
        }
    }

    pub fn get_provider(&self, id: &Ulid) -> Option<SharedProviderState> {
        self.providers.get(id).map(|e| e.value().clone())
    }

    pub fn get_provider_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_provider.get(entity_id).map(|e| *e.value())
    }

    pub fn user_exists(&self, id: &Ulid) -> bool {
        self.users.contains(id)
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut ProviderState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_provider(ps, event, &self.entity_to_provider);
        Ok(())
    }

    /// Lookup entity → provider, get provider, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ProviderState>, EngineError> {
        let provider_id = self
            .get_provider_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        Ok(ps.write_owned().await)
    }

    pub(super) async fn resolve_entity_read(
        &self,
        entity_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<ProviderState>, EngineError> {
        let provider_id = self
            .get_provider_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        Ok(ps.read_owned().await)
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;

        let mut events: Vec<Event> = self
            .users
            .iter()
            .map(|id| Event::UserRegistered { id: *id })
            .collect();

        let shared: Vec<SharedProviderState> =
            self.providers.iter().map(|e| e.value().clone()).collect();
        for ps in shared {
            let guard = ps.read().await;
            events.push(Event::ProviderRegistered {
                id: guard.id,
                user_id: guard.user_id,
                fixed_schedule: guard.fixed_schedule,
                service_count: guard.service_count,
            });
            for s in &guard.schedules {
                events.push(Event::ScheduleAdded {
                    id: s.id,
                    provider_id: s.provider_id,
                    day: s.day,
                    span: s.span,
                    hours_per_session: s.hours_per_session,
                });
            }
            for a in &guard.appointments {
                events.push(Event::AppointmentBooked {
                    id: a.id,
                    provider_id: a.provider_id,
                    client_id: a.client_id,
                    schedule_id: a.schedule_id,
                    date: a.date,
                    span: a.span,
                    status: a.status,
                    created_at: a.created_at,
                    updated_at: a.updated_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
