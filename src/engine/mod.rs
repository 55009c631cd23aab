mod availability;
mod catalog;
mod conflict;
mod consultation;
mod error;
mod finalize;
mod holds;
mod lifecycle;
mod locate;
mod queries;
mod reschedule;
mod store;

pub use availability::{DaySlotQuery, STEP_GRID, compute_day_slots, normalize_step_minutes, scan_window};
pub use catalog::{AddOnInput, BlockInput, LocationInput, OfferingInput, OpeningInput};
pub use conflict::now_ms;
pub use consultation::{ConsultationView, Decision, ProposalRequest};
pub use error::{EngineError, ErrorKind};
pub use finalize::FinalizeRequest;
pub use holds::{HoldDeletion, HoldRequest};
pub use lifecycle::BookingAction;
pub use locate::{
    ResolvedTimeZone, TimeZoneCandidate, TimeZoneSource, location_time_zone, pick_bookable_location,
    resolve_appt_time_zone,
};
pub use queries::{BookingView, DaySlots, DaySummary, SlotQuery, SlotSummary};
pub use reschedule::RescheduleRequest;
pub use store::ProfessionalState;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::geo::GeoProvider;
use crate::model::*;
use crate::openings::OpeningStore;
use crate::wal::{Record, Wal};

pub type SharedProfessionalState = Arc<RwLock<ProfessionalState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        events: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<Record>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Record, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if let Err(e) = &result {
                    tracing::error!("WAL flush failed: {e}");
                }
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (events, _) in batch {
        if let Err(e) = wal.append_buffered(events) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush so partially buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { events, response } => {
            // Only reachable if a caller routes an append here directly.
            let result = wal.append_buffered(&events).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

// ── Transactions ─────────────────────────────────────────

/// Work staged under a professional's write lock. Nothing is visible until
/// `commit` has appended the whole batch to the WAL.
#[derive(Default)]
pub struct Tx {
    events: Vec<Event>,
    opening_claim: Option<(Ulid, Ulid)>,
}

impl Tx {
    pub fn stage(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Flip the opening to BOOKED at commit. The commit fails if another
    /// caller already claimed it.
    pub fn claim_opening(&mut self, opening_id: Ulid, booking_id: Ulid) {
        self.opening_claim = Some((opening_id, booking_id));
    }
}

pub struct Engine {
    pub(super) professionals: DashMap<Ulid, SharedProfessionalState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: offering/location/hold/booking/block id → professional id.
    pub(super) entity_to_professional: DashMap<Ulid, Ulid>,
    /// Aftercare token → completed booking id.
    pub(super) aftercare_tokens: DashMap<Ulid, Ulid>,
    pub(super) openings: Arc<dyn OpeningStore>,
    pub(super) geo: Arc<dyn GeoProvider>,
    /// Held while adding a professional and while compacting.
    pub(super) admission: tokio::sync::Mutex<()>,
}

/// Keep the side indexes in step with an applied event.
fn index_event(
    event: &Event,
    entity_map: &DashMap<Ulid, Ulid>,
    aftercare_tokens: &DashMap<Ulid, Ulid>,
    openings: &dyn OpeningStore,
) {
    let pro = event.professional_id();
    match event {
        Event::ProfessionalSaved(_) => {}
        Event::LocationSaved(l) => {
            entity_map.insert(l.id, pro);
        }
        Event::OfferingSaved(o) => {
            entity_map.insert(o.id, pro);
        }
        Event::AddOnSaved(a) => {
            entity_map.insert(a.id, pro);
        }
        Event::BlockAdded(b) => {
            entity_map.insert(b.id, pro);
        }
        Event::HoldPlaced(h) => {
            entity_map.insert(h.id, pro);
        }
        Event::BlockRemoved { id, .. } | Event::HoldReleased { id, .. } => {
            entity_map.remove(id);
        }
        Event::BookingSaved(b) => {
            entity_map.insert(b.id, pro);
            if let Some(token) = b.aftercare_token {
                aftercare_tokens.insert(token, b.id);
            }
        }
        Event::ApprovalSaved { .. } => {}
        Event::OpeningSaved(o) => {
            entity_map.insert(o.id, pro);
            openings.save(o.clone());
        }
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        openings: Arc<dyn OpeningStore>,
        geo: Arc<dyn GeoProvider>,
    ) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            professionals: DashMap::new(),
            wal_tx,
            entity_to_professional: DashMap::new(),
            aftercare_tokens: DashMap::new(),
            openings,
            geo,
            admission: tokio::sync::Mutex::new(()),
        };

        // Rebuild plain states first; nothing else can see them yet.
        let mut states: HashMap<Ulid, ProfessionalState> = HashMap::new();
        let mut replayed = 0usize;
        for record in &records {
            for event in record {
                let pro = event.professional_id();
                states
                    .entry(pro)
                    .or_insert_with(|| ProfessionalState::new(pro))
                    .apply_event(event);
                index_event(
                    event,
                    &engine.entity_to_professional,
                    &engine.aftercare_tokens,
                    engine.openings.as_ref(),
                );
                replayed += 1;
            }
        }
        for (id, state) in states {
            engine.professionals.insert(id, Arc::new(RwLock::new(state)));
        }
        metrics::gauge!(crate::observability::PROFESSIONALS_ACTIVE).set(engine.professionals.len() as f64);
        tracing::info!(
            records = records.len(),
            events = replayed,
            professionals = engine.professionals.len(),
            "replayed WAL"
        );

        Ok(engine)
    }

    /// Write one transaction to the WAL via the group-commit writer.
    async fn wal_append(&self, events: Record) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn professional(&self, id: &Ulid) -> Option<SharedProfessionalState> {
        self.professionals.get(id).map(|e| e.value().clone())
    }

    pub fn professional_ids(&self) -> Vec<Ulid> {
        self.professionals.iter().map(|e| *e.key()).collect()
    }

    /// Which professional owns an offering, location, hold, booking or block.
    pub fn professional_for(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_professional.get(entity_id).map(|e| *e.value())
    }

    pub(super) fn owner_of(&self, entity_id: &Ulid, what: &'static str) -> Result<Ulid, EngineError> {
        self.professional_for(entity_id)
            .ok_or(EngineError::NotFound(what, *entity_id))
    }

    pub(super) async fn read_state(
        &self,
        professional_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<ProfessionalState>, EngineError> {
        let shared = self
            .professional(professional_id)
            .ok_or(EngineError::NotFound("professional", *professional_id))?;
        Ok(shared.read_owned().await)
    }

    /// The single serialization point for a professional's calendar.
    ///
    /// Takes the write lock, runs `f` against the locked state, then commits
    /// whatever `f` staged as one WAL record. If `f` fails nothing is written.
    pub async fn with_professional_lock<T, F>(&self, professional_id: Ulid, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&ProfessionalState, &mut Tx) -> Result<T, EngineError>,
    {
        let shared = self
            .professional(&professional_id)
            .ok_or(EngineError::NotFound("professional", professional_id))?;
        let mut guard = shared.write().await;
        let mut tx = Tx::default();
        let out = f(&guard, &mut tx)?;
        self.commit(&mut guard, tx).await?;
        Ok(out)
    }

    async fn commit(&self, state: &mut ProfessionalState, tx: Tx) -> Result<(), EngineError> {
        let Tx {
            events, opening_claim, ..
        } = tx;
        if let Some((opening_id, booking_id)) = opening_claim
            && self.openings.claim(&opening_id, booking_id) != 1
        {
            return Err(EngineError::OpeningNotAvailable);
        }
        if events.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.wal_append(events.clone()).await {
            if let Some((opening_id, _)) = opening_claim {
                self.openings.release(&opening_id);
            }
            return Err(e);
        }
        for event in &events {
            state.apply_event(event);
            index_event(
                event,
                &self.entity_to_professional,
                &self.aftercare_tokens,
                self.openings.as_ref(),
            );
        }
        Ok(())
    }

    /// Ensure a state entry exists for `id`, returning whether it was created.
    /// Callers hold `admission`.
    pub(super) fn ensure_professional(&self, id: Ulid) -> bool {
        let mut created = false;
        self.professionals.entry(id).or_insert_with(|| {
            created = true;
            Arc::new(RwLock::new(ProfessionalState::new(id)))
        });
        if created {
            metrics::gauge!(crate::observability::PROFESSIONALS_ACTIVE).increment(1.0);
        }
        created
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Rewrite the WAL as one snapshot record per professional.
    ///
    /// Every professional's read lock is held until the writer has swapped
    /// the file, so no commit can land between snapshot and swap.
    pub async fn compact_wal(&self, now: Ms) -> Result<(), EngineError> {
        let _admission = self.admission.lock().await;
        let mut guards = Vec::new();
        let mut records = Vec::new();
        for id in self.professional_ids() {
            let Some(shared) = self.professional(&id) else { continue };
            let guard = shared.read_owned().await;
            let mut record = guard.snapshot(now);
            record.extend(
                self.openings
                    .list_for_professional(&id)
                    .into_iter()
                    .map(Event::OpeningSaved),
            );
            records.push(record);
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        result
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
