use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::limits::MAX_BOOKINGS_PER_PROPERTY;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::{now_ms, BookingStore, StoreError, StoreResult};

pub type SharedPropertyState = Arc<RwLock<PropertyState>>;

/// All bookings of one property, ordered by `(visit_date, visit_time)`.
#[derive(Debug, Clone)]
pub struct PropertyState {
    pub property_id: String,
    pub bookings: Vec<BookingRecord>,
}

impl PropertyState {
    pub fn new(property_id: String) -> Self {
        Self {
            property_id,
            bookings: Vec::new(),
        }
    }

    pub(crate) fn insert_booking(&mut self, record: BookingRecord) {
        let pos = self.bookings.partition_point(|b| {
            (b.visit_date, b.visit_time.as_str()) <= (record.visit_date, record.visit_time.as_str())
        });
        self.bookings.insert(pos, record);
    }

    /// Bookings on `date`, located by binary search.
    pub fn on_date(&self, date: NaiveDate) -> &[BookingRecord] {
        let lo = self.bookings.partition_point(|b| b.visit_date < date);
        let hi = self.bookings.partition_point(|b| b.visit_date <= date);
        &self.bookings[lo..hi]
    }

    pub fn find_active(&self, date: NaiveDate, time: &str) -> Option<&BookingRecord> {
        self.on_date(date).iter().find(|b| b.occupies(date, time))
    }

    fn find_mut(&mut self, id: Ulid) -> Option<&mut BookingRecord> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }
}

fn apply_event(ps: &mut PropertyState, event: &Event) {
    match event {
        Event::VisitBooked { record } => ps.insert_booking(record.clone()),
        Event::VisitStatusChanged { id, status, .. } => {
            if let Some(record) = ps.find_mut(*id) {
                record.status = *status;
            }
        }
    }
}

// ── Group-commit WAL writer ──────────────────────────────

enum WalCommand {
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

/// Owns the WAL. Every append that is already queued when the first one
/// arrives shares a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let first = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };
        let mut batch: Vec<PendingAppend> = vec![first];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        // Every caller in the batch gets the error, so none of its frames may survive.
        if let Err(e) = wal.discard_pending() {
            tracing::error!(error = %e, "failed to roll back WAL batch");
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

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

fn writer_gone<T>(_: T) -> StoreError {
    StoreError::Unavailable("WAL writer shut down".into())
}

async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> StoreResult<()> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(writer_gone)?;
    rx.await
        .map_err(writer_gone)?
        .map_err(|e| StoreError::Unavailable(format!("WAL append failed: {e}")))
}

/// Durable booking table: per-property state in memory, every mutation logged first.
///
/// The active-slot uniqueness constraint is checked and committed under the
/// property's write lock, so two racing inserts for one slot serialize and the
/// loser sees `UniqueViolation`.
pub struct WalStore {
    properties: DashMap<String, SharedPropertyState>,
    /// Booking id → property id.
    index: Arc<DashMap<Ulid, String>>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold it shared; compaction holds it exclusive so no append
    /// lands between the snapshot and the file swap.
    compaction_gate: Arc<RwLock<()>>,
}

impl WalStore {
    /// Replay `path` and start the writer task. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            properties: DashMap::new(),
            index: Arc::new(DashMap::new()),
            wal_tx,
            compaction_gate: Arc::new(RwLock::new(())),
        };
        for event in &events {
            let shared = store.property(event.property_id());
            // Sole owner during replay; the lock is uncontended.
            if let Ok(mut guard) = shared.try_write() {
                if let Event::VisitBooked { record } = event {
                    store.index.insert(record.id, record.property_id.clone());
                }
                apply_event(&mut guard, event);
            }
        }
        Ok(store)
    }

    fn property(&self, property_id: &str) -> SharedPropertyState {
        if let Some(existing) = self.properties.get(property_id) {
            return existing.value().clone();
        }
        self.properties
            .entry(property_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(PropertyState::new(property_id.to_string()))))
            .value()
            .clone()
    }

    fn existing_property(&self, property_id: &str) -> Option<SharedPropertyState> {
        self.properties.get(property_id).map(|e| e.value().clone())
    }

    /// Log `event` and apply it in a task of its own. Dropping the caller
    /// after the event reaches the writer cannot leave the log ahead of memory:
    /// the task keeps both locks until the event is applied.
    fn spawn_commit(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        mut guard: OwnedRwLockWriteGuard<PropertyState>,
        event: Event,
    ) -> JoinHandle<StoreResult<()>> {
        let wal_tx = self.wal_tx.clone();
        let index = self.index.clone();
        tokio::spawn(async move {
            let _gate = gate;
            wal_append(&wal_tx, &event).await?;
            if let Event::VisitBooked { record } = &event {
                index.insert(record.id, record.property_id.clone());
            }
            apply_event(&mut guard, &event);
            Ok(())
        })
    }

    async fn commit(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        guard: OwnedRwLockWriteGuard<PropertyState>,
        event: Event,
    ) -> StoreResult<()> {
        self.spawn_commit(gate, guard, event)
            .await
            .map_err(|e| StoreError::Unavailable(format!("commit task failed: {e}")))?
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub async fn appends_since_compact(&self) -> u64 {
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

    /// Rewrite the WAL as one `VisitBooked` per booking, carrying its current status.
    pub async fn compact(&self) -> StoreResult<()> {
        let _gate = self.compaction_gate.write().await;
        let shared: Vec<SharedPropertyState> =
            self.properties.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for ps in shared {
            let guard = ps.read().await;
            events.extend(guard.bookings.iter().map(|record| Event::VisitBooked {
                record: record.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(writer_gone)?;
        rx.await
            .map_err(writer_gone)?
            .map_err(|e| StoreError::Unavailable(format!("WAL compaction failed: {e}")))
    }
}

#[async_trait]
impl BookingStore for WalStore {
    async fn find_active(&self, key: &SlotKey) -> StoreResult<Option<BookingRecord>> {
        let Some(ps) = self.existing_property(&key.property_id) else {
            return Ok(None);
        };
        let guard = ps.read().await;
        Ok(guard.find_active(key.visit_date, &key.visit_time).cloned())
    }

    async fn active_times(&self, property_id: &str, date: NaiveDate) -> StoreResult<Vec<String>> {
        let Some(ps) = self.existing_property(property_id) else {
            return Ok(Vec::new());
        };
        let guard = ps.read().await;
        Ok(guard
            .on_date(date)
            .iter()
            .filter(|b| b.status.is_active())
            .map(|b| b.visit_time.clone())
            .collect())
    }

    async fn insert(&self, booking: NewBooking) -> StoreResult<BookingRecord> {
        let gate = self.compaction_gate.clone().read_owned().await;
        let guard = self.property(&booking.property_id).write_owned().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_PROPERTY {
            return Err(StoreError::LimitExceeded("too many bookings on property"));
        }
        if guard
            .find_active(booking.visit_date, &booking.visit_time)
            .is_some()
        {
            return Err(StoreError::UniqueViolation(booking.slot_key()));
        }

        let record = BookingRecord::from_new(Ulid::new(), booking, now_ms());
        let event = Event::VisitBooked {
            record: record.clone(),
        };
        self.commit(gate, guard, event).await?;
        Ok(record)
    }

    async fn get(&self, id: Ulid) -> StoreResult<BookingRecord> {
        let property_id = self
            .index
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(id))?;
        let ps = self
            .existing_property(&property_id)
            .ok_or(StoreError::NotFound(id))?;
        let guard = ps.read().await;
        guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn set_status(&self, id: Ulid, status: BookingStatus) -> StoreResult<BookingRecord> {
        let property_id = self
            .index
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(id))?;
        let ps = self
            .existing_property(&property_id)
            .ok_or(StoreError::NotFound(id))?;
        let gate = self.compaction_gate.clone().read_owned().await;
        let guard = ps.write_owned().await;
        let current = guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;
        if current.status == status {
            return Ok(current);
        }
        if status.is_active()
            && !current.status.is_active()
            && guard
                .find_active(current.visit_date, &current.visit_time)
                .is_some()
        {
            return Err(StoreError::UniqueViolation(current.slot_key()));
        }

        let event = Event::VisitStatusChanged {
            id,
            property_id,
            status,
        };
        self.commit(gate, guard, event).await?;
        Ok(BookingRecord { status, ..current })
    }
}
