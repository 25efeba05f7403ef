use crate::progress::error::ProgressError;
use crate::progress::event_bus::{EventBus, Subscription};
use crate::progress::state::{Event, SourceProgress, SourceState};
use crate::store::StoreError;
use chrono::Utc;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TABLE: TableDefinition<&str, SourceProgress> = TableDefinition::new("data_source_progress");
const PERSIST_INTERVAL: Duration = Duration::from_secs(5);
const EMIT_INTERVAL: Duration = Duration::from_secs(1);

crate::json_table_value!(SourceProgress);

/// Counter increments reported by a driver while running.
#[derive(Debug, Clone, Default)]
pub struct ProgressDelta {
    pub processed: u64,
    pub added: u64,
    pub updated: u64,
    pub failed: u64,
    pub current_op: Option<String>,
}

struct Throttle {
    last_persist: Instant,
    last_emit: Instant,
    dirty: HashSet<String>,
}

/// Tracks per-source lifecycle and counters. The in-memory map is eagerly
/// updated and read by pull; the persistent row is written at most every
/// five seconds and the event bus fires at most once per second, except on
/// state transitions, which flush all three synchronously.
pub struct ProgressTracker {
    db: Arc<Database>,
    bus: Arc<EventBus>,
    rows: RwLock<HashMap<String, SourceProgress>>,
    throttle: Mutex<Throttle>,
}

impl ProgressTracker {
    pub fn new(db: Arc<Database>, bus: Arc<EventBus>) -> Result<Self, ProgressError> {
        let write_txn = db.begin_write().map_err(StoreError::from)?;
        {
            write_txn.open_table(TABLE).map_err(StoreError::from)?;
        }
        write_txn.commit().map_err(StoreError::from)?;

        let mut rows = HashMap::new();
        {
            let read_txn = db.begin_read().map_err(StoreError::from)?;
            let table = read_txn.open_table(TABLE).map_err(StoreError::from)?;
            for entry in table.iter().map_err(StoreError::from)? {
                let (key, row) = entry.map_err(StoreError::from)?;
                rows.insert(key.value().to_string(), row.value());
            }
        }

        Ok(ProgressTracker {
            db,
            bus,
            rows: RwLock::new(rows),
            throttle: Mutex::new(Throttle {
                last_persist: Instant::now(),
                last_emit: Instant::now(),
                dirty: HashSet::new(),
            }),
        })
    }

    /// Marks sources left mid-run by a crash as failed. Called once at
    /// startup, before any new run begins.
    pub fn recover_interrupted(&self) -> Result<usize, ProgressError> {
        let mut recovered = Vec::new();
        {
            let mut rows = self.rows.write();
            for row in rows.values_mut() {
                if matches!(
                    row.state,
                    SourceState::Running | SourceState::Queued | SourceState::Paused
                ) {
                    row.state = SourceState::Failed;
                    row.last_error = Some("interrupted".to_string());
                    row.updated_at = Utc::now();
                    recovered.push(row.clone());
                }
            }
        }
        for row in &recovered {
            self.persist(row)?;
        }
        if !recovered.is_empty() {
            info!("Recovered {} interrupted source(s)", recovered.len());
        }
        Ok(recovered.len())
    }

    /// Upserts an idle row for every registered source.
    pub fn ensure_registered<'a>(
        &self,
        sources: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ProgressError> {
        let mut created = Vec::new();
        {
            let mut rows = self.rows.write();
            for source in sources {
                rows.entry(source.to_string()).or_insert_with(|| {
                    let row = SourceProgress::new(source);
                    created.push(row.clone());
                    row
                });
            }
        }
        for row in &created {
            self.persist(row)?;
        }
        Ok(())
    }

    /// Applies a state transition, persisting and publishing immediately.
    pub fn transition(
        &self,
        source: &str,
        to: SourceState,
        error: Option<&str>,
    ) -> Result<SourceProgress, ProgressError> {
        let row = {
            let mut rows = self.rows.write();
            let row = rows
                .get_mut(source)
                .ok_or_else(|| ProgressError::UnknownSource(source.to_string()))?;
            if !row.state.can_transition_to(to) {
                return Err(ProgressError::InvalidTransition {
                    source_name: source.to_string(),
                    from: row.state,
                    to,
                });
            }

            match to {
                SourceState::Queued => {
                    // A fresh run: counters restart.
                    row.total = 0;
                    row.processed = 0;
                    row.added = 0;
                    row.updated = 0;
                    row.failed = 0;
                    row.current_op = None;
                    row.last_error = None;
                    row.started_at = None;
                }
                SourceState::Running if row.started_at.is_none() => {
                    row.started_at = Some(Utc::now());
                }
                SourceState::Completed => {
                    row.current_op = None;
                }
                SourceState::Failed => {
                    row.last_error = error.map(str::to_string).or(row.last_error.take());
                }
                _ => {}
            }
            row.state = to;
            row.updated_at = Utc::now();
            row.clone()
        };

        debug!("Source {source} -> {to}");
        self.persist(&row)?;
        self.bus.publish(&Event::StatusChange(row.clone()));
        Ok(row)
    }

    pub fn set_total(&self, source: &str, total: u64) -> Result<(), ProgressError> {
        {
            let mut rows = self.rows.write();
            let row = rows
                .get_mut(source)
                .ok_or_else(|| ProgressError::UnknownSource(source.to_string()))?;
            row.total = total;
            row.updated_at = Utc::now();
        }
        self.mark_dirty(source);
        Ok(())
    }

    /// Eagerly updates the in-memory counters; persistence and event
    /// emission are coalesced.
    pub fn record(&self, source: &str, delta: ProgressDelta) -> Result<(), ProgressError> {
        {
            let mut rows = self.rows.write();
            let row = rows
                .get_mut(source)
                .ok_or_else(|| ProgressError::UnknownSource(source.to_string()))?;
            row.processed += delta.processed;
            row.added += delta.added;
            row.updated += delta.updated;
            row.failed += delta.failed;
            if delta.current_op.is_some() {
                row.current_op = delta.current_op;
            }
            row.updated_at = Utc::now();
        }
        self.mark_dirty(source);
        self.tick()?;
        Ok(())
    }

    /// Records the error string of the most recent failed item without a
    /// state change.
    pub fn note_error(&self, source: &str, error: &str) {
        if let Some(row) = self.rows.write().get_mut(source) {
            row.last_error = Some(error.to_string());
            row.updated_at = Utc::now();
        }
        self.mark_dirty(source);
    }

    fn mark_dirty(&self, source: &str) {
        self.throttle.lock().dirty.insert(source.to_string());
    }

    /// Writes and emits if the respective interval has elapsed.
    fn tick(&self) -> Result<(), ProgressError> {
        let (to_persist, to_emit) = {
            let mut throttle = self.throttle.lock();
            if throttle.dirty.is_empty() {
                return Ok(());
            }
            let persist_due = throttle.last_persist.elapsed() >= PERSIST_INTERVAL;
            let emit_due = throttle.last_emit.elapsed() >= EMIT_INTERVAL;
            if !persist_due && !emit_due {
                return Ok(());
            }
            let dirty: Vec<String> = throttle.dirty.iter().cloned().collect();
            if persist_due {
                throttle.last_persist = Instant::now();
            }
            if emit_due {
                throttle.last_emit = Instant::now();
            }
            if persist_due {
                throttle.dirty.clear();
            }
            (persist_due.then(|| dirty.clone()), emit_due.then_some(dirty))
        };

        let rows = self.rows.read();
        if let Some(sources) = to_persist {
            for source in &sources {
                if let Some(row) = rows.get(source) {
                    self.persist(row)?;
                }
            }
        }
        if let Some(sources) = to_emit {
            let changed: Vec<SourceProgress> = sources
                .iter()
                .filter_map(|s| rows.get(s).cloned())
                .collect();
            if !changed.is_empty() {
                self.bus.publish(&Event::ProgressUpdate(changed));
            }
        }
        Ok(())
    }

    /// Synchronous flush of memory, store and bus. Used on terminal
    /// transitions and at shutdown.
    pub fn flush(&self) -> Result<(), ProgressError> {
        let dirty: Vec<String> = {
            let mut throttle = self.throttle.lock();
            throttle.last_persist = Instant::now();
            throttle.last_emit = Instant::now();
            throttle.dirty.drain().collect()
        };
        if dirty.is_empty() {
            return Ok(());
        }
        let rows = self.rows.read();
        let changed: Vec<SourceProgress> = dirty
            .iter()
            .filter_map(|s| rows.get(s).cloned())
            .collect();
        drop(rows);
        for row in &changed {
            self.persist(row)?;
        }
        self.bus.publish(&Event::ProgressUpdate(changed));
        Ok(())
    }

    fn persist(&self, row: &SourceProgress) -> Result<(), ProgressError> {
        let write_txn = self.db.begin_write().map_err(StoreError::from)?;
        {
            let mut table = write_txn.open_table(TABLE).map_err(StoreError::from)?;
            table
                .insert(row.source.as_str(), row.clone())
                .map_err(StoreError::from)?;
        }
        write_txn.commit().map_err(StoreError::from)?;
        Ok(())
    }

    pub fn get(&self, source: &str) -> Option<SourceProgress> {
        self.rows.read().get(source).cloned()
    }

    /// Snapshot of every row, sorted by source name.
    pub fn snapshot(&self) -> Vec<SourceProgress> {
        let mut rows: Vec<SourceProgress> = self.rows.read().values().cloned().collect();
        rows.sort_by(|a, b| a.source.cmp(&b.source));
        rows
    }

    /// Event-bus subscription carrying the full state vector up front.
    pub fn subscribe(&self, id: &str) -> Subscription {
        self.bus
            .subscribe(id, Event::InitialStatus(self.snapshot()))
    }
}
