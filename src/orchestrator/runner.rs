use crate::caching::CacheLayer;
use crate::config::{Settings, SourceRegistry};
use crate::fetch::{BulkFetcher, FetchEngine};
use crate::model::{Gene, Payload, PayloadKind, UpsertOutcome};
use crate::orchestrator::cancellation::CancellationToken;
use crate::orchestrator::error::OrchestratorError;
use crate::orchestrator::pause::PauseGate;
use crate::progress::{ProgressTracker, SourceState, Subscription};
use crate::sources::internal::{AGGREGATION, NORMALIZATION};
use crate::sources::{DriverContext, DriverFactory, DriverServices, EvidenceSink};
use crate::store::{EvidenceStore, RunHandle, RunStatus, StoreError};
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

/// A source fails as a whole when more than half of at least this many
/// attempted genes fail.
const ERROR_RATE_FLOOR: usize = 10;
const ERROR_RATE_LIMIT: f64 = 0.5;

#[derive(Clone)]
struct SourceControl {
    cancel: CancellationToken,
    pause: PauseGate,
}

/// Sink wiring driver output into the evidence or annotation store by
/// payload kind.
struct StoreSink {
    store: Arc<EvidenceStore>,
}

impl EvidenceSink for StoreSink {
    fn accept(
        &self,
        gene: &Gene,
        source: &str,
        kind: PayloadKind,
        payload: Payload,
        classification: Option<String>,
    ) -> Result<UpsertOutcome, StoreError> {
        match kind {
            PayloadKind::Evidence => {
                self.store
                    .upsert_evidence(gene.id, source, payload, classification)
            }
            PayloadKind::Annotation => self.store.upsert_annotation(gene.id, source, payload),
        }
    }
}

/// Schedules source executions: dependency order, a bounded number of
/// concurrent drivers, pause/resume/cancel, and crash recovery. Fail-safe:
/// a crashed run is recovered as `failed("interrupted")` at the next
/// startup and merges are per-gene transactions, so no evidence row is
/// ever left half-written.
pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    settings: Arc<Settings>,
    engine: Arc<FetchEngine>,
    bulk: Arc<BulkFetcher>,
    cache: Arc<CacheLayer>,
    store: Arc<EvidenceStore>,
    tracker: Arc<ProgressTracker>,
    services: Arc<DriverServices>,
    controls: Mutex<HashMap<String, SourceControl>>,
    slot_tx: Sender<()>,
    slot_rx: Receiver<()>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<SourceRegistry>,
        settings: Arc<Settings>,
        engine: Arc<FetchEngine>,
        bulk: Arc<BulkFetcher>,
        cache: Arc<CacheLayer>,
        store: Arc<EvidenceStore>,
        tracker: Arc<ProgressTracker>,
        services: Arc<DriverServices>,
    ) -> Result<Self, OrchestratorError> {
        settings.validate(&registry)?;
        tracker.ensure_registered(registry.names())?;
        tracker.recover_interrupted()?;

        let (slot_tx, slot_rx) = bounded(settings.max_parallel_sources);
        for _ in 0..settings.max_parallel_sources {
            slot_tx.send(()).expect("slot channel sized to capacity");
        }

        Ok(Orchestrator {
            registry,
            settings,
            engine,
            bulk,
            cache,
            store,
            tracker,
            services,
            controls: Mutex::new(HashMap::new()),
            slot_tx,
            slot_rx,
        })
    }

    fn control_for(&self, source: &str) -> SourceControl {
        self.controls
            .lock()
            .entry(source.to_string())
            .or_insert_with(|| SourceControl {
                cancel: CancellationToken::new(),
                pause: PauseGate::new(),
            })
            .clone()
    }

    /// Marks a source queued, resetting a terminal state first. Errors if
    /// the source is mid-run.
    fn enqueue(&self, source: &str) -> Result<(), OrchestratorError> {
        if self.registry.get(source).is_none() {
            return Err(OrchestratorError::UnknownSource(source.to_string()));
        }
        let current = self
            .tracker
            .get(source)
            .map(|row| row.state)
            .unwrap_or(SourceState::Idle);
        if matches!(
            current,
            SourceState::Queued | SourceState::Running | SourceState::Paused
        ) {
            return Err(OrchestratorError::AlreadyRunning(source.to_string()));
        }
        if current.is_terminal() {
            self.tracker.transition(source, SourceState::Idle, None)?;
        }
        // A fresh control per run: the previous token stays cancelled.
        self.controls.lock().insert(
            source.to_string(),
            SourceControl {
                cancel: CancellationToken::new(),
                pause: PauseGate::new(),
            },
        );
        self.tracker.transition(source, SourceState::Queued, None)?;
        Ok(())
    }

    /// Runs one queued source to its terminal state. Blocking; called on a
    /// worker thread.
    fn execute(&self, source: &str) -> SourceState {
        let control = self.control_for(source);

        // Bounded driver concurrency: hold a slot for the whole execution.
        let _slot = match self.slot_rx.recv() {
            Ok(permit) => SlotGuard {
                sender: self.slot_tx.clone(),
                _permit: permit,
            },
            Err(_) => return SourceState::Failed,
        };

        let outcome = self.execute_inner(source, &control);
        let (state, error) = match outcome {
            Ok(()) => (SourceState::Completed, None),
            Err(err) => {
                let reason = if control.cancel.is_cancelled() {
                    "cancelled".to_string()
                } else {
                    err.to_string()
                };
                (SourceState::Failed, Some(reason))
            }
        };

        if let Err(err) = self.tracker.transition(source, state, error.as_deref()) {
            error!("Terminal transition failed for {source}: {err}");
        }
        if let Err(err) = self.tracker.flush() {
            error!("Progress flush failed for {source}: {err}");
        }
        state
    }

    fn execute_inner(
        &self,
        source: &str,
        control: &SourceControl,
    ) -> Result<(), OrchestratorError> {
        let config = self
            .registry
            .get(source)
            .ok_or_else(|| OrchestratorError::UnknownSource(source.to_string()))?
            .clone();
        let driver = DriverFactory::build(source, &self.services)
            .ok_or_else(|| OrchestratorError::NoDriver(source.to_string()))?;

        if control.cancel.is_cancelled() {
            return Err(OrchestratorError::Driver(
                crate::sources::DriverError::Cancelled,
            ));
        }
        self.tracker.transition(source, SourceState::Running, None)?;

        let ctx = DriverContext {
            config,
            settings: Arc::clone(&self.settings),
            engine: Arc::clone(&self.engine),
            bulk: Arc::clone(&self.bulk),
            cache: Arc::clone(&self.cache),
            tracker: Arc::clone(&self.tracker),
            cancel: control.cancel.clone(),
            pause: control.pause.clone(),
        };

        let prepared = driver.prepare(&ctx)?;
        if prepared.items_loaded > 0 {
            info!("{source} prepare loaded {} items", prepared.items_loaded);
        }

        let genes = self.store.list_genes()?;
        self.tracker.set_total(source, genes.len() as u64)?;

        let sink = StoreSink {
            store: Arc::clone(&self.store),
        };
        let report = driver.fetch_batch(&genes, &sink, &ctx)?;

        if report.attempted >= ERROR_RATE_FLOOR && report.error_rate() > ERROR_RATE_LIMIT {
            warn!(
                "{source} failed as a whole: {}/{} genes failed",
                report.failed, report.attempted
            );
            return Err(OrchestratorError::Driver(
                crate::sources::DriverError::parse(
                    source,
                    format!(
                        "error rate {:.0}% over {} genes",
                        report.error_rate() * 100.0,
                        report.attempted
                    ),
                ),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    /// Begins or enqueues a run of one source; returns immediately.
    pub fn trigger(self: &Arc<Self>, source: &str) -> Result<RunHandle, OrchestratorError> {
        self.enqueue(source)?;
        let run = self.store.create_run("api", vec![source.to_string()])?;

        let orchestrator = Arc::clone(self);
        let source = source.to_string();
        let run_id = run.id;
        thread::Builder::new()
            .name(format!("source-{source}"))
            .spawn(move || {
                let state = orchestrator.execute(&source);
                let status = match state {
                    SourceState::Completed => RunStatus::Completed,
                    _ => RunStatus::Failed,
                };
                if let Err(err) = orchestrator.store.finish_run(run_id, status) {
                    error!("Could not finish run {run_id}: {err}");
                }
            })
            .expect("Failed to spawn source thread");

        Ok(RunHandle { run_id: run.id })
    }

    /// Runs every source in dependency order: normalization strictly
    /// first, aggregation strictly last, drivers in between bounded by the
    /// parallel-source cap. Returns immediately.
    pub fn trigger_all(self: &Arc<Self>) -> Result<RunHandle, OrchestratorError> {
        let drivers: Vec<String> = self
            .registry
            .names()
            .filter(|name| *name != NORMALIZATION && *name != AGGREGATION)
            .map(str::to_string)
            .collect();

        let mut all = Vec::with_capacity(drivers.len() + 2);
        all.push(NORMALIZATION.to_string());
        all.extend(drivers.iter().cloned());
        all.push(AGGREGATION.to_string());

        // Check the whole roster before touching any state, so a busy
        // source never leaves the rest half-enqueued.
        for source in &all {
            let state = self
                .tracker
                .get(source)
                .map(|row| row.state)
                .unwrap_or(SourceState::Idle);
            if matches!(
                state,
                SourceState::Queued | SourceState::Running | SourceState::Paused
            ) {
                return Err(OrchestratorError::AlreadyRunning(source.clone()));
            }
        }
        for source in &all {
            self.enqueue(source)?;
        }
        let run = self.store.create_run("api", all)?;

        let orchestrator = Arc::clone(self);
        let run_id = run.id;
        thread::Builder::new()
            .name("pipeline-run".to_string())
            .spawn(move || {
                let mut succeeded = 0usize;
                let mut failed = 0usize;

                // Normalization gates everything else.
                match orchestrator.execute(NORMALIZATION) {
                    SourceState::Completed => succeeded += 1,
                    _ => failed += 1,
                }

                let mut handles = Vec::new();
                for source in drivers {
                    let inner = Arc::clone(&orchestrator);
                    handles.push(
                        thread::Builder::new()
                            .name(format!("source-{source}"))
                            .spawn(move || inner.execute(&source))
                            .expect("Failed to spawn source thread"),
                    );
                }
                for handle in handles {
                    match handle.join() {
                        Ok(SourceState::Completed) => succeeded += 1,
                        _ => failed += 1,
                    }
                }

                // Aggregation is the sink and runs last regardless.
                match orchestrator.execute(AGGREGATION) {
                    SourceState::Completed => succeeded += 1,
                    _ => failed += 1,
                }

                let status = match (succeeded, failed) {
                    (_, 0) => RunStatus::Completed,
                    (0, _) => RunStatus::Failed,
                    _ => RunStatus::Partial,
                };
                info!("Pipeline run {run_id} finished: {succeeded} ok, {failed} failed");
                if let Err(err) = orchestrator.store.finish_run(run_id, status) {
                    error!("Could not finish run {run_id}: {err}");
                }
            })
            .expect("Failed to spawn pipeline thread");

        Ok(RunHandle { run_id: run.id })
    }

    pub fn pause(&self, source: &str) -> Result<(), OrchestratorError> {
        let state = self
            .tracker
            .get(source)
            .ok_or_else(|| OrchestratorError::UnknownSource(source.to_string()))?
            .state;
        if state != SourceState::Running {
            return Err(OrchestratorError::NotRunning(source.to_string()));
        }
        self.control_for(source).pause.pause();
        self.tracker.transition(source, SourceState::Paused, None)?;
        Ok(())
    }

    pub fn resume(&self, source: &str) -> Result<(), OrchestratorError> {
        let state = self
            .tracker
            .get(source)
            .ok_or_else(|| OrchestratorError::UnknownSource(source.to_string()))?
            .state;
        if state != SourceState::Paused {
            return Err(OrchestratorError::NotRunning(source.to_string()));
        }
        self.tracker.transition(source, SourceState::Running, None)?;
        self.control_for(source).pause.resume();
        Ok(())
    }

    /// Cooperative cancel: in-flight HTTP requests complete or time out on
    /// their own; already-merged evidence stays.
    pub fn cancel(&self, source: &str) -> Result<(), OrchestratorError> {
        let state = self
            .tracker
            .get(source)
            .ok_or_else(|| OrchestratorError::UnknownSource(source.to_string()))?
            .state;
        if !matches!(
            state,
            SourceState::Running | SourceState::Paused | SourceState::Queued
        ) {
            return Err(OrchestratorError::NotRunning(source.to_string()));
        }
        let control = self.control_for(source);
        control.cancel.cancel();
        // A paused source never reaches its next checkpoint; release it.
        control.pause.resume();
        Ok(())
    }

    pub fn status(&self) -> Vec<crate::progress::SourceProgress> {
        self.tracker.snapshot()
    }

    pub fn subscribe(&self, id: &str) -> Subscription {
        self.tracker.subscribe(id)
    }
}

/// Returns the concurrency permit when the source execution ends.
struct SlotGuard {
    sender: Sender<()>,
    _permit: (),
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let _ = self.sender.send(());
    }
}
