use crate::model::{Gene, UpsertOutcome};
use crate::orchestrator::worker_pool;
use crate::progress::ProgressDelta;
use crate::sources::context::DriverContext;
use crate::sources::error::DriverError;
use crate::sources::traits::{BatchReport, EvidenceSink, SourceDriver};
use log::{debug, warn};
use parking_lot::Mutex;

#[derive(Default)]
struct Tally {
    attempted: usize,
    succeeded: usize,
    failed: usize,
}

/// Default batch path for per-gene drivers: `fetch_one` across a bounded
/// worker pool, results pushed into the sink as they arrive. Individual
/// gene failures are local; they count into the report and the run
/// continues.
pub fn run_per_gene(
    driver: &dyn SourceDriver,
    genes: &[Gene],
    sink: &dyn EvidenceSink,
    ctx: &DriverContext,
) -> Result<BatchReport, DriverError> {
    let tally = Mutex::new(Tally::default());
    let source = ctx.config.name.clone();

    worker_pool::run_bounded(genes, ctx.workers(), |gene| {
        if ctx.checkpoint().is_err() {
            return;
        }
        let mut delta = ProgressDelta {
            processed: 1,
            current_op: Some(format!("fetching {}", gene.symbol)),
            ..ProgressDelta::default()
        };
        {
            let mut tally = tally.lock();
            tally.attempted += 1;
        }

        match driver.fetch_one(gene, ctx) {
            Ok(payload) if driver.is_valid(&payload) => {
                let classification = payload
                    .get("classification")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                match sink.accept(gene, &source, driver.kind(), payload, classification) {
                    Ok(UpsertOutcome::Inserted) => {
                        delta.added = 1;
                        tally.lock().succeeded += 1;
                    }
                    Ok(UpsertOutcome::Updated) => {
                        delta.updated = 1;
                        tally.lock().succeeded += 1;
                    }
                    Ok(UpsertOutcome::Unchanged) => {
                        tally.lock().succeeded += 1;
                    }
                    Err(err) => {
                        warn!("Sink rejected {source} payload for {}: {err}", gene.symbol);
                        ctx.tracker.note_error(&source, &err.to_string());
                        delta.failed = 1;
                        tally.lock().failed += 1;
                    }
                }
            }
            Ok(_) => {
                debug!("{source} returned an empty payload for {}", gene.symbol);
                delta.failed = 1;
                tally.lock().failed += 1;
            }
            Err(err) if err.is_cancelled() => {
                // The worker drains quietly; the orchestrator handles the
                // terminal transition.
            }
            Err(err) => {
                warn!("{source} fetch failed for {}: {err}", gene.symbol);
                ctx.tracker.note_error(&source, &err.to_string());
                delta.failed = 1;
                tally.lock().failed += 1;
            }
        }

        if let Err(err) = ctx.tracker.record(&source, delta) {
            warn!("Progress update failed for {source}: {err}");
        }
    });

    if ctx.cancel.is_cancelled() {
        return Err(DriverError::Cancelled);
    }

    let tally = tally.into_inner();
    Ok(BatchReport {
        attempted: tally.attempted,
        succeeded: tally.succeeded,
        failed: tally.failed,
    })
}

/// Batch path for bulk drivers: genes are looked up against the
/// pre-loaded dataset in-process, without concurrency. A gene absent from
/// the dataset is neither a success nor a failure.
pub fn run_bulk_lookup<F>(
    driver: &dyn SourceDriver,
    genes: &[Gene],
    sink: &dyn EvidenceSink,
    ctx: &DriverContext,
    lookup: F,
) -> Result<BatchReport, DriverError>
where
    F: Fn(&Gene) -> Option<crate::model::Payload>,
{
    let mut report = BatchReport::default();
    let source = &ctx.config.name;

    for gene in genes {
        ctx.checkpoint()?;
        let mut delta = ProgressDelta {
            processed: 1,
            current_op: Some(format!("matching {}", gene.symbol)),
            ..ProgressDelta::default()
        };

        if let Some(payload) = lookup(gene) {
            report.attempted += 1;
            if driver.is_valid(&payload) {
                let classification = payload
                    .get("classification")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                match sink.accept(gene, source, driver.kind(), payload, classification) {
                    Ok(UpsertOutcome::Inserted) => {
                        delta.added = 1;
                        report.succeeded += 1;
                    }
                    Ok(UpsertOutcome::Updated) => {
                        delta.updated = 1;
                        report.succeeded += 1;
                    }
                    Ok(UpsertOutcome::Unchanged) => {
                        report.succeeded += 1;
                    }
                    Err(err) => {
                        warn!("Sink rejected {source} payload for {}: {err}", gene.symbol);
                        ctx.tracker.note_error(source, &err.to_string());
                        delta.failed = 1;
                        report.failed += 1;
                    }
                }
            } else {
                delta.failed = 1;
                report.failed += 1;
            }
        }

        if let Err(err) = ctx.tracker.record(source, delta) {
            warn!("Progress update failed for {source}: {err}");
        }
    }

    Ok(report)
}
