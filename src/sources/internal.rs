use crate::model::{Gene, Payload, PayloadKind};
use crate::normalize::{GeneNormalizer, Resolution};
use crate::progress::ProgressDelta;
use crate::scoring::ScoringEngine;
use crate::sources::context::DriverContext;
use crate::sources::error::DriverError;
use crate::sources::traits::{BatchReport, EvidenceSink, PrepareReport, SourceDriver};
use crate::store::EvidenceStore;
use log::{info, warn};
use regex::Regex;
use serde_json::json;
use std::fs;
use std::sync::{Arc, OnceLock};

pub const NORMALIZATION: &str = "gene_normalization";
pub const AGGREGATION: &str = "evidence_aggregation";

/// Panel files are hand-maintained; anything that cannot be a gene
/// identifier is skipped before resolution.
fn symbol_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9@:_.-]*$").expect("static pattern"))
}

/// Internal step that resolves the configured panel symbols through the
/// normalizer, populating the gene table before any driver runs. With no
/// panel file configured it re-resolves the genes already in the store.
pub struct GeneNormalizationDriver {
    normalizer: Arc<GeneNormalizer>,
    store: Arc<EvidenceStore>,
}

impl GeneNormalizationDriver {
    pub fn new(normalizer: Arc<GeneNormalizer>, store: Arc<EvidenceStore>) -> Self {
        GeneNormalizationDriver { normalizer, store }
    }

    fn panel_symbols(&self, ctx: &DriverContext) -> Result<Vec<String>, DriverError> {
        if let Some(path) = &ctx.settings.panel_path {
            let raw = fs::read_to_string(path)?;
            return Ok(raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .filter(|line| {
                    let plausible = symbol_pattern().is_match(line);
                    if !plausible {
                        warn!("Skipping implausible panel entry {line:?}");
                    }
                    plausible
                })
                .map(str::to_string)
                .collect());
        }
        Ok(self
            .store
            .list_genes()?
            .into_iter()
            .map(|gene| gene.symbol)
            .collect())
    }
}

impl SourceDriver for GeneNormalizationDriver {
    fn name(&self) -> &str {
        NORMALIZATION
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::Annotation
    }

    fn prepare(&self, ctx: &DriverContext) -> Result<PrepareReport, DriverError> {
        let items_loaded = self
            .normalizer
            .prepare(&ctx.bulk, &ctx.config, &ctx.cancel)?;
        Ok(PrepareReport { items_loaded })
    }

    fn fetch_one(&self, gene: &Gene, _ctx: &DriverContext) -> Result<Payload, DriverError> {
        match self.normalizer.resolve(&gene.symbol)? {
            Resolution::Resolved(resolved) => Ok(json!({
                "symbol": resolved.symbol,
                "hgnc_id": resolved.hgnc_id,
            })),
            Resolution::Unresolved { query, .. } => Ok(json!({ "unresolved": query })),
        }
    }

    /// Resolves the panel list; the sink is unused because the normalizer
    /// writes gene rows itself.
    fn fetch_batch(
        &self,
        _genes: &[Gene],
        _sink: &dyn EvidenceSink,
        ctx: &DriverContext,
    ) -> Result<BatchReport, DriverError> {
        let symbols = self.panel_symbols(ctx)?;
        ctx.tracker.set_total(NORMALIZATION, symbols.len() as u64)?;
        let mut report = BatchReport::default();

        for symbol in &symbols {
            ctx.checkpoint()?;
            report.attempted += 1;
            let mut delta = ProgressDelta {
                processed: 1,
                current_op: Some(format!("resolving {symbol}")),
                ..ProgressDelta::default()
            };
            match self.normalizer.resolve(symbol) {
                Ok(Resolution::Resolved(_)) => {
                    report.succeeded += 1;
                    delta.added = 1;
                }
                Ok(Resolution::Unresolved { query, candidates }) => {
                    warn!("Panel symbol {query} unresolved ({} candidates)", candidates.len());
                    report.failed += 1;
                    delta.failed = 1;
                }
                Err(err) => {
                    ctx.tracker.note_error(NORMALIZATION, &err.to_string());
                    report.failed += 1;
                    delta.failed = 1;
                }
            }
            if let Err(err) = ctx.tracker.record(NORMALIZATION, delta) {
                warn!("Progress update failed for {NORMALIZATION}: {err}");
            }
        }
        info!(
            "Panel normalization resolved {}/{} symbols",
            report.succeeded, report.attempted
        );
        Ok(report)
    }

    fn is_valid(&self, payload: &Payload) -> bool {
        payload.get("unresolved").is_none()
    }
}

/// Terminal step: refreshes the scoring view into the curation table.
/// Runs after every driver has finished.
pub struct EvidenceAggregationDriver {
    store: Arc<EvidenceStore>,
    scoring: Arc<ScoringEngine>,
}

impl EvidenceAggregationDriver {
    pub fn new(store: Arc<EvidenceStore>, scoring: Arc<ScoringEngine>) -> Self {
        EvidenceAggregationDriver { store, scoring }
    }
}

impl SourceDriver for EvidenceAggregationDriver {
    fn name(&self) -> &str {
        AGGREGATION
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::Annotation
    }

    fn fetch_one(&self, gene: &Gene, _ctx: &DriverContext) -> Result<Payload, DriverError> {
        let rows = self.scoring.score_all(&self.store)?;
        let row = rows
            .into_iter()
            .find(|r| r.gene_id == gene.id)
            .ok_or_else(|| DriverError::parse(AGGREGATION, format!("no score row for {}", gene.symbol)))?;
        Ok(serde_json::to_value(row).map_err(crate::store::StoreError::from)?)
    }

    fn fetch_batch(
        &self,
        _genes: &[Gene],
        _sink: &dyn EvidenceSink,
        ctx: &DriverContext,
    ) -> Result<BatchReport, DriverError> {
        ctx.checkpoint()?;
        let rows = self.scoring.score_all(&self.store)?;
        ctx.tracker.set_total(AGGREGATION, rows.len() as u64)?;

        let scores: Vec<(u64, f64, String)> = rows
            .iter()
            .map(|row| (row.gene_id, row.percentage_score, row.group.to_string()))
            .collect();
        self.store.update_curation_scores(&scores)?;

        if let Err(err) = ctx.tracker.record(
            AGGREGATION,
            ProgressDelta {
                processed: rows.len() as u64,
                updated: rows.len() as u64,
                current_op: Some("refreshing curation view".to_string()),
                ..ProgressDelta::default()
            },
        ) {
            warn!("Progress update failed for {AGGREGATION}: {err}");
        }
        info!("Aggregated scores for {} genes", rows.len());
        Ok(BatchReport {
            attempted: rows.len(),
            succeeded: rows.len(),
            failed: 0,
        })
    }
}
