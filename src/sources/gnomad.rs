use crate::model::{Gene, Payload, PayloadKind};
use crate::sources::batch;
use crate::sources::context::DriverContext;
use crate::sources::error::DriverError;
use crate::sources::traits::{BatchReport, EvidenceSink, PrepareReport, SourceDriver};
use log::info;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::fs;

pub const NAME: &str = "gnomad";

/// Constraint metric columns across gnomAD releases: v2 flat names first,
/// v4 dotted names second.
const METRIC_COLUMNS: [(&str, [&str; 2]); 5] = [
    ("pLI", ["pLI", "lof.pLI"]),
    ("oe_lof", ["oe_lof", "lof.oe"]),
    ("oe_lof_upper", ["oe_lof_upper", "lof.oe_ci.upper"]),
    ("mis_z", ["mis_z", "mis.z_score"]),
    ("syn_z", ["syn_z", "syn.z_score"]),
];

/// gnomAD gene constraint, bulk TSV. Annotation only; depending on the
/// dataset version X/Y genes may be absent, in which case they simply get
/// no constraint annotation.
#[derive(Default)]
pub struct GnomadDriver {
    by_symbol: RwLock<HashMap<String, Payload>>,
}

impl GnomadDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(raw: &str) -> Result<HashMap<String, Payload>, DriverError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(raw.as_bytes());

        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h == name);
        let gene_col =
            column("gene").ok_or_else(|| DriverError::parse(NAME, "missing gene column"))?;
        let canonical_col = column("canonical").or_else(|| column("mane_select"));
        let metric_cols: Vec<(&str, Option<usize>)> = METRIC_COLUMNS
            .iter()
            .map(|(label, candidates)| {
                (*label, candidates.iter().find_map(|c| column(c)))
            })
            .collect();

        let mut by_symbol = HashMap::new();
        for row in reader.records() {
            let row = row?;
            let symbol = row.get(gene_col).unwrap_or_default().trim().to_uppercase();
            if symbol.is_empty() {
                continue;
            }
            // Keep the canonical transcript; fall back to first-seen when
            // the column is absent.
            if let Some(col) = canonical_col
                && row.get(col).map(|v| v.trim().to_lowercase()) != Some("true".to_string())
            {
                continue;
            }
            if by_symbol.contains_key(&symbol) {
                continue;
            }

            let mut metrics = serde_json::Map::new();
            for (label, col) in &metric_cols {
                let value = col
                    .and_then(|c| row.get(c))
                    .and_then(|v| v.trim().parse::<f64>().ok());
                if let Some(value) = value {
                    metrics.insert(label.to_string(), json!(value));
                }
            }
            if !metrics.is_empty() {
                by_symbol.insert(symbol, Payload::Object(metrics));
            }
        }
        Ok(by_symbol)
    }
}

impl SourceDriver for GnomadDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::Annotation
    }

    fn prepare(&self, ctx: &DriverContext) -> Result<PrepareReport, DriverError> {
        let url = ctx
            .config
            .bulk_url
            .as_deref()
            .ok_or_else(|| DriverError::MissingBulkUrl(NAME.to_string()))?;
        let path = ctx
            .bulk
            .download(&ctx.config, url, ctx.config.cache_ttl_hours, &ctx.cancel)?;
        let parsed = Self::parse(&fs::read_to_string(path)?)?;
        let items_loaded = parsed.len();
        info!("gnomAD constraint loaded for {items_loaded} genes");
        *self.by_symbol.write() = parsed;
        Ok(PrepareReport { items_loaded })
    }

    fn fetch_one(&self, gene: &Gene, _ctx: &DriverContext) -> Result<Payload, DriverError> {
        let data = self.by_symbol.read();
        if data.is_empty() {
            return Err(DriverError::NotPrepared(NAME.to_string()));
        }
        Ok(data.get(&gene.symbol).cloned().unwrap_or(Payload::Null))
    }

    fn fetch_batch(
        &self,
        genes: &[Gene],
        sink: &dyn EvidenceSink,
        ctx: &DriverContext,
    ) -> Result<BatchReport, DriverError> {
        if self.by_symbol.read().is_empty() {
            return Err(DriverError::NotPrepared(NAME.to_string()));
        }
        batch::run_bulk_lookup(self, genes, sink, ctx, |gene| {
            self.by_symbol.read().get(&gene.symbol).cloned()
        })
    }
}
