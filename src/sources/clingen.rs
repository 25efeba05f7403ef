use crate::model::{Gene, Payload, PayloadKind};
use crate::scoring::tracks::clingen_weight;
use crate::sources::batch;
use crate::sources::context::DriverContext;
use crate::sources::error::DriverError;
use crate::sources::traits::{BatchReport, EvidenceSink, PrepareReport, SourceDriver};
use log::info;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::fs;

pub const NAME: &str = "clingen";

/// ClinGen gene-disease validity, bulk CSV. One gene can carry several
/// curations (per disease and inheritance mode); the strongest
/// classification feeds Track B.
#[derive(Default)]
pub struct ClingenDriver {
    by_symbol: RwLock<HashMap<String, Payload>>,
}

#[derive(Debug, Clone)]
struct Curation {
    disease: String,
    moi: String,
    classification: String,
    date: String,
}

impl ClingenDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The download ships with a banner and `+++` separator rows around
    /// the real CSV header; everything before the `GENE SYMBOL` row and
    /// every separator row is dropped.
    fn strip_preamble(raw: &str) -> String {
        raw.lines()
            .skip_while(|line| !line.starts_with("\"GENE SYMBOL\"") && !line.starts_with("GENE SYMBOL"))
            .filter(|line| !line.starts_with('+') && !line.starts_with("\"+"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn parse(raw: &str) -> Result<HashMap<String, Payload>, DriverError> {
        let table = Self::strip_preamble(raw);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(table.as_bytes());

        let mut curations: HashMap<String, Vec<Curation>> = HashMap::new();
        for row in reader.records() {
            let row = row?;
            let symbol = row.get(0).unwrap_or_default().trim().to_uppercase();
            if symbol.is_empty() {
                continue;
            }
            curations.entry(symbol).or_default().push(Curation {
                disease: row.get(2).unwrap_or_default().to_string(),
                moi: row.get(4).unwrap_or_default().to_string(),
                classification: row.get(6).unwrap_or_default().to_string(),
                date: row.get(8).unwrap_or_default().to_string(),
            });
        }

        let mut by_symbol = HashMap::new();
        for (symbol, entries) in curations {
            let strongest = entries
                .iter()
                .max_by(|a, b| {
                    clingen_weight(&a.classification)
                        .total_cmp(&clingen_weight(&b.classification))
                })
                .map(|c| c.classification.clone())
                .unwrap_or_default();
            let last_evaluated = entries.iter().map(|c| c.date.clone()).max().unwrap_or_default();
            let payload = json!({
                "classification": strongest,
                "classifications": entries.iter().map(|c| c.classification.clone()).collect::<Vec<_>>(),
                "diseases": entries.iter().map(|c| json!({"label": c.disease, "moi": c.moi})).collect::<Vec<_>>(),
                "last_evaluated": last_evaluated,
            });
            by_symbol.insert(symbol, payload);
        }
        Ok(by_symbol)
    }
}

impl SourceDriver for ClingenDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::Evidence
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
        info!("ClinGen validity loaded for {items_loaded} genes");
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

    fn is_valid(&self, payload: &Payload) -> bool {
        payload
            .get("classification")
            .and_then(|c| c.as_str())
            .is_some_and(|c| !c.is_empty())
    }
}
