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

pub const NAME: &str = "literature";

/// Manually curated kidney-gene publications, bulk CSV with one row per
/// gene-publication pair. Scored by publication count (Track A).
#[derive(Default)]
pub struct LiteratureDriver {
    by_symbol: RwLock<HashMap<String, Payload>>,
}

impl LiteratureDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(raw: &str) -> Result<HashMap<String, Payload>, DriverError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(raw.as_bytes());

        let headers = reader.headers()?.clone();
        let column = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.contains(&h.trim().to_lowercase().as_str()))
        };
        let symbol_col = column(&["approved_symbol", "symbol", "gene"])
            .ok_or_else(|| DriverError::parse(NAME, "missing gene symbol column"))?;
        let pmid_col = column(&["pmid", "publication", "pubmed_id"])
            .ok_or_else(|| DriverError::parse(NAME, "missing pmid column"))?;

        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for row in reader.records() {
            let row = row?;
            let symbol = row.get(symbol_col).unwrap_or_default().trim().to_uppercase();
            let pmid = row.get(pmid_col).unwrap_or_default().trim().to_string();
            if symbol.is_empty() || pmid.is_empty() {
                continue;
            }
            let pmids = grouped.entry(symbol).or_default();
            if !pmids.contains(&pmid) {
                pmids.push(pmid);
            }
        }

        Ok(grouped
            .into_iter()
            .map(|(symbol, pmids)| (symbol, json!({ "publications": pmids })))
            .collect())
    }
}

impl SourceDriver for LiteratureDriver {
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
        info!("Curated literature loaded for {items_loaded} genes");
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
            .get("publications")
            .and_then(|p| p.as_array())
            .is_some_and(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_parse_deduplicates_pmids() {
        let raw = "approved_symbol,pmid,publication_date\n\
PKD1,27835617,2016-11-10\n\
PKD1,27835617,2016-11-10\n\
PKD1,29801666,2018-05-24\n\
UMOD,12471062,2002-12-01\n";
        let parsed = LiteratureDriver::parse(raw).unwrap();

        assert_eq!(
            parsed["PKD1"]["publications"],
            json!(["27835617", "29801666"])
        );
        assert_eq!(parsed["UMOD"]["publications"].as_array().unwrap().len(), 1);
    }

    #[rstest]
    fn test_alternate_header_names() {
        let raw = "gene,pubmed_id\npkd2,31712251\n";
        let parsed = LiteratureDriver::parse(raw).unwrap();
        assert!(parsed.contains_key("PKD2"));
    }

    #[rstest]
    fn test_missing_columns_rejected() {
        assert!(matches!(
            LiteratureDriver::parse("a,b\n1,2\n"),
            Err(DriverError::Parse { .. })
        ));
    }
}
