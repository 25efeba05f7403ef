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

pub const NAME: &str = "gencc";

/// GenCC submissions, bulk TSV. Every submitter contributes one
/// classification per gene-disease pair; the full list feeds Track C.
/// Classification strings arrive in mixed case across submitters.
#[derive(Default)]
pub struct GenccDriver {
    by_symbol: RwLock<HashMap<String, Payload>>,
}

impl GenccDriver {
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
        let symbol_col = column("gene_symbol")
            .ok_or_else(|| DriverError::parse(NAME, "missing gene_symbol column"))?;
        let classification_col = column("classification_title")
            .ok_or_else(|| DriverError::parse(NAME, "missing classification_title column"))?;
        let submitter_col = column("submitter_title");
        let disease_col = column("disease_title");

        let mut grouped: HashMap<String, (Vec<String>, Vec<String>, Vec<String>)> = HashMap::new();
        for row in reader.records() {
            let row = row?;
            let symbol = row.get(symbol_col).unwrap_or_default().trim().to_uppercase();
            let classification = row.get(classification_col).unwrap_or_default().trim();
            if symbol.is_empty() || classification.is_empty() {
                continue;
            }
            let entry = grouped.entry(symbol).or_default();
            entry.0.push(classification.to_string());
            if let Some(submitter) = submitter_col.and_then(|c| row.get(c)) {
                if !entry.1.contains(&submitter.to_string()) {
                    entry.1.push(submitter.to_string());
                }
            }
            if let Some(disease) = disease_col.and_then(|c| row.get(c)) {
                if !entry.2.contains(&disease.to_string()) {
                    entry.2.push(disease.to_string());
                }
            }
        }

        Ok(grouped
            .into_iter()
            .map(|(symbol, (classifications, submitters, diseases))| {
                let payload = json!({
                    "submission_count": classifications.len(),
                    "classifications": classifications,
                    "submitters": submitters,
                    "diseases": diseases,
                });
                (symbol, payload)
            })
            .collect())
    }
}

impl SourceDriver for GenccDriver {
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
        info!("GenCC submissions loaded for {items_loaded} genes");
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
            .get("classifications")
            .and_then(|c| c.as_array())
            .is_some_and(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const RAW: &str = "uuid\tgene_curie\tgene_symbol\tdisease_curie\tdisease_title\tclassification_title\tsubmitter_title\n\
GENCC_1\tHGNC:9008\tPKD1\tMONDO:0004691\tpolycystic kidney disease\tDefinitive\tAmbry Genetics\n\
GENCC_2\tHGNC:9008\tPKD1\tMONDO:0004691\tpolycystic kidney disease\tstrong\tInvitae\n\
GENCC_3\tHGNC:9008\tPKD1\tMONDO:0000001\tnephronophthisis\tSupportive\tPanelApp Australia\n\
GENCC_4\tHGNC:12601\tUMOD\tMONDO:0002473\ttubulointerstitial kidney disease\tLimited\tInvitae\n";

    #[rstest]
    fn test_parse_groups_submissions() {
        let parsed = GenccDriver::parse(RAW).unwrap();
        assert_eq!(parsed.len(), 2);

        let pkd1 = &parsed["PKD1"];
        assert_eq!(pkd1["submission_count"], 3);
        // Mixed case is preserved here; the scoring track lowercases.
        assert_eq!(
            pkd1["classifications"],
            json!(["Definitive", "strong", "Supportive"])
        );
        assert_eq!(pkd1["submitters"].as_array().unwrap().len(), 3);
        assert_eq!(pkd1["diseases"].as_array().unwrap().len(), 2);
    }

    #[rstest]
    fn test_missing_column_is_parse_error() {
        let raw = "uuid\tgene_curie\nGENCC_1\tHGNC:9008\n";
        assert!(matches!(
            GenccDriver::parse(raw),
            Err(DriverError::Parse { .. })
        ));
    }

    #[rstest]
    fn test_validity() {
        let driver = GenccDriver::new();
        assert!(driver.is_valid(&json!({"classifications": ["Definitive"]})));
        assert!(!driver.is_valid(&json!({"classifications": []})));
    }
}
