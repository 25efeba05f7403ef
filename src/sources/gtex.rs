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

pub const NAME: &str = "gtex";

/// GTEx median gene expression, bulk GCT. Kidney tissues are lifted out
/// for the panel; the tissue with the highest median TPM is kept for
/// context. Annotation only.
#[derive(Default)]
pub struct GtexDriver {
    by_symbol: RwLock<HashMap<String, Payload>>,
}

impl GtexDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// GCT layout: `#1.2`, a dimensions line, then a TSV whose first two
    /// columns are the Ensembl id and the symbol.
    fn parse(raw: &str) -> Result<HashMap<String, Payload>, DriverError> {
        let mut lines = raw.lines();
        let version = lines.next().unwrap_or_default();
        if !version.starts_with("#1.") {
            return Err(DriverError::parse(NAME, format!("unexpected GCT version line {version:?}")));
        }
        lines.next(); // dimensions

        let header = lines
            .next()
            .ok_or_else(|| DriverError::parse(NAME, "missing GCT header"))?;
        let tissues: Vec<&str> = header.split('\t').collect();
        if tissues.len() < 3 {
            return Err(DriverError::parse(NAME, "GCT header has no tissue columns"));
        }
        let cortex_col = tissues.iter().position(|t| *t == "Kidney - Cortex");
        let medulla_col = tissues.iter().position(|t| *t == "Kidney - Medulla");

        let mut by_symbol = HashMap::new();
        for line in lines {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 3 {
                continue;
            }
            let symbol = fields[1].trim().to_uppercase();
            if symbol.is_empty() || by_symbol.contains_key(&symbol) {
                continue;
            }

            let value_at = |col: Option<usize>| {
                col.and_then(|c| fields.get(c))
                    .and_then(|v| v.trim().parse::<f64>().ok())
            };
            let (mut max_tissue, mut max_tpm) = (None::<&str>, f64::MIN);
            for (i, tissue) in tissues.iter().enumerate().skip(2) {
                if let Some(tpm) = value_at(Some(i))
                    && tpm > max_tpm
                {
                    max_tissue = Some(*tissue);
                    max_tpm = tpm;
                }
            }

            by_symbol.insert(
                symbol,
                json!({
                    "kidney_cortex_tpm": value_at(cortex_col),
                    "kidney_medulla_tpm": value_at(medulla_col),
                    "max_tissue": max_tissue,
                    "max_tpm": max_tissue.map(|_| max_tpm),
                }),
            );
        }
        Ok(by_symbol)
    }
}

impl SourceDriver for GtexDriver {
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
        info!("GTEx expression loaded for {items_loaded} genes");
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

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const RAW: &str = "#1.2\n\
2\t4\n\
Name\tDescription\tKidney - Cortex\tKidney - Medulla\tLiver\tWhole Blood\n\
ENSG00000008710.19\tPKD1\t42.5\t38.1\t12.0\t3.3\n\
ENSG00000169344.15\tUMOD\t1500.2\t820.9\t0.1\t0.0\n";

    #[rstest]
    fn test_parse_kidney_columns() {
        let parsed = GtexDriver::parse(RAW).unwrap();

        assert_eq!(parsed["PKD1"]["kidney_cortex_tpm"], 42.5);
        assert_eq!(parsed["PKD1"]["kidney_medulla_tpm"], 38.1);
        assert_eq!(parsed["PKD1"]["max_tissue"], "Kidney - Cortex");
        assert_eq!(parsed["UMOD"]["max_tpm"], 1500.2);
    }

    #[rstest]
    fn test_bad_version_line_rejected() {
        assert!(matches!(
            GtexDriver::parse("not-a-gct\n"),
            Err(DriverError::Parse { .. })
        ));
    }
}
