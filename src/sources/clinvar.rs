use crate::model::{Gene, Payload, PayloadKind};
use crate::sources::batch;
use crate::sources::context::DriverContext;
use crate::sources::error::DriverError;
use crate::sources::traits::{BatchReport, EvidenceSink, SourceDriver};
use serde::Deserialize;
use serde_json::json;

pub const NAME: &str = "clinvar";

/// Clinical-significance buckets counted per gene. Variant-level analysis
/// beyond counting is out of scope.
const SIGNIFICANCE_FILTERS: [(&str, &str); 4] = [
    ("pathogenic", "%22clinsig+pathogenic%22%5BProperties%5D"),
    ("likely_pathogenic", "%22clinsig+likely+pathogenic%22%5BProperties%5D"),
    (
        "uncertain_significance",
        "%22clinsig+vus%22%5BProperties%5D",
    ),
    ("benign", "%22clinsig+benign%22%5BProperties%5D"),
];

#[derive(Debug, Deserialize)]
struct EsearchResponse {
    esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    count: String,
}

/// ClinVar variant summaries through NCBI eutils. Annotation only; the
/// NCBI key, when configured, is appended to every request.
pub struct ClinvarDriver {
    base_url: String,
}

impl ClinvarDriver {
    pub fn new(base_url: String) -> Self {
        ClinvarDriver { base_url }
    }

    fn count_for(
        &self,
        gene: &Gene,
        filter: Option<&str>,
        ctx: &DriverContext,
    ) -> Result<u64, DriverError> {
        let mut term = format!("{}%5Bgene%5D", gene.symbol);
        if let Some(filter) = filter {
            term.push_str("+AND+");
            term.push_str(filter);
        }
        let mut url = format!(
            "{}/esearch.fcgi?db=clinvar&term={term}&retmode=json&retmax=0",
            self.base_url
        );
        if let Some(key) = ctx.api_key() {
            url.push_str(&format!("&api_key={key}"));
        }
        let cache_key = match filter {
            Some(filter) => format!("{}:{filter}", gene.symbol),
            None => format!("{}:total", gene.symbol),
        };
        let body = ctx.engine.get(&ctx.config, &url, Some(&cache_key), &ctx.cancel, |body| {
            serde_json::from_str::<EsearchResponse>(body).is_ok()
        })?;
        let response: EsearchResponse =
            serde_json::from_str(&body).map_err(|e| DriverError::parse(NAME, e.to_string()))?;
        response
            .esearchresult
            .count
            .parse::<u64>()
            .map_err(|e| DriverError::parse(NAME, format!("count field: {e}")))
    }
}

impl Default for ClinvarDriver {
    fn default() -> Self {
        ClinvarDriver::new("https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string())
    }
}

impl SourceDriver for ClinvarDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::Annotation
    }

    fn fetch_one(&self, gene: &Gene, ctx: &DriverContext) -> Result<Payload, DriverError> {
        let total = self.count_for(gene, None, ctx)?;
        let mut by_significance = serde_json::Map::new();
        for (label, filter) in SIGNIFICANCE_FILTERS {
            by_significance.insert(label.to_string(), json!(self.count_for(gene, Some(filter), ctx)?));
        }
        Ok(json!({
            "variant_count": total,
            "by_significance": by_significance,
        }))
    }

    fn fetch_batch(
        &self,
        genes: &[Gene],
        sink: &dyn EvidenceSink,
        ctx: &DriverContext,
    ) -> Result<BatchReport, DriverError> {
        batch::run_per_gene(self, genes, sink, ctx)
    }

    fn is_valid(&self, payload: &Payload) -> bool {
        payload.get("variant_count").and_then(|v| v.as_u64()).is_some()
    }
}
