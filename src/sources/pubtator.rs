use crate::model::{Gene, Payload, PayloadKind};
use crate::sources::batch;
use crate::sources::context::DriverContext;
use crate::sources::error::DriverError;
use crate::sources::traits::{BatchReport, EvidenceSink, SourceDriver};
use serde::Deserialize;
use serde_json::json;

pub const NAME: &str = "pubtator";
const MAX_PMIDS: usize = 100;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    pmid: u64,
}

/// PubTator3 literature mentions per gene. Scored by publication count
/// (Track A); the pmid list is truncated, the count is not.
pub struct PubtatorDriver {
    base_url: String,
}

impl PubtatorDriver {
    pub fn new(base_url: String) -> Self {
        PubtatorDriver { base_url }
    }

    fn parse(&self, body: &str) -> Result<Payload, DriverError> {
        let response: SearchResponse =
            serde_json::from_str(body).map_err(|e| DriverError::parse(NAME, e.to_string()))?;
        let pmids: Vec<u64> = response
            .results
            .iter()
            .take(MAX_PMIDS)
            .map(|hit| hit.pmid)
            .collect();
        Ok(json!({ "publications": response.count, "pmids": pmids }))
    }
}

impl Default for PubtatorDriver {
    fn default() -> Self {
        PubtatorDriver::new(
            "https://www.ncbi.nlm.nih.gov/research/pubtator3-api".to_string(),
        )
    }
}

impl SourceDriver for PubtatorDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::Evidence
    }

    fn fetch_one(&self, gene: &Gene, ctx: &DriverContext) -> Result<Payload, DriverError> {
        let mut url = format!("{}/search/?text=@GENE_{}", self.base_url, gene.symbol);
        if let Some(key) = ctx.api_key() {
            url.push_str(&format!("&api_key={key}"));
        }
        let body = ctx.engine.get(
            &ctx.config,
            &url,
            Some(&gene.symbol),
            &ctx.cancel,
            |body| serde_json::from_str::<SearchResponse>(body).is_ok(),
        )?;
        self.parse(&body)
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
        payload
            .get("publications")
            .and_then(|v| v.as_u64())
            .is_some_and(|count| count > 0)
    }
}
