use crate::model::{Gene, Payload, PayloadKind};
use crate::sources::batch;
use crate::sources::context::DriverContext;
use crate::sources::error::DriverError;
use crate::sources::traits::{BatchReport, EvidenceSink, SourceDriver};
use serde::Deserialize;
use serde_json::json;

pub const NAME: &str = "hpo";

#[derive(Debug, Deserialize)]
struct GeneAnnotationResponse {
    #[serde(default)]
    phenotypes: Vec<Term>,
    #[serde(default)]
    diseases: Vec<Term>,
}

#[derive(Debug, Deserialize)]
struct Term {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

/// HPO gene annotations from the JAX ontology service. Scored by
/// `|hpo_terms| + |diseases|` (Track A). Lookups go by Entrez id, so genes
/// without one fail locally.
pub struct HpoDriver {
    base_url: String,
}

impl HpoDriver {
    pub fn new(base_url: String) -> Self {
        HpoDriver { base_url }
    }

    fn parse(&self, body: &str) -> Result<Payload, DriverError> {
        let response: GeneAnnotationResponse =
            serde_json::from_str(body).map_err(|e| DriverError::parse(NAME, e.to_string()))?;
        let terms: Vec<Payload> = response
            .phenotypes
            .iter()
            .map(|t| json!({"id": t.id, "name": t.name}))
            .collect();
        let diseases: Vec<Payload> = response
            .diseases
            .iter()
            .map(|t| json!({"id": t.id, "name": t.name}))
            .collect();
        Ok(json!({ "hpo_terms": terms, "diseases": diseases }))
    }
}

impl Default for HpoDriver {
    fn default() -> Self {
        HpoDriver::new("https://ontology.jax.org/api/network".to_string())
    }
}

impl SourceDriver for HpoDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::Evidence
    }

    fn fetch_one(&self, gene: &Gene, ctx: &DriverContext) -> Result<Payload, DriverError> {
        let entrez = gene
            .entrez_id
            .as_deref()
            .ok_or_else(|| DriverError::MissingIdentifier {
                symbol: gene.symbol.clone(),
                identifier: "entrez id".to_string(),
            })?;
        let url = format!("{}/annotation/NCBIGene:{entrez}", self.base_url);
        let body = ctx.engine.get(&ctx.config, &url, Some(entrez), &ctx.cancel, |body| {
            serde_json::from_str::<GeneAnnotationResponse>(body).is_ok()
        })?;
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
        let terms = payload
            .get("hpo_terms")
            .and_then(|v| v.as_array())
            .map(Vec::len)
            .unwrap_or(0);
        let diseases = payload
            .get("diseases")
            .and_then(|v| v.as_array())
            .map(Vec::len)
            .unwrap_or(0);
        terms + diseases > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const BODY: &str = r#"{
        "phenotypes": [
            {"id": "HP:0000107", "name": "Renal cyst"},
            {"id": "HP:0000822", "name": "Hypertension"}
        ],
        "diseases": [
            {"id": "OMIM:173900", "name": "Polycystic kidney disease 1"}
        ]
    }"#;

    #[rstest]
    fn test_parse_terms_and_diseases() {
        let driver = HpoDriver::default();
        let payload = driver.parse(BODY).unwrap();

        assert_eq!(payload["hpo_terms"].as_array().unwrap().len(), 2);
        assert_eq!(payload["diseases"].as_array().unwrap().len(), 1);
        assert_eq!(payload["hpo_terms"][0]["id"], "HP:0000107");
        assert!(driver.is_valid(&payload));
    }

    #[rstest]
    fn test_empty_annotation_invalid() {
        let driver = HpoDriver::default();
        let payload = driver.parse(r#"{"phenotypes": [], "diseases": []}"#).unwrap();
        assert!(!driver.is_valid(&payload));
    }
}
