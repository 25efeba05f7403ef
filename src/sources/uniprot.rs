use crate::model::{Gene, Payload, PayloadKind, payload};
use crate::sources::batch;
use crate::sources::context::DriverContext;
use crate::sources::error::DriverError;
use crate::sources::traits::{BatchReport, EvidenceSink, SourceDriver};
use serde_json::{Value, json};

pub const NAME: &str = "uniprot";

/// UniProtKB reviewed human entries: protein naming, function text and
/// keywords. Annotation only, never scored.
pub struct UniprotDriver {
    base_url: String,
}

impl UniprotDriver {
    pub fn new(base_url: String) -> Self {
        UniprotDriver { base_url }
    }

    fn parse(&self, body: &str) -> Result<Payload, DriverError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| DriverError::parse(NAME, e.to_string()))?;
        let Some(entry) = value.get("results").and_then(|r| r.as_array()).and_then(|r| r.first())
        else {
            return Ok(Value::Null);
        };

        let accession = payload::string_at(entry, "primaryAccession");
        let protein_name = payload::string_at(
            entry,
            "proteinDescription.recommendedName.fullName.value",
        );
        let function = entry
            .get("comments")
            .and_then(|c| c.as_array())
            .and_then(|comments| {
                comments
                    .iter()
                    .find(|c| payload::string_at(c, "commentType") == Some("FUNCTION"))
            })
            .and_then(|c| c.get("texts"))
            .and_then(|t| t.as_array())
            .and_then(|t| t.first())
            .and_then(|t| payload::string_at(t, "value"));
        let keywords: Vec<&str> = entry
            .get("keywords")
            .and_then(|k| k.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|k| payload::string_at(k, "name"))
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "accession": accession,
            "protein_name": protein_name,
            "function": function,
            "keywords": keywords,
        }))
    }
}

impl Default for UniprotDriver {
    fn default() -> Self {
        UniprotDriver::new("https://rest.uniprot.org".to_string())
    }
}

impl SourceDriver for UniprotDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::Annotation
    }

    fn fetch_one(&self, gene: &Gene, ctx: &DriverContext) -> Result<Payload, DriverError> {
        let url = format!(
            "{}/uniprotkb/search?query=gene_exact:{}+AND+organism_id:9606+AND+reviewed:true&format=json&size=1",
            self.base_url, gene.symbol
        );
        let body = ctx.engine.get(
            &ctx.config,
            &url,
            Some(&gene.symbol),
            &ctx.cancel,
            |body| serde_json::from_str::<Value>(body).is_ok(),
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
            .get("accession")
            .is_some_and(|a| a.as_str().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const BODY: &str = r#"{
        "results": [{
            "primaryAccession": "P98161",
            "proteinDescription": {
                "recommendedName": {"fullName": {"value": "Polycystin-1"}}
            },
            "keywords": [
                {"name": "Disease variant"},
                {"name": "Polycystic kidney disease"}
            ],
            "comments": [
                {"commentType": "SIMILARITY", "texts": [{"value": "unrelated"}]},
                {"commentType": "FUNCTION", "texts": [{"value": "Involved in renal tubulogenesis."}]}
            ]
        }]
    }"#;

    #[rstest]
    fn test_parse_entry() {
        let driver = UniprotDriver::default();
        let payload = driver.parse(BODY).unwrap();

        assert_eq!(payload["accession"], "P98161");
        assert_eq!(payload["protein_name"], "Polycystin-1");
        assert_eq!(payload["function"], "Involved in renal tubulogenesis.");
        assert_eq!(
            payload["keywords"],
            json!(["Disease variant", "Polycystic kidney disease"])
        );
        assert!(driver.is_valid(&payload));
    }

    #[rstest]
    fn test_no_results_invalid() {
        let driver = UniprotDriver::default();
        let payload = driver.parse(r#"{"results": []}"#).unwrap();
        assert!(!driver.is_valid(&payload));
    }
}
