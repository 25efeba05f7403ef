use crate::model::{Gene, Payload, PayloadKind};
use crate::sources::batch;
use crate::sources::context::DriverContext;
use crate::sources::error::DriverError;
use crate::sources::traits::{BatchReport, EvidenceSink, SourceDriver};
use serde::Deserialize;
use serde_json::json;

pub const NAME: &str = "panelapp";

#[derive(Debug, Deserialize)]
struct GeneSearchResponse {
    #[serde(default)]
    results: Vec<PanelMembership>,
}

#[derive(Debug, Deserialize)]
struct PanelMembership {
    panel: PanelInfo,
    #[serde(default)]
    confidence_level: Option<String>,
    #[serde(default)]
    mode_of_inheritance: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PanelInfo {
    id: u64,
    name: String,
    #[serde(default)]
    disease_group: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

/// Genomics England PanelApp: per-gene membership across diagnostic
/// panels. Scored by panel count (Track A).
pub struct PanelAppDriver {
    base_url: String,
}

impl PanelAppDriver {
    pub fn new(base_url: String) -> Self {
        PanelAppDriver { base_url }
    }

    fn parse(&self, body: &str) -> Result<Payload, DriverError> {
        let response: GeneSearchResponse =
            serde_json::from_str(body).map_err(|e| DriverError::parse(NAME, e.to_string()))?;
        let panels: Vec<Payload> = response
            .results
            .iter()
            .map(|m| {
                json!({
                    "id": m.panel.id,
                    "name": m.panel.name,
                    "disease_group": m.panel.disease_group,
                    "version": m.panel.version,
                    "confidence_level": m.confidence_level,
                    "mode_of_inheritance": m.mode_of_inheritance,
                })
            })
            .collect();
        Ok(json!({ "panels": panels }))
    }
}

impl Default for PanelAppDriver {
    fn default() -> Self {
        PanelAppDriver::new("https://panelapp.genomicsengland.co.uk/api/v1".to_string())
    }
}

impl SourceDriver for PanelAppDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::Evidence
    }

    fn fetch_one(&self, gene: &Gene, ctx: &DriverContext) -> Result<Payload, DriverError> {
        let url = format!("{}/genes/{}/?format=json", self.base_url, gene.symbol);
        let body = ctx.engine.get(
            &ctx.config,
            &url,
            Some(&gene.symbol),
            &ctx.cancel,
            |body| serde_json::from_str::<GeneSearchResponse>(body).is_ok(),
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
            .get("panels")
            .and_then(|p| p.as_array())
            .is_some_and(|panels| !panels.is_empty())
    }
}
