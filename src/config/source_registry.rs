use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};
use validator::Validate;

/// How a source is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SourceCategory {
    ExternalApi,
    BulkFile,
    ScrapedPanel,
    InternalProcess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    SupportsBulk,
    SupportsPerGene,
    ClassificationBased,
    CountBased,
}

/// Scoring track selection per source. Sources without a track contribute
/// annotations only and never count toward the aggregate denominator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "track", rename_all = "kebab-case")]
pub enum TrackConfig {
    /// Track A: count extracted from the payload, percentile-ranked within
    /// the source. `count_fields` are summed (array length or number).
    CountPercentile { count_fields: Vec<String> },
    /// Track B: the classification string maps directly to a weight.
    Classification,
    /// Track C: many classifications per gene, weighted then
    /// percentile-normalized.
    WeightedPercentile,
}

/// One row of the static source table. The registry is read once at process
/// start and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SourceConfig {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub display_name: String,
    pub category: SourceCategory,
    #[serde(default = "default_rate_limit")]
    #[validate(range(min = 1))]
    pub rate_limit_per_sec: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_cache_ttl_hours")]
    #[validate(range(min = 1))]
    pub cache_ttl_hours: u64,
    #[serde(default)]
    pub bulk_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub scoring_track: Option<TrackConfig>,
    #[serde(default)]
    pub retired: bool,
}

fn default_rate_limit() -> u64 {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_cache_ttl_hours() -> u64 {
    24
}

impl SourceConfig {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_hours * 3600)
    }
}

/// The source registry: every data source the pipeline knows about, keyed
/// by name. Built from the static config file (or the embedded default) at
/// startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub sources: BTreeMap<String, SourceConfig>,
}

impl SourceRegistry {
    pub fn get(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.values()
    }

    /// Sources that participate in scoring: configured, not retired, and
    /// carrying a track. This count is the aggregate-score denominator.
    pub fn total_active_sources(&self) -> usize {
        self.sources
            .values()
            .filter(|s| !s.retired && s.scoring_track.is_some())
            .count()
    }

    pub fn from_configs(configs: Vec<SourceConfig>) -> Self {
        SourceRegistry {
            sources: configs.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    /// Field-level validation of every entry, run once after the registry
    /// file is loaded.
    pub fn validate(&self) -> Result<(), validator::ValidationErrors> {
        for source in self.sources.values() {
            source.validate()?;
        }
        Ok(())
    }

    /// The roster shipped with the crate. A deployment can replace it with
    /// a config file of the same shape.
    pub fn builtin() -> Self {
        Self::from_configs(vec![
            SourceConfig {
                name: "panelapp".to_string(),
                display_name: "Genomics England PanelApp".to_string(),
                category: SourceCategory::ExternalApi,
                rate_limit_per_sec: 2,
                max_retries: 3,
                cache_ttl_hours: 24,
                bulk_url: Some("https://panelapp.genomicsengland.co.uk/api/v1/genes/".to_string()),
                api_key_env: None,
                capabilities: vec![Capability::SupportsPerGene, Capability::CountBased],
                scoring_track: Some(TrackConfig::CountPercentile {
                    count_fields: vec!["panels".to_string()],
                }),
                retired: false,
            },
            SourceConfig {
                name: "hpo".to_string(),
                display_name: "Human Phenotype Ontology".to_string(),
                category: SourceCategory::ExternalApi,
                rate_limit_per_sec: 4,
                max_retries: 3,
                cache_ttl_hours: 24,
                bulk_url: None,
                api_key_env: None,
                capabilities: vec![Capability::SupportsPerGene, Capability::CountBased],
                scoring_track: Some(TrackConfig::CountPercentile {
                    count_fields: vec!["hpo_terms".to_string(), "diseases".to_string()],
                }),
                retired: false,
            },
            SourceConfig {
                name: "pubtator".to_string(),
                display_name: "PubTator3".to_string(),
                category: SourceCategory::ExternalApi,
                rate_limit_per_sec: 3,
                max_retries: 3,
                cache_ttl_hours: 24,
                bulk_url: None,
                api_key_env: Some("NCBI_API_KEY".to_string()),
                capabilities: vec![Capability::SupportsPerGene, Capability::CountBased],
                scoring_track: Some(TrackConfig::CountPercentile {
                    count_fields: vec!["publications".to_string()],
                }),
                retired: false,
            },
            SourceConfig {
                name: "literature".to_string(),
                display_name: "Curated literature".to_string(),
                category: SourceCategory::BulkFile,
                rate_limit_per_sec: 1,
                max_retries: 2,
                cache_ttl_hours: 168,
                bulk_url: Some(
                    "https://raw.githubusercontent.com/halbritter-lab/kidney-genetics/main/analyses/B_AnnotationHGNC/results/literature_genes.csv"
                        .to_string(),
                ),
                api_key_env: None,
                capabilities: vec![Capability::SupportsBulk, Capability::CountBased],
                scoring_track: Some(TrackConfig::CountPercentile {
                    count_fields: vec!["publications".to_string()],
                }),
                retired: false,
            },
            SourceConfig {
                name: "clingen".to_string(),
                display_name: "ClinGen Gene-Disease Validity".to_string(),
                category: SourceCategory::BulkFile,
                rate_limit_per_sec: 1,
                max_retries: 3,
                cache_ttl_hours: 168,
                bulk_url: Some(
                    "https://search.clinicalgenome.org/kb/gene-validity/download".to_string(),
                ),
                api_key_env: None,
                capabilities: vec![Capability::SupportsBulk, Capability::ClassificationBased],
                scoring_track: Some(TrackConfig::Classification),
                retired: false,
            },
            SourceConfig {
                name: "gencc".to_string(),
                display_name: "Gene Curation Coalition".to_string(),
                category: SourceCategory::BulkFile,
                rate_limit_per_sec: 1,
                max_retries: 3,
                cache_ttl_hours: 168,
                bulk_url: Some(
                    "https://search.thegencc.org/download/action/submissions-export-tsv".to_string(),
                ),
                api_key_env: None,
                capabilities: vec![Capability::SupportsBulk, Capability::ClassificationBased],
                scoring_track: Some(TrackConfig::WeightedPercentile),
                retired: false,
            },
            SourceConfig {
                name: "clinvar".to_string(),
                display_name: "ClinVar".to_string(),
                category: SourceCategory::ExternalApi,
                rate_limit_per_sec: 3,
                max_retries: 3,
                cache_ttl_hours: 24,
                bulk_url: None,
                api_key_env: Some("NCBI_API_KEY".to_string()),
                capabilities: vec![Capability::SupportsPerGene],
                scoring_track: None,
                retired: false,
            },
            SourceConfig {
                name: "gnomad".to_string(),
                display_name: "gnomAD constraint".to_string(),
                category: SourceCategory::BulkFile,
                rate_limit_per_sec: 1,
                max_retries: 3,
                cache_ttl_hours: 720,
                bulk_url: Some(
                    "https://storage.googleapis.com/gcp-public-data--gnomad/release/v4.1/constraint/gnomad.v4.1.constraint_metrics.tsv"
                        .to_string(),
                ),
                api_key_env: None,
                capabilities: vec![Capability::SupportsBulk],
                scoring_track: None,
                retired: false,
            },
            SourceConfig {
                name: "gtex".to_string(),
                display_name: "GTEx median expression".to_string(),
                category: SourceCategory::BulkFile,
                rate_limit_per_sec: 1,
                max_retries: 3,
                cache_ttl_hours: 720,
                bulk_url: Some(
                    "https://storage.googleapis.com/adult-gtex/bulk-gex/v8/rna-seq/GTEx_Analysis_2017-06-05_v8_RNASeQCv1.1.9_gene_median_tpm.gct.gz"
                        .to_string(),
                ),
                api_key_env: None,
                capabilities: vec![Capability::SupportsBulk],
                scoring_track: None,
                retired: false,
            },
            SourceConfig {
                name: "uniprot".to_string(),
                display_name: "UniProtKB".to_string(),
                category: SourceCategory::ExternalApi,
                rate_limit_per_sec: 2,
                max_retries: 3,
                cache_ttl_hours: 168,
                bulk_url: None,
                api_key_env: None,
                capabilities: vec![Capability::SupportsPerGene],
                scoring_track: None,
                retired: false,
            },
            SourceConfig {
                name: "gene_normalization".to_string(),
                display_name: "Gene normalization".to_string(),
                category: SourceCategory::InternalProcess,
                rate_limit_per_sec: 1,
                max_retries: 1,
                cache_ttl_hours: crate::constants::HGNC_REFRESH_HOURS,
                bulk_url: Some(
                    "https://storage.googleapis.com/public-download-files/hgnc/json/json/hgnc_complete_set.json"
                        .to_string(),
                ),
                api_key_env: None,
                capabilities: vec![Capability::SupportsBulk],
                scoring_track: None,
                retired: false,
            },
            SourceConfig {
                name: "evidence_aggregation".to_string(),
                display_name: "Evidence aggregation".to_string(),
                category: SourceCategory::InternalProcess,
                rate_limit_per_sec: 1,
                max_retries: 1,
                cache_ttl_hours: 1,
                bulk_url: None,
                api_key_env: None,
                capabilities: vec![],
                scoring_track: None,
                retired: false,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_builtin_roster_shape() {
        let registry = SourceRegistry::builtin();
        assert!(registry.get("panelapp").is_some());
        assert!(registry.get("gene_normalization").is_some());
        assert_eq!(registry.total_active_sources(), 6);
    }

    #[rstest]
    fn test_retired_sources_leave_the_denominator() {
        let mut registry = SourceRegistry::builtin();
        registry.sources.get_mut("panelapp").unwrap().retired = true;
        assert_eq!(registry.total_active_sources(), 5);
    }

    #[rstest]
    fn test_builtin_roster_validates() {
        assert!(SourceRegistry::builtin().validate().is_ok());
    }

    #[rstest]
    fn test_zero_rate_limit_rejected() {
        let mut registry = SourceRegistry::builtin();
        registry.sources.get_mut("hpo").unwrap().rate_limit_per_sec = 0;
        assert!(registry.validate().is_err());
    }

    #[rstest]
    fn test_roundtrip_through_config_format() {
        let registry = SourceRegistry::builtin();
        let serialized = serde_json::to_string(&registry).unwrap();
        let parsed: SourceRegistry = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed, registry);
    }

    #[rstest]
    #[case("external-api", SourceCategory::ExternalApi)]
    #[case("bulk-file", SourceCategory::BulkFile)]
    #[case("internal-process", SourceCategory::InternalProcess)]
    fn test_category_string_forms(#[case] text: &str, #[case] expected: SourceCategory) {
        assert_eq!(text.parse::<SourceCategory>().unwrap(), expected);
        assert_eq!(expected.to_string(), text);
    }
}
