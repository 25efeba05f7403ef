use crate::config::source_registry::{SourceRegistry, TrackConfig};
use crate::model::{EvidenceRecord, payload};
use crate::scoring::percentile::percent_rank;
use crate::scoring::tracks::{clingen_weight, gencc_raw_score};
use crate::store::evidence_store::EvidenceStore;
use crate::store::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use strum_macros::{Display, EnumString};

/// Tier band thresholds over the percentage score. Tuned from the current
/// data distribution; deployments may re-tune them through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBands {
    pub comprehensive: f64,
    pub multi_source: f64,
    pub established: f64,
    pub preliminary: f64,
}

impl Default for ScoreBands {
    fn default() -> Self {
        ScoreBands {
            comprehensive: 75.0,
            multi_source: 50.0,
            established: 30.0,
            preliminary: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvidenceTier {
    ComprehensiveSupport,
    MultiSourceSupport,
    EstablishedSupport,
    PreliminaryEvidence,
    MinimalEvidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvidenceGroup {
    WellSupported,
    Emerging,
}

impl ScoreBands {
    pub fn tier(&self, percentage: f64) -> EvidenceTier {
        if percentage >= self.comprehensive {
            EvidenceTier::ComprehensiveSupport
        } else if percentage >= self.multi_source {
            EvidenceTier::MultiSourceSupport
        } else if percentage >= self.established {
            EvidenceTier::EstablishedSupport
        } else if percentage >= self.preliminary {
            EvidenceTier::PreliminaryEvidence
        } else {
            EvidenceTier::MinimalEvidence
        }
    }

    pub fn group(&self, tier: EvidenceTier) -> EvidenceGroup {
        match tier {
            EvidenceTier::ComprehensiveSupport | EvidenceTier::MultiSourceSupport => {
                EvidenceGroup::WellSupported
            }
            _ => EvidenceGroup::Emerging,
        }
    }
}

/// One row of the scoring view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneScoreRow {
    pub gene_id: u64,
    pub symbol: String,
    pub raw_score: f64,
    /// `raw_score / total_active_sources · 100`, rounded to two decimals.
    pub percentage_score: f64,
    /// Per-source normalized scores, kept for explainability.
    pub source_scores: BTreeMap<String, f64>,
    pub evidence_count: usize,
    pub tier: EvidenceTier,
    pub group: EvidenceGroup,
}

/// Stateless scoring view over the evidence store: recomputed on each
/// read, refreshed into the curation table by the aggregation step.
pub struct ScoringEngine {
    registry: Arc<SourceRegistry>,
    bands: ScoreBands,
}

impl ScoringEngine {
    pub fn new(registry: Arc<SourceRegistry>, bands: ScoreBands) -> Self {
        ScoringEngine { registry, bands }
    }

    pub fn bands(&self) -> &ScoreBands {
        &self.bands
    }

    /// Normalized `[0, 1]` scores for every (gene, source) with evidence.
    fn normalized_scores(
        &self,
        evidence: &[EvidenceRecord],
    ) -> HashMap<String, HashMap<u64, f64>> {
        let mut by_source: HashMap<&str, Vec<&EvidenceRecord>> = HashMap::new();
        for record in evidence {
            by_source.entry(record.source.as_str()).or_default().push(record);
        }

        let mut scores: HashMap<String, HashMap<u64, f64>> = HashMap::new();
        for source in self.registry.iter().filter(|s| !s.retired) {
            let Some(track) = &source.scoring_track else {
                continue;
            };
            let Some(records) = by_source.get(source.name.as_str()) else {
                continue;
            };
            let normalized = match track {
                TrackConfig::CountPercentile { count_fields } => {
                    // Genes with zero counts contribute no score for the
                    // source.
                    let counts: Vec<(u64, f64)> = records
                        .iter()
                        .map(|r| {
                            let count: u64 = count_fields
                                .iter()
                                .map(|f| payload::count_at(&r.payload, f))
                                .sum();
                            (r.gene_id, count as f64)
                        })
                        .filter(|(_, count)| *count > 0.0)
                        .collect();
                    percent_rank(&counts)
                }
                TrackConfig::Classification => records
                    .iter()
                    .map(|r| {
                        let classification = r
                            .classification
                            .as_deref()
                            .or_else(|| payload::string_at(&r.payload, "classification"))
                            .unwrap_or("unknown");
                        (r.gene_id, clingen_weight(classification))
                    })
                    .collect(),
                TrackConfig::WeightedPercentile => {
                    let raw: Vec<(u64, f64)> = records
                        .iter()
                        .map(|r| {
                            let classifications: Vec<String> = r
                                .payload
                                .get("classifications")
                                .and_then(|v| v.as_array())
                                .map(|items| {
                                    items
                                        .iter()
                                        .filter_map(|v| v.as_str().map(str::to_string))
                                        .collect()
                                })
                                .unwrap_or_default();
                            (r.gene_id, gencc_raw_score(&classifications))
                        })
                        .collect();
                    percent_rank(&raw)
                }
            };
            scores.insert(source.name.clone(), normalized);
        }
        scores
    }

    /// Evaluates the whole scoring view: every gene in the store, sorted by
    /// percentage score descending, symbol ascending. The denominator is
    /// always the system-wide active-source count, never the number of
    /// sources a particular gene has evidence from.
    pub fn score_all(&self, store: &EvidenceStore) -> Result<Vec<GeneScoreRow>, StoreError> {
        let evidence = store.all_evidence()?;
        let per_source = self.normalized_scores(&evidence);
        let total_active = self.registry.total_active_sources().max(1) as f64;

        let mut evidence_counts: HashMap<u64, usize> = HashMap::new();
        for record in &evidence {
            *evidence_counts.entry(record.gene_id).or_default() += 1;
        }

        let mut rows = Vec::new();
        for gene in store.list_genes()? {
            let mut source_scores = BTreeMap::new();
            for (source, by_gene) in &per_source {
                if let Some(score) = by_gene.get(&gene.id) {
                    source_scores.insert(source.clone(), *score);
                }
            }
            let raw_score: f64 = source_scores.values().sum();
            let percentage_score = round2(raw_score / total_active * 100.0);
            let tier = self.bands.tier(percentage_score);
            rows.push(GeneScoreRow {
                gene_id: gene.id,
                symbol: gene.symbol,
                raw_score,
                percentage_score,
                source_scores,
                evidence_count: evidence_counts.get(&gene.id).copied().unwrap_or(0),
                tier,
                group: self.bands.group(tier),
            });
        }
        rows.sort_by(|a, b| {
            b.percentage_score
                .partial_cmp(&a.percentage_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        Ok(rows)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::source_registry::{Capability, SourceCategory, SourceConfig};
    use crate::store::evidence_store::NewGene;
    use crate::store::merge::MergePolicy;
    use redb::Database;
    use rstest::{fixture, rstest};
    use serde_json::json;
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temporary directory")
    }

    fn scoring_source(name: &str, track: TrackConfig) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            display_name: name.to_string(),
            category: SourceCategory::ExternalApi,
            rate_limit_per_sec: 1,
            max_retries: 1,
            cache_ttl_hours: 1,
            bulk_url: None,
            api_key_env: None,
            capabilities: vec![Capability::CountBased],
            scoring_track: Some(track),
            retired: false,
        }
    }

    /// Four scoring sources, so one source's evidence is worth at most 25%.
    fn four_source_registry() -> Arc<SourceRegistry> {
        Arc::new(SourceRegistry::from_configs(vec![
            scoring_source(
                "panelapp",
                TrackConfig::CountPercentile {
                    count_fields: vec!["panels".to_string()],
                },
            ),
            scoring_source(
                "hpo",
                TrackConfig::CountPercentile {
                    count_fields: vec!["hpo_terms".to_string(), "diseases".to_string()],
                },
            ),
            scoring_source("clingen", TrackConfig::Classification),
            scoring_source("gencc", TrackConfig::WeightedPercentile),
        ]))
    }

    fn open_store(temp_dir: &TempDir) -> EvidenceStore {
        let db = Database::create(temp_dir.path().join("store.redb")).unwrap();
        EvidenceStore::open(Arc::new(db), MergePolicy::default()).unwrap()
    }

    fn gene(store: &EvidenceStore, symbol: &str) -> u64 {
        store
            .insert_gene(NewGene {
                symbol: symbol.to_string(),
                ..NewGene::default()
            })
            .unwrap()
            .id
    }

    #[rstest]
    fn test_single_source_percentiles_and_percentages(temp_dir: TempDir) {
        let store = open_store(&temp_dir);
        let engine = ScoringEngine::new(four_source_registry(), ScoreBands::default());

        let pkd1 = gene(&store, "PKD1");
        let pkd2 = gene(&store, "PKD2");
        let umod = gene(&store, "UMOD");
        for (id, n) in [(pkd1, 3), (pkd2, 2), (umod, 1)] {
            let panels: Vec<String> = (0..n).map(|i| format!("panel-{i}")).collect();
            store
                .upsert_evidence(id, "panelapp", json!({"panels": panels}), None)
                .unwrap();
        }

        let rows = engine.score_all(&store).unwrap();
        let by_symbol: HashMap<&str, &GeneScoreRow> =
            rows.iter().map(|r| (r.symbol.as_str(), r)).collect();

        assert_eq!(by_symbol["PKD1"].source_scores["panelapp"], 1.0);
        assert_eq!(by_symbol["PKD2"].source_scores["panelapp"], 0.5);
        assert_eq!(by_symbol["UMOD"].source_scores["panelapp"], 0.0);

        assert_eq!(by_symbol["PKD1"].percentage_score, 25.00);
        assert_eq!(by_symbol["PKD2"].percentage_score, 12.50);
        assert_eq!(by_symbol["UMOD"].percentage_score, 0.00);
    }

    #[rstest]
    fn test_denominator_is_system_wide(temp_dir: TempDir) {
        let store = open_store(&temp_dir);
        let engine = ScoringEngine::new(four_source_registry(), ScoreBands::default());

        let pkd1 = gene(&store, "PKD1");
        store
            .upsert_evidence(pkd1, "clingen", json!({}), Some("Definitive".to_string()))
            .unwrap();

        let rows = engine.score_all(&store).unwrap();
        // Definitive is 1.0 normalized, but only one of four sources.
        assert_eq!(rows[0].percentage_score, 25.00);
    }

    #[rstest]
    fn test_gencc_weighted_then_percentile(temp_dir: TempDir) {
        let store = open_store(&temp_dir);
        let engine = ScoringEngine::new(four_source_registry(), ScoreBands::default());

        let a = gene(&store, "AAA");
        let b = gene(&store, "BBB");
        let c = gene(&store, "CCC");
        store
            .upsert_evidence(a, "gencc", json!({"classifications": ["Definitive", "Strong"]}), None)
            .unwrap();
        store
            .upsert_evidence(
                b,
                "gencc",
                json!({"classifications": ["Definitive", "Strong", "Supportive"]}),
                None,
            )
            .unwrap();
        store
            .upsert_evidence(c, "gencc", json!({"classifications": ["Limited"]}), None)
            .unwrap();

        let rows = engine.score_all(&store).unwrap();
        let by_symbol: HashMap<&str, &GeneScoreRow> =
            rows.iter().map(|r| (r.symbol.as_str(), r)).collect();

        assert_eq!(by_symbol["AAA"].source_scores["gencc"], 1.0);
        assert_eq!(by_symbol["BBB"].source_scores["gencc"], 0.5);
        assert_eq!(by_symbol["CCC"].source_scores["gencc"], 0.0);
    }

    #[rstest]
    fn test_zero_count_contributes_no_score(temp_dir: TempDir) {
        let store = open_store(&temp_dir);
        let engine = ScoringEngine::new(four_source_registry(), ScoreBands::default());

        let pkd1 = gene(&store, "PKD1");
        let empty = gene(&store, "EMPTY1");
        store
            .upsert_evidence(pkd1, "hpo", json!({"hpo_terms": ["HP:1"], "diseases": []}), None)
            .unwrap();
        store
            .upsert_evidence(empty, "hpo", json!({"hpo_terms": [], "diseases": []}), None)
            .unwrap();

        let rows = engine.score_all(&store).unwrap();
        let by_symbol: HashMap<&str, &GeneScoreRow> =
            rows.iter().map(|r| (r.symbol.as_str(), r)).collect();

        assert!(by_symbol["EMPTY1"].source_scores.get("hpo").is_none());
        // One gene with a nonzero count ranks 0.0 but is present.
        assert_eq!(by_symbol["PKD1"].source_scores["hpo"], 0.0);
    }

    #[rstest]
    #[case(80.0, EvidenceTier::ComprehensiveSupport, EvidenceGroup::WellSupported)]
    #[case(50.0, EvidenceTier::MultiSourceSupport, EvidenceGroup::WellSupported)]
    #[case(35.0, EvidenceTier::EstablishedSupport, EvidenceGroup::Emerging)]
    #[case(12.0, EvidenceTier::PreliminaryEvidence, EvidenceGroup::Emerging)]
    #[case(2.0, EvidenceTier::MinimalEvidence, EvidenceGroup::Emerging)]
    fn test_tier_bands(
        #[case] percentage: f64,
        #[case] tier: EvidenceTier,
        #[case] group: EvidenceGroup,
    ) {
        let bands = ScoreBands::default();
        assert_eq!(bands.tier(percentage), tier);
        assert_eq!(bands.group(tier), group);
    }

    #[rstest]
    fn test_bounded_by_source_share(temp_dir: TempDir) {
        let store = open_store(&temp_dir);
        let engine = ScoringEngine::new(four_source_registry(), ScoreBands::default());

        let pkd1 = gene(&store, "PKD1");
        store
            .upsert_evidence(pkd1, "panelapp", json!({"panels": ["a"]}), None)
            .unwrap();
        store
            .upsert_evidence(pkd1, "clingen", json!({}), Some("Definitive".to_string()))
            .unwrap();

        let rows = engine.score_all(&store).unwrap();
        // Evidence from two of four sources can never exceed 50%.
        assert!(rows[0].percentage_score <= 50.0);
    }
}
