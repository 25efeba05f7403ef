use crate::normalize::GeneNormalizer;
use crate::scoring::ScoringEngine;
use crate::sources::clingen::ClingenDriver;
use crate::sources::clinvar::ClinvarDriver;
use crate::sources::gencc::GenccDriver;
use crate::sources::gnomad::GnomadDriver;
use crate::sources::gtex::GtexDriver;
use crate::sources::hpo::HpoDriver;
use crate::sources::internal::{EvidenceAggregationDriver, GeneNormalizationDriver};
use crate::sources::literature::LiteratureDriver;
use crate::sources::panelapp::PanelAppDriver;
use crate::sources::pubtator::PubtatorDriver;
use crate::sources::traits::SourceDriver;
use crate::sources::uniprot::UniprotDriver;
use crate::store::EvidenceStore;
use std::sync::Arc;

/// Shared services the internal drivers are constructed with. External
/// drivers reach everything they need through the per-run context.
pub struct DriverServices {
    pub store: Arc<EvidenceStore>,
    pub normalizer: Arc<GeneNormalizer>,
    pub scoring: Arc<ScoringEngine>,
}

pub struct DriverFactory;

impl DriverFactory {
    /// Maps a registry name to its driver. Adding a source means one
    /// config entry plus one arm here; the orchestrator never changes.
    pub fn build(name: &str, services: &DriverServices) -> Option<Box<dyn SourceDriver>> {
        match name {
            crate::sources::panelapp::NAME => Some(Box::new(PanelAppDriver::default())),
            crate::sources::hpo::NAME => Some(Box::new(HpoDriver::default())),
            crate::sources::pubtator::NAME => Some(Box::new(PubtatorDriver::default())),
            crate::sources::literature::NAME => Some(Box::new(LiteratureDriver::new())),
            crate::sources::clingen::NAME => Some(Box::new(ClingenDriver::new())),
            crate::sources::gencc::NAME => Some(Box::new(GenccDriver::new())),
            crate::sources::clinvar::NAME => Some(Box::new(ClinvarDriver::default())),
            crate::sources::gnomad::NAME => Some(Box::new(GnomadDriver::new())),
            crate::sources::gtex::NAME => Some(Box::new(GtexDriver::new())),
            crate::sources::uniprot::NAME => Some(Box::new(UniprotDriver::default())),
            crate::sources::internal::NORMALIZATION => Some(Box::new(
                GeneNormalizationDriver::new(
                    Arc::clone(&services.normalizer),
                    Arc::clone(&services.store),
                ),
            )),
            crate::sources::internal::AGGREGATION => Some(Box::new(
                EvidenceAggregationDriver::new(
                    Arc::clone(&services.store),
                    Arc::clone(&services.scoring),
                ),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::source_registry::SourceRegistry;
    use crate::scoring::ScoreBands;
    use crate::store::MergePolicy;
    use redb::Database;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    fn test_every_registry_entry_has_a_driver() {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("db.redb")).unwrap());
        let store = Arc::new(EvidenceStore::open(Arc::clone(&db), MergePolicy::default()).unwrap());
        let services = DriverServices {
            normalizer: Arc::new(GeneNormalizer::new(Arc::clone(&store), db).unwrap()),
            scoring: Arc::new(ScoringEngine::new(
                Arc::new(SourceRegistry::builtin()),
                ScoreBands::default(),
            )),
            store,
        };

        for name in SourceRegistry::builtin().names() {
            let driver = DriverFactory::build(name, &services);
            assert!(driver.is_some(), "no driver for registry entry {name}");
            assert_eq!(driver.unwrap().name(), name);
        }
    }

    #[rstest]
    fn test_unknown_name_builds_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("db.redb")).unwrap());
        let store = Arc::new(EvidenceStore::open(Arc::clone(&db), MergePolicy::default()).unwrap());
        let services = DriverServices {
            normalizer: Arc::new(GeneNormalizer::new(Arc::clone(&store), db).unwrap()),
            scoring: Arc::new(ScoringEngine::new(
                Arc::new(SourceRegistry::builtin()),
                ScoreBands::default(),
            )),
            store,
        };
        assert!(DriverFactory::build("scraped_panels", &services).is_none());
    }
}
