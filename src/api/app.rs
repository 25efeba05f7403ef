use crate::api::error::ApiError;
use crate::caching::{CacheLayer, CacheStats};
use crate::config::{ConfigLoader, Settings, SourceRegistry};
use crate::fetch::{BulkFetcher, FetchEngine};
use crate::model::{AnnotationRecord, EvidenceRecord, Gene};
use crate::normalize::GeneNormalizer;
use crate::orchestrator::Orchestrator;
use crate::progress::{EventBus, ProgressTracker, SourceProgress, Subscription};
use crate::scoring::{EvidenceTier, GeneScoreRow, ScoreBands, ScoringEngine};
use crate::sources::DriverServices;
use crate::store::{EvidenceStore, MergePolicy, RunHandle, snapshot};
use log::info;
use redb::Database;
use serde::Serialize;
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Everything known about one gene, as served to the API layer.
#[derive(Debug, Serialize)]
pub struct GeneDetail {
    pub gene: Gene,
    pub evidence: Vec<EvidenceRecord>,
    pub annotations: Vec<AnnotationRecord>,
    pub score: Option<GeneScoreRow>,
}

#[derive(Debug, Clone, Default)]
pub struct GeneFilter {
    pub symbol_contains: Option<String>,
    pub min_percentage: Option<f64>,
    pub tier: Option<EvidenceTier>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            offset: 0,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    ScoreDesc,
    Symbol,
    EvidenceCountDesc,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Composition root. Owns construction and teardown of every service;
/// initialization is sequential, teardown releases the sweeper thread and
/// flushes progress. No module-global state anywhere.
pub struct App {
    pub settings: Arc<Settings>,
    pub registry: Arc<SourceRegistry>,
    cache: Arc<CacheLayer>,
    store: Arc<EvidenceStore>,
    scoring: Arc<ScoringEngine>,
    tracker: Arc<ProgressTracker>,
    orchestrator: Arc<Orchestrator>,
    sweeper: Option<JoinHandle<()>>,
}

impl App {
    pub fn bootstrap(settings: Settings) -> Result<App, ApiError> {
        let registry = Arc::new(match &settings.registry_path {
            Some(path) => ConfigLoader::load(path.clone())
                .map_err(|err| ApiError::Invalid(format!("source registry: {err}")))?,
            None => SourceRegistry::builtin(),
        });
        registry
            .validate()
            .map_err(|err| ApiError::Invalid(format!("source registry: {err}")))?;
        settings
            .validate(&registry)
            .map_err(|err| ApiError::Invalid(err.to_string()))?;
        let settings = Arc::new(settings);

        let db = Arc::new(
            Database::create(&settings.database_path)
                .map_err(|err| ApiError::Internal(err.to_string()))?,
        );
        let store = Arc::new(EvidenceStore::open(
            Arc::clone(&db),
            MergePolicy::default(),
        )?);
        let cache = Arc::new(
            CacheLayer::new(Arc::clone(&db), settings.l1_cache_capacity)
                .map_err(|err| ApiError::Internal(err.to_string()))?,
        );
        let sweeper = cache.spawn_sweeper();

        let engine = Arc::new(FetchEngine::new(&registry, Arc::clone(&cache)));
        let bulk = Arc::new(
            BulkFetcher::new(settings.bulk_cache_dir.clone())
                .map_err(|err| ApiError::Internal(err.to_string()))?,
        );
        let normalizer = Arc::new(GeneNormalizer::new(Arc::clone(&store), Arc::clone(&db))?);
        let scoring = Arc::new(ScoringEngine::new(
            Arc::clone(&registry),
            ScoreBands::default(),
        ));
        let bus = Arc::new(EventBus::default());
        let tracker = Arc::new(ProgressTracker::new(Arc::clone(&db), Arc::clone(&bus))?);

        let services = Arc::new(DriverServices {
            store: Arc::clone(&store),
            normalizer: Arc::clone(&normalizer),
            scoring: Arc::clone(&scoring),
        });
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&settings),
            engine,
            bulk,
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&tracker),
            services,
        )?);

        info!(
            "Bootstrapped with {} sources ({} scored)",
            registry.sources.len(),
            registry.total_active_sources()
        );
        Ok(App {
            settings,
            registry,
            cache,
            store,
            scoring,
            tracker,
            orchestrator,
            sweeper: Some(sweeper),
        })
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    pub fn trigger(&self, source: &str) -> Result<RunHandle, ApiError> {
        Ok(self.orchestrator.trigger(source)?)
    }

    pub fn trigger_all(&self) -> Result<RunHandle, ApiError> {
        Ok(self.orchestrator.trigger_all()?)
    }

    pub fn pause(&self, source: &str) -> Result<(), ApiError> {
        Ok(self.orchestrator.pause(source)?)
    }

    pub fn resume(&self, source: &str) -> Result<(), ApiError> {
        Ok(self.orchestrator.resume(source)?)
    }

    pub fn cancel(&self, source: &str) -> Result<(), ApiError> {
        Ok(self.orchestrator.cancel(source)?)
    }

    pub fn status(&self) -> Vec<SourceProgress> {
        self.orchestrator.status()
    }

    pub fn subscribe(&self, id: &str) -> Subscription {
        self.orchestrator.subscribe(id)
    }

    // ------------------------------------------------------------------
    // Data surface
    // ------------------------------------------------------------------

    pub fn get_gene(&self, symbol_or_id: &str) -> Result<Option<GeneDetail>, ApiError> {
        let Some(gene) = self.store.find_gene(symbol_or_id)? else {
            return Ok(None);
        };
        let evidence = self.store.load_evidence_for(gene.id)?;
        let annotations = self.store.load_annotations_for(gene.id)?;
        let score = self
            .scoring
            .score_all(&self.store)?
            .into_iter()
            .find(|row| row.gene_id == gene.id);
        Ok(Some(GeneDetail {
            gene,
            evidence,
            annotations,
            score,
        }))
    }

    /// Reads the scoring view with filter, sort and pagination.
    pub fn list_genes(
        &self,
        filter: &GeneFilter,
        pagination: Pagination,
        sort: SortBy,
    ) -> Result<Page<GeneScoreRow>, ApiError> {
        let mut rows = self.scoring.score_all(&self.store)?;

        if let Some(fragment) = &filter.symbol_contains {
            let fragment = fragment.to_uppercase();
            rows.retain(|row| row.symbol.contains(&fragment));
        }
        if let Some(min) = filter.min_percentage {
            rows.retain(|row| row.percentage_score >= min);
        }
        if let Some(tier) = filter.tier {
            rows.retain(|row| row.tier == tier);
        }

        match sort {
            SortBy::ScoreDesc => {} // score_all already sorts this way
            SortBy::Symbol => rows.sort_by(|a, b| a.symbol.cmp(&b.symbol)),
            SortBy::EvidenceCountDesc => rows.sort_by(|a, b| {
                b.evidence_count
                    .cmp(&a.evidence_count)
                    .then_with(|| a.symbol.cmp(&b.symbol))
            }),
        }

        let total = rows.len();
        let items: Vec<GeneScoreRow> = rows
            .into_iter()
            .skip(pagination.offset)
            .take(pagination.limit)
            .collect();
        Ok(Page {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    pub fn export_snapshot(&self, out: &mut dyn Write) -> Result<(), ApiError> {
        Ok(snapshot::export(&self.store, out)?)
    }

    pub fn import_snapshot(&self, input: &mut dyn Read) -> Result<usize, ApiError> {
        Ok(snapshot::import(&self.store, input)?)
    }

    pub fn cache_stats(&self, namespace: Option<&str>) -> Result<CacheStats, ApiError> {
        self.cache
            .stats(namespace)
            .map_err(|err| ApiError::Internal(err.to_string()))
    }

    pub fn cache_namespaces(&self) -> Result<Vec<String>, ApiError> {
        Ok(self
            .cache
            .list_namespaces()
            .map_err(|err| ApiError::Internal(err.to_string()))?
            .into_iter()
            .collect())
    }

    /// Deterministic teardown: stops the sweeper and flushes progress.
    pub fn shutdown(mut self) {
        self.cache.stop_sweeper();
        if let Some(handle) = self.sweeper.take() {
            let _ = handle.join();
        }
        if let Err(err) = self.tracker.flush() {
            log::warn!("Progress flush on shutdown failed: {err}");
        }
        info!("Shut down cleanly");
    }
}
