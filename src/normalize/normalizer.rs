use crate::fetch::BulkFetcher;
use crate::config::source_registry::SourceConfig;
use crate::model::Gene;
use crate::normalize::error::NormalizeError;
use crate::normalize::hgnc_index::{HgncIndex, HgncRecord, IndexHit};
use crate::orchestrator::cancellation::CancellationToken;
use crate::store::evidence_store::{EvidenceStore, NewGene};
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::RwLock;
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const LOG_TABLE: TableDefinition<u64, NormalizationLogRow> =
    TableDefinition::new("gene_normalization_log");

/// Audit row written when a query cannot be resolved unambiguously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationLogRow {
    pub id: u64,
    pub query: String,
    pub candidates: Vec<String>,
    pub message: String,
    pub created_at: chrono::DateTime<Utc>,
}

crate::json_table_value!(NormalizationLogRow);

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Gene),
    Unresolved { query: String, candidates: Vec<String> },
}

/// Resolves arbitrary gene identifiers (symbol, alias, HGNC, Ensembl,
/// Entrez) to canonical gene records, creating them on first use. The HGNC
/// bulk set is the authoritative source; lookups never touch the network.
pub struct GeneNormalizer {
    store: Arc<EvidenceStore>,
    db: Arc<redb::Database>,
    index: RwLock<Option<HgncIndex>>,
}

impl GeneNormalizer {
    pub fn new(store: Arc<EvidenceStore>, db: Arc<redb::Database>) -> Result<Self, NormalizeError> {
        let write_txn = db.begin_write().map_err(crate::store::StoreError::from)?;
        {
            write_txn
                .open_table(LOG_TABLE)
                .map_err(crate::store::StoreError::from)?;
        }
        write_txn.commit().map_err(crate::store::StoreError::from)?;
        Ok(GeneNormalizer {
            store,
            db,
            index: RwLock::new(None),
        })
    }

    /// Downloads (or reuses) the weekly HGNC bulk file and builds the
    /// in-memory index. Idempotent: a second call rebuilds the same index
    /// from the cached file.
    pub fn prepare(
        &self,
        bulk: &BulkFetcher,
        source: &SourceConfig,
        token: &CancellationToken,
    ) -> Result<usize, NormalizeError> {
        let url = source
            .bulk_url
            .as_deref()
            .ok_or(NormalizeError::MissingBulkUrl)?;
        let path = bulk.download(source, url, source.cache_ttl_hours, token)?;
        let index = HgncIndex::from_file(&path)?;
        let loaded = index.len();
        info!("HGNC index loaded: {loaded} records");
        *self.index.write() = Some(index);
        Ok(loaded)
    }

    pub fn is_ready(&self) -> bool {
        self.index.read().is_some()
    }

    /// Installs a pre-built index. Used by tests and by deployments that
    /// ship a pinned HGNC snapshot.
    pub fn install_index(&self, index: HgncIndex) {
        *self.index.write() = Some(index);
    }

    pub fn resolve(&self, query: &str) -> Result<Resolution, NormalizeError> {
        let guard = self.index.read();
        let index = guard.as_ref().ok_or(NormalizeError::IndexNotReady)?;

        match index.resolve(query) {
            IndexHit::Match(i) => {
                let record = index.record(i).clone();
                drop(guard);
                Ok(Resolution::Resolved(self.get_or_create(&record)?))
            }
            IndexHit::Ambiguous(hits) => {
                let candidates: Vec<String> = hits
                    .iter()
                    .filter_map(|&i| index.record(i).symbol.clone())
                    .collect();
                drop(guard);
                warn!("Ambiguous gene query {query}: {candidates:?}");
                self.log_unresolved(query, &candidates, "ambiguous alias")?;
                Ok(Resolution::Unresolved {
                    query: query.to_string(),
                    candidates,
                })
            }
            IndexHit::Miss => {
                drop(guard);
                debug!("Gene query {query} not found in HGNC");
                self.log_unresolved(query, &[], "no HGNC match")?;
                Ok(Resolution::Unresolved {
                    query: query.to_string(),
                    candidates: vec![],
                })
            }
        }
    }

    fn get_or_create(&self, record: &HgncRecord) -> Result<Gene, NormalizeError> {
        let symbol = record
            .symbol
            .as_deref()
            .unwrap_or_default()
            .to_uppercase();
        if let Some(existing) = self.store.find_gene(&symbol)? {
            return Ok(existing);
        }

        let aliases: Vec<String> = record
            .alias_symbol
            .iter()
            .chain(record.prev_symbol.iter())
            .cloned()
            .collect();
        let gene = self.store.insert_gene(NewGene {
            hgnc_id: record.hgnc_id.clone(),
            symbol,
            name: record.name.clone(),
            aliases,
            ensembl_id: record.ensembl_gene_id.clone(),
            entrez_id: record.entrez_id.clone(),
            location: record.location.clone(),
        })?;
        Ok(gene)
    }

    fn log_unresolved(
        &self,
        query: &str,
        candidates: &[String],
        message: &str,
    ) -> Result<(), NormalizeError> {
        use crate::store::StoreError;
        let write_txn = self.db.begin_write().map_err(StoreError::from)?;
        {
            let mut table = write_txn.open_table(LOG_TABLE).map_err(StoreError::from)?;
            let id = table
                .last()
                .map_err(StoreError::from)?
                .map(|(k, _)| k.value())
                .unwrap_or(0)
                + 1;
            let row = NormalizationLogRow {
                id,
                query: query.to_string(),
                candidates: candidates.to_vec(),
                message: message.to_string(),
                created_at: Utc::now(),
            };
            table.insert(id, row).map_err(StoreError::from)?;
        }
        write_txn.commit().map_err(StoreError::from)?;
        Ok(())
    }

    /// Unresolved-query audit trail, newest last.
    pub fn normalization_log(&self) -> Result<Vec<NormalizationLogRow>, NormalizeError> {
        use crate::store::StoreError;
        use redb::ReadableDatabase;
        let read_txn = self.db.begin_read().map_err(StoreError::from)?;
        let table = read_txn.open_table(LOG_TABLE).map_err(StoreError::from)?;
        let mut rows = Vec::new();
        for entry in table.iter().map_err(StoreError::from)? {
            let (_, row) = entry.map_err(StoreError::from)?;
            rows.push(row.value());
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::hgnc_index::HgncRecord;
    use crate::store::merge::MergePolicy;
    use redb::Database;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temporary directory")
    }

    fn record(hgnc_id: &str, symbol: &str, aliases: &[&str]) -> HgncRecord {
        HgncRecord {
            hgnc_id: Some(hgnc_id.to_string()),
            symbol: Some(symbol.to_string()),
            status: Some("Approved".to_string()),
            alias_symbol: aliases.iter().map(|s| s.to_string()).collect(),
            ..HgncRecord::default()
        }
    }

    fn normalizer(temp_dir: &TempDir) -> GeneNormalizer {
        let db = Arc::new(Database::create(temp_dir.path().join("db.redb")).unwrap());
        let store = Arc::new(EvidenceStore::open(Arc::clone(&db), MergePolicy::default()).unwrap());
        let normalizer = GeneNormalizer::new(store, db).unwrap();
        normalizer.install_index(HgncIndex::from_records(vec![
            record("HGNC:9008", "PKD1", &["PBP"]),
            record("HGNC:12601", "UMOD", &["SHARED"]),
            record("HGNC:0001", "OTHER1", &["SHARED"]),
        ]));
        normalizer
    }

    #[rstest]
    fn test_resolve_creates_gene_once(temp_dir: TempDir) {
        let normalizer = normalizer(&temp_dir);

        let first = match normalizer.resolve("PKD1").unwrap() {
            Resolution::Resolved(gene) => gene,
            other => panic!("Expected resolution, got {other:?}"),
        };
        // Resolving an alias of the same gene reuses the record.
        let second = match normalizer.resolve("PBP").unwrap() {
            Resolution::Resolved(gene) => gene,
            other => panic!("Expected resolution, got {other:?}"),
        };

        assert_eq!(first.id, second.id);
        assert_eq!(first.hgnc_id.as_deref(), Some("HGNC:9008"));
    }

    #[rstest]
    fn test_ambiguous_alias_logged(temp_dir: TempDir) {
        let normalizer = normalizer(&temp_dir);

        match normalizer.resolve("SHARED").unwrap() {
            Resolution::Unresolved { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("Expected unresolved, got {other:?}"),
        }

        let log = normalizer.normalization_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].query, "SHARED");
        assert_eq!(log[0].message, "ambiguous alias");
    }

    #[rstest]
    fn test_unready_index_is_an_error(temp_dir: TempDir) {
        let db = Arc::new(Database::create(temp_dir.path().join("db.redb")).unwrap());
        let store = Arc::new(EvidenceStore::open(Arc::clone(&db), MergePolicy::default()).unwrap());
        let normalizer = GeneNormalizer::new(store, db).unwrap();
        assert!(matches!(
            normalizer.resolve("PKD1"),
            Err(NormalizeError::IndexNotReady)
        ));
    }
}
