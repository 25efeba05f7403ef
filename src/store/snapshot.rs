use crate::model::Payload;
use crate::store::error::StoreError;
use crate::store::evidence_store::{EvidenceStore, NewGene};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Stable on-disk snapshot: approved symbol, then source, both in
/// lexicographic order. Floats keep serde_json's full round-trip
/// precision. Consumed by backups and the parity test harness.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub genes: BTreeMap<String, SnapshotGene>,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SnapshotGene {
    #[serde(default)]
    pub evidence: BTreeMap<String, SnapshotEvidence>,
    #[serde(default)]
    pub annotations: BTreeMap<String, Payload>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SnapshotEvidence {
    pub payload: Payload,
    #[serde(default)]
    pub classification: Option<String>,
}

pub fn build(store: &EvidenceStore) -> Result<Snapshot, StoreError> {
    let mut snapshot = Snapshot::default();
    for gene in store.list_genes()? {
        let mut entry = SnapshotGene::default();
        for record in store.load_evidence_for(gene.id)? {
            entry.evidence.insert(
                record.source.clone(),
                SnapshotEvidence {
                    payload: record.payload,
                    classification: record.classification,
                },
            );
        }
        for record in store.load_annotations_for(gene.id)? {
            entry.annotations.insert(record.source.clone(), record.payload);
        }
        if !entry.evidence.is_empty() || !entry.annotations.is_empty() {
            snapshot.genes.insert(gene.symbol.clone(), entry);
        }
    }
    Ok(snapshot)
}

pub fn export(store: &EvidenceStore, out: &mut dyn Write) -> Result<(), StoreError> {
    let snapshot = build(store)?;
    serde_json::to_writer_pretty(&mut *out, &snapshot)?;
    out.write_all(b"\n")?;
    info!("Exported snapshot of {} genes", snapshot.genes.len());
    Ok(())
}

/// Replays a snapshot through the regular upsert paths. Unknown symbols
/// are created as staging genes (no HGNC id) so evidence is never dropped.
pub fn import(store: &EvidenceStore, input: &mut dyn Read) -> Result<usize, StoreError> {
    let snapshot: Snapshot = serde_json::from_reader(input)?;
    let mut imported = 0usize;
    for (symbol, entry) in snapshot.genes {
        let gene = match store.find_gene(&symbol)? {
            Some(gene) => gene,
            None => {
                warn!("Snapshot symbol {symbol} unknown, creating staging gene");
                store.insert_gene(NewGene {
                    symbol: symbol.clone(),
                    ..NewGene::default()
                })?
            }
        };
        for (source, evidence) in entry.evidence {
            store.upsert_evidence(gene.id, &source, evidence.payload, evidence.classification)?;
            imported += 1;
        }
        for (source, payload) in entry.annotations {
            store.upsert_annotation(gene.id, &source, payload)?;
            imported += 1;
        }
    }
    info!("Imported {imported} snapshot records");
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::merge::MergePolicy;
    use pretty_assertions::assert_eq;
    use redb::Database;
    use rstest::{fixture, rstest};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temporary directory")
    }

    fn open_store(temp_dir: &TempDir, name: &str) -> EvidenceStore {
        let db = Database::create(temp_dir.path().join(name)).unwrap();
        EvidenceStore::open(Arc::new(db), MergePolicy::default()).unwrap()
    }

    fn seed(store: &EvidenceStore) {
        let pkd1 = store
            .insert_gene(NewGene {
                symbol: "PKD1".to_string(),
                hgnc_id: Some("HGNC:9008".to_string()),
                ..NewGene::default()
            })
            .unwrap();
        let umod = store
            .insert_gene(NewGene {
                symbol: "UMOD".to_string(),
                ..NewGene::default()
            })
            .unwrap();
        store
            .upsert_evidence(pkd1.id, "panelapp", json!({"panels": ["A"], "score": 0.5}), None)
            .unwrap();
        store
            .upsert_evidence(pkd1.id, "clingen", json!({"disease": "PKD"}), Some("Definitive".to_string()))
            .unwrap();
        store
            .upsert_annotation(umod.id, "gnomad", json!({"pLI": 0.123456789012345}))
            .unwrap();
    }

    #[rstest]
    fn test_export_is_sorted_and_complete(temp_dir: TempDir) {
        let store = open_store(&temp_dir, "a.redb");
        seed(&store);

        let mut buffer = Vec::new();
        export(&store, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        let pkd1_at = text.find("PKD1").unwrap();
        let umod_at = text.find("UMOD").unwrap();
        assert!(pkd1_at < umod_at);
        // Full float precision survives serialization.
        assert!(text.contains("0.123456789012345"));
    }

    #[rstest]
    fn test_roundtrip_into_fresh_store(temp_dir: TempDir) {
        let store = open_store(&temp_dir, "a.redb");
        seed(&store);
        let original = build(&store).unwrap();

        let mut buffer = Vec::new();
        export(&store, &mut buffer).unwrap();

        let target = open_store(&temp_dir, "b.redb");
        let imported = import(&target, &mut buffer.as_slice()).unwrap();
        assert_eq!(imported, 3);

        assert_eq!(build(&target).unwrap(), original);
    }

    #[rstest]
    fn test_reimport_into_same_store_is_stable(temp_dir: TempDir) {
        let store = open_store(&temp_dir, "a.redb");
        seed(&store);
        let before = build(&store).unwrap();

        let mut buffer = Vec::new();
        export(&store, &mut buffer).unwrap();
        import(&store, &mut buffer.as_slice()).unwrap();

        // Merging a snapshot with itself changes nothing.
        assert_eq!(build(&store).unwrap(), before);
    }
}
