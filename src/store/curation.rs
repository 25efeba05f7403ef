use crate::model::EvidenceRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived read-only view, one row per gene. Rebuilt by the store's own
/// write path on every evidence write; the score-derived fields are filled
/// in by the aggregation step at end-of-run. Application code never writes
/// this table directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurationRow {
    pub gene_id: u64,
    /// The strongest available classification, ClinGen preferred.
    pub classification: Option<String>,
    pub evidence_group: Option<String>,
    pub source_count: u64,
    pub last_evidence_at: Option<DateTime<Utc>>,
    pub percentage_score: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Recomputes the write-path fields from the gene's live evidence rows.
/// Score-derived fields are carried over unchanged.
pub fn rebuild(gene_id: u64, evidence: &[EvidenceRecord], previous: Option<CurationRow>) -> CurationRow {
    let live: Vec<&EvidenceRecord> = evidence.iter().filter(|e| !e.retired).collect();

    let classification = live
        .iter()
        .find(|e| e.source == "clingen")
        .and_then(|e| e.classification.clone())
        .or_else(|| live.iter().find_map(|e| e.classification.clone()));

    CurationRow {
        gene_id,
        classification,
        evidence_group: previous.as_ref().and_then(|p| p.evidence_group.clone()),
        source_count: live.len() as u64,
        last_evidence_at: live.iter().map(|e| e.last_updated).max(),
        percentage_score: previous.and_then(|p| p.percentage_score),
        updated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(source: &str, classification: Option<&str>, retired: bool) -> EvidenceRecord {
        EvidenceRecord {
            gene_id: 1,
            source: source.to_string(),
            payload: json!({}),
            classification: classification.map(str::to_string),
            first_seen: Utc::now(),
            last_updated: Utc::now(),
            version: 1,
            retired,
        }
    }

    #[test]
    fn test_clingen_classification_preferred() {
        let evidence = vec![
            record("gencc", Some("Strong"), false),
            record("clingen", Some("Definitive"), false),
        ];
        let row = rebuild(1, &evidence, None);
        assert_eq!(row.classification.as_deref(), Some("Definitive"));
        assert_eq!(row.source_count, 2);
    }

    #[test]
    fn test_retired_rows_excluded() {
        let evidence = vec![
            record("clingen", Some("Definitive"), true),
            record("panelapp", None, false),
        ];
        let row = rebuild(1, &evidence, None);
        assert_eq!(row.classification, None);
        assert_eq!(row.source_count, 1);
    }

    #[test]
    fn test_score_fields_carried_over() {
        let previous = CurationRow {
            gene_id: 1,
            classification: None,
            evidence_group: Some("well_supported".to_string()),
            source_count: 0,
            last_evidence_at: None,
            percentage_score: Some(62.5),
            updated_at: Utc::now(),
        };
        let row = rebuild(1, &[record("hpo", None, false)], Some(previous));
        assert_eq!(row.evidence_group.as_deref(), Some("well_supported"));
        assert_eq!(row.percentage_score, Some(62.5));
        assert_eq!(row.source_count, 1);
    }
}
