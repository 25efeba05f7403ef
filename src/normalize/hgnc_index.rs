use crate::normalize::error::NormalizeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// The subset of an HGNC document the normalizer needs. The bulk
/// `hgnc_complete_set.json` carries the same `responseHeader`/`response`
/// envelope as the REST service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HgncRecord {
    #[serde(default)]
    pub hgnc_id: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub alias_symbol: Vec<String>,
    #[serde(default)]
    pub prev_symbol: Vec<String>,
    #[serde(default)]
    pub ensembl_gene_id: Option<String>,
    #[serde(default)]
    pub entrez_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl HgncRecord {
    pub fn is_approved(&self) -> bool {
        self.status.as_deref() == Some("Approved")
    }
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    response: BulkDocs,
}

#[derive(Debug, Deserialize)]
struct BulkDocs {
    docs: Vec<HgncRecord>,
}

/// How a query resolved against the index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexHit {
    Match(usize),
    Ambiguous(Vec<usize>),
    Miss,
}

/// In-memory lookup structure over the HGNC bulk set. Built once at
/// prepare time; every per-gene lookup afterwards is pure map access.
#[derive(Debug, Default)]
pub struct HgncIndex {
    records: Vec<HgncRecord>,
    by_hgnc_id: HashMap<String, usize>,
    by_symbol: HashMap<String, usize>,
    by_ensembl: HashMap<String, usize>,
    by_entrez: HashMap<String, usize>,
    by_alias: HashMap<String, Vec<usize>>,
}

impl HgncIndex {
    pub fn from_file(path: &Path) -> Result<Self, NormalizeError> {
        let reader = BufReader::new(File::open(path)?);
        let bulk: BulkResponse = serde_json::from_reader(reader)?;
        Ok(Self::from_records(bulk.response.docs))
    }

    pub fn from_records(records: Vec<HgncRecord>) -> Self {
        let mut index = HgncIndex {
            records,
            ..HgncIndex::default()
        };
        for (i, record) in index.records.iter().enumerate() {
            if !record.is_approved() {
                continue;
            }
            if let Some(hgnc_id) = &record.hgnc_id {
                index.by_hgnc_id.insert(hgnc_id.to_uppercase(), i);
            }
            if let Some(symbol) = &record.symbol {
                index.by_symbol.insert(symbol.to_uppercase(), i);
            }
            if let Some(ensembl) = &record.ensembl_gene_id {
                index.by_ensembl.insert(ensembl.to_uppercase(), i);
            }
            if let Some(entrez) = &record.entrez_id {
                index.by_entrez.insert(entrez.clone(), i);
            }
            for alias in record.alias_symbol.iter().chain(record.prev_symbol.iter()) {
                index
                    .by_alias
                    .entry(alias.to_uppercase())
                    .or_default()
                    .push(i);
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, i: usize) -> &HgncRecord {
        &self.records[i]
    }

    /// Resolution order: exact HGNC id, exact approved symbol, exact
    /// Ensembl or Entrez mapping, then alias search. An ambiguous alias
    /// resolves only when a single approved candidate exists.
    pub fn resolve(&self, query: &str) -> IndexHit {
        let q = query.trim().to_uppercase();
        if q.is_empty() {
            return IndexHit::Miss;
        }
        if let Some(&i) = self.by_hgnc_id.get(&q) {
            return IndexHit::Match(i);
        }
        if let Some(&i) = self.by_symbol.get(&q) {
            return IndexHit::Match(i);
        }
        if let Some(&i) = self.by_ensembl.get(&q) {
            return IndexHit::Match(i);
        }
        if let Some(&i) = self.by_entrez.get(query.trim()) {
            return IndexHit::Match(i);
        }
        // Only approved records are indexed, so a single hit is the single
        // approved match.
        match self.by_alias.get(&q) {
            Some(hits) if hits.len() == 1 => IndexHit::Match(hits[0]),
            Some(hits) => IndexHit::Ambiguous(hits.clone()),
            None => IndexHit::Miss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    fn approved(
        hgnc_id: &str,
        symbol: &str,
        aliases: &[&str],
        ensembl: Option<&str>,
        entrez: Option<&str>,
    ) -> HgncRecord {
        HgncRecord {
            hgnc_id: Some(hgnc_id.to_string()),
            symbol: Some(symbol.to_string()),
            name: None,
            status: Some("Approved".to_string()),
            alias_symbol: aliases.iter().map(|s| s.to_string()).collect(),
            prev_symbol: vec![],
            ensembl_gene_id: ensembl.map(str::to_string),
            entrez_id: entrez.map(str::to_string),
            location: None,
        }
    }

    #[fixture]
    fn index() -> HgncIndex {
        HgncIndex::from_records(vec![
            approved(
                "HGNC:9008",
                "PKD1",
                &["PBP"],
                Some("ENSG00000008710"),
                Some("5310"),
            ),
            approved("HGNC:9009", "PKD2", &["TRPP2"], None, Some("5311")),
            approved("HGNC:12601", "UMOD", &["THP", "SHARED"], None, None),
            approved("HGNC:0001", "OTHER1", &["SHARED"], None, None),
        ])
    }

    #[rstest]
    #[case("HGNC:9008", "PKD1")]
    #[case("hgnc:9008", "PKD1")]
    #[case("PKD1", "PKD1")]
    #[case("pkd2", "PKD2")]
    #[case("ENSG00000008710", "PKD1")]
    #[case("5311", "PKD2")]
    #[case("TRPP2", "PKD2")]
    fn test_resolution_order(index: HgncIndex, #[case] query: &str, #[case] expected: &str) {
        match index.resolve(query) {
            IndexHit::Match(i) => assert_eq!(index.record(i).symbol.as_deref(), Some(expected)),
            other => panic!("Expected match for {query}, got {other:?}"),
        }
    }

    #[rstest]
    fn test_ambiguous_alias(index: HgncIndex) {
        assert!(matches!(index.resolve("SHARED"), IndexHit::Ambiguous(hits) if hits.len() == 2));
    }

    #[rstest]
    fn test_miss(index: HgncIndex) {
        assert_eq!(index.resolve("NOT_A_GENE"), IndexHit::Miss);
        assert_eq!(index.resolve(""), IndexHit::Miss);
    }

    #[rstest]
    fn test_unapproved_records_not_indexed() {
        let mut withdrawn = approved("HGNC:999", "GONE", &[], None, None);
        withdrawn.status = Some("Entry Withdrawn".to_string());
        let index = HgncIndex::from_records(vec![withdrawn]);
        assert_eq!(index.resolve("GONE"), IndexHit::Miss);
    }
}
