use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The canonical gene record, created by the normalizer when a symbol is
/// first resolved and never destroyed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gene {
    pub id: u64,
    /// HGNC identifier such as `HGNC:9008`. Nullable only while a record
    /// sits in normalization staging.
    pub hgnc_id: Option<String>,
    /// Approved symbol, always uppercase.
    pub symbol: String,
    pub name: Option<String>,
    /// Historical aliases and previous symbols, in the order HGNC lists them.
    pub aliases: Vec<String>,
    pub ensembl_id: Option<String>,
    pub entrez_id: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Gene {
    /// True when `query` matches this gene's HGNC id, approved symbol or one
    /// of its aliases, case-insensitively.
    pub fn matches(&self, query: &str) -> bool {
        let q = query.trim().to_uppercase();
        if self.symbol == q {
            return true;
        }
        if let Some(hgnc) = &self.hgnc_id
            && hgnc.to_uppercase() == q
        {
            return true;
        }
        self.aliases.iter().any(|a| a.to_uppercase() == q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pkd1() -> Gene {
        Gene {
            id: 1,
            hgnc_id: Some("HGNC:9008".to_string()),
            symbol: "PKD1".to_string(),
            name: Some("polycystin 1, transient receptor potential channel interacting".to_string()),
            aliases: vec!["PBP".to_string(), "Pc-1".to_string()],
            ensembl_id: Some("ENSG00000008710".to_string()),
            entrez_id: Some("5310".to_string()),
            location: Some("16p13.3".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[rstest]
    #[case("PKD1", true)]
    #[case("pkd1", true)]
    #[case("HGNC:9008", true)]
    #[case("hgnc:9008", true)]
    #[case("PBP", true)]
    #[case("pc-1", true)]
    #[case("PKD2", false)]
    fn test_matches(#[case] query: &str, #[case] expected: bool) {
        assert_eq!(pkd1().matches(query), expected);
    }
}
