use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("HGNC index not loaded; run prepare first")]
    IndexNotReady,
    #[error("Gene normalization source has no bulk URL configured")]
    MissingBulkUrl,
    #[error("Could not parse HGNC bulk file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Could not read HGNC bulk file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Bulk download failed: {0}")]
    Fetch(#[from] crate::fetch::FetchError),
    #[error("Store error during normalization: {0}")]
    Store(#[from] crate::store::StoreError),
}
