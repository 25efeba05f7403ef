use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] crate::fetch::FetchError),
    #[error("Could not parse {source_name} payload: {reason}")]
    Parse { source_name: String, reason: String },
    #[error("Gene {symbol} missing required identifier: {identifier}")]
    MissingIdentifier { symbol: String, identifier: String },
    #[error("Source {0} has no bulk URL configured")]
    MissingBulkUrl(String),
    #[error("Bulk data not loaded for {0}; prepare was not run")]
    NotPrepared(String),
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("Normalization error: {0}")]
    Normalize(#[from] crate::normalize::NormalizeError),
    #[error("Progress error: {0}")]
    Progress(#[from] crate::progress::ProgressError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Driver cancelled")]
    Cancelled,
}

impl DriverError {
    pub fn parse(source: &str, reason: impl Into<String>) -> Self {
        DriverError::Parse {
            source_name: source.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DriverError::Cancelled)
            || matches!(self, DriverError::Fetch(crate::fetch::FetchError::Cancelled))
    }
}
