use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Upstream returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("Rate limited by upstream, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    #[error("Payload rejected as invalid: {0}")]
    InvalidPayload(String),
    #[error("I/O error during fetch: {0}")]
    Io(#[from] std::io::Error),
    #[error("Fetch cancelled")]
    Cancelled,
    #[error("No rate limiter registered for source {0}")]
    UnknownSource(String),
    #[error("Cache error during fetch: {0}")]
    Cache(#[from] crate::caching::CacheError),
}

impl FetchError {
    /// Transient errors are retried by the engine; permanent ones surface
    /// immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(_) => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::RateLimited { .. } => true,
            _ => false,
        }
    }
}
