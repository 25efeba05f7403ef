use crate::fetch::FetchError;
use crate::normalize::NormalizeError;
use crate::orchestrator::OrchestratorError;
use crate::progress::ProgressError;
use crate::sources::DriverError;
use crate::store::StoreError;
use thiserror::Error;

/// The error surface the API layer sees: every internal failure maps to
/// one of these codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("NotFound: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("RateLimited: {0}")]
    RateLimited(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid: {0}")]
    Invalid(String),
    #[error("Cancelled")]
    Cancelled,
    #[error("Internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::Conflict(_) => "Conflict",
            ApiError::RateLimited(_) => "RateLimited",
            ApiError::Unavailable(_) => "Unavailable",
            ApiError::Invalid(_) => "Invalid",
            ApiError::Cancelled => "Cancelled",
            ApiError::Internal(_) => "Internal",
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::GeneNotFound(what) => ApiError::NotFound(what),
            StoreError::Conflict(what) => ApiError::Conflict(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::RateLimited { .. } => ApiError::RateLimited(err.to_string()),
            FetchError::Exhausted { .. } | FetchError::Status { .. } | FetchError::Http(_) => {
                ApiError::Unavailable(err.to_string())
            }
            FetchError::InvalidPayload(reason) => ApiError::Invalid(reason),
            FetchError::Cancelled => ApiError::Cancelled,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DriverError> for ApiError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Fetch(fetch) => fetch.into(),
            DriverError::Store(store) => store.into(),
            DriverError::Cancelled => ApiError::Cancelled,
            DriverError::Parse { .. } | DriverError::MissingIdentifier { .. } => {
                ApiError::Invalid(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ProgressError> for ApiError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::UnknownSource(name) => ApiError::NotFound(name),
            ProgressError::InvalidTransition { .. } => ApiError::Invalid(err.to_string()),
            ProgressError::Store(store) => store.into(),
        }
    }
}

impl From<NormalizeError> for ApiError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::Fetch(fetch) => fetch.into(),
            NormalizeError::Store(store) => store.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::UnknownSource(name) => ApiError::NotFound(name),
            OrchestratorError::AlreadyRunning(name) => ApiError::Conflict(name),
            OrchestratorError::NotRunning(name) => ApiError::Invalid(format!(
                "source {name} is not in a state that allows this command"
            )),
            OrchestratorError::Driver(driver) => driver.into(),
            OrchestratorError::Progress(progress) => progress.into(),
            OrchestratorError::Store(store) => store.into(),
            OrchestratorError::Settings(settings) => ApiError::Invalid(settings.to_string()),
            OrchestratorError::NoDriver(name) => ApiError::Internal(format!("no driver for {name}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_code_mapping() {
        assert_eq!(
            ApiError::from(StoreError::Conflict("gene symbol PKD1".to_string())).code(),
            "Conflict"
        );
        assert_eq!(
            ApiError::from(FetchError::Exhausted {
                attempts: 4,
                last_error: "503".to_string()
            })
            .code(),
            "Unavailable"
        );
        assert_eq!(
            ApiError::from(OrchestratorError::UnknownSource("nope".to_string())).code(),
            "NotFound"
        );
        assert_eq!(ApiError::from(FetchError::Cancelled).code(), "Cancelled");
    }
}
