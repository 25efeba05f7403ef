use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown source {0}")]
    UnknownSource(String),
    #[error("Source {0} is already queued or running")]
    AlreadyRunning(String),
    #[error("Source {0} is not in a state that allows this command")]
    NotRunning(String),
    #[error("No driver registered for source {0}")]
    NoDriver(String),
    #[error("Driver error: {0}")]
    Driver(#[from] crate::sources::DriverError),
    #[error("Progress error: {0}")]
    Progress(#[from] crate::progress::ProgressError),
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("Settings error: {0}")]
    Settings(#[from] crate::config::SettingsError),
}
