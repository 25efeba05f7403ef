use crate::progress::state::SourceState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Illegal transition {from} -> {to} for source {source_name}")]
    InvalidTransition {
        source_name: String,
        from: SourceState,
        to: SourceState,
    },
    #[error("Unknown source {0}")]
    UnknownSource(String),
    #[error("Progress persistence error: {0}")]
    Store(#[from] crate::store::StoreError),
}
