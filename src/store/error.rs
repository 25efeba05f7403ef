use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Gene not found: {0}")]
    GeneNotFound(String),
    #[error("Duplicate unique key: {0}")]
    Conflict(String),
    #[error("Optimistic write gave up after {attempts} attempts for {key}")]
    StaleWrite { key: String, attempts: u32 },
    #[error("Store database error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("Store transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("Store table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Store storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Store commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
