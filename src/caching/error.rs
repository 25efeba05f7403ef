use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Could not read from cache: {reason}")]
    ReadError { reason: String },
    #[error("Could not write to cache: {reason}")]
    WriteError { reason: String },
    #[error("Cache database error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("Cache transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("Cache table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Cache storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Cache commit error: {0}")]
    Commit(#[from] redb::CommitError),
}
