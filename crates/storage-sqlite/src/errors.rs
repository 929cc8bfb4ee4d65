//! Error types for the SQLite stores.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Database connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Invalid stored timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The writer thread is gone.
    #[error("Database writer closed")]
    WriterClosed,
}

impl From<StorageError> for todoledger_core::Error {
    fn from(err: StorageError) -> Self {
        todoledger_core::Error::persistence(err.to_string())
    }
}
