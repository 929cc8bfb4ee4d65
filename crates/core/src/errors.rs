//! Error types for the todo ledger core.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while decoding, replaying or persisting todo state.
///
/// A missing decryption key is deliberately absent: a decrypt attempt with the
/// wrong key yields `Ok(None)` and the list records the key as missing.
#[derive(Debug, Error)]
pub enum Error {
    /// Payload or cache bytes do not parse.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// A persisted blob was written by a newer data version.
    #[error("Unsupported data version {found} (supported up to {supported})")]
    UnsupportedDataVersion { found: u8, supported: u8 },

    /// The remote ledger could not be queried.
    #[error("Remote fetch failed: {0}")]
    RemoteFetchFailed(String),

    /// The cache store rejected a read or write.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The persisted collection could not be restored.
    #[error("Cache load error: {0}")]
    CacheLoad(String),

    /// Encryption failed (decryption failures are soft, see above).
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Configuration could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRecord(message.into())
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteFetchFailed(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// True when the error only affects a single transaction and replay of the
    /// rest of the batch must continue.
    pub fn is_per_transaction(&self) -> bool {
        matches!(self, Self::MalformedRecord(_))
    }
}
