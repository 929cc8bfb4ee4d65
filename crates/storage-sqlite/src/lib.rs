//! SQLite persistence for the todo collection and the decoded-record cache.

pub mod cache_store;
pub mod db;
pub mod errors;
pub mod models;
pub mod record_cache;
pub mod schema;

pub use cache_store::SqliteCacheStore;
pub use db::{create_pool, get_connection, init, open, run_migrations, DbPool, WriteHandle};
pub use errors::{Result, StorageError};
pub use models::BlobInfo;
pub use record_cache::SqliteRecordCache;
