//! Local replay engine for shared, partially encrypted todo lists.
//!
//! Transactions fetched from the remote ledger are decoded, decrypted when a
//! key is available, and merged into [`TodoList`] aggregates with
//! last-write-wins by transaction id. The resulting [`Todo`] collection is
//! persisted as a versioned binary blob so syncing resumes incrementally.

pub mod cache;
pub mod collection;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod list;
pub mod pack;
pub mod records;
pub mod remote;
pub mod secrets;
pub mod sync;
pub mod task;

#[cfg(test)]
mod testing;

pub use cache::{CacheStore, MemoryCacheStore, MemoryRecordCache, RecordCache};
pub use collection::Todo;
pub use config::TodoConfig;
pub use context::ServiceContext;
pub use errors::{Error, Result};
pub use events::{BroadcastEventSink, EventSink, QueryResult, SubmitOutcome, TodoEvent};
pub use list::{LastDownload, ListSyncReport, TaskSortMethod, TodoList};
pub use records::{
    EncryptedRecord, GroupIndex, ListNameRecord, Record, RecordKind, RecordStorage, StoredRecord,
    TaskRecord, TaskStatus, TaskStatusRecord,
};
pub use remote::{GroupDirectory, Transaction, TransactionFeed};
pub use secrets::{KeyAdded, ScopeIndex, SecretKey, SecretKeyInfo, SecretKeyRegistry, SecretKeyType};
pub use sync::{SyncEngine, SyncRun, SyncTarget};
pub use task::TodoTask;
