//! Storage contracts for the persisted collection and the decoded-record cache.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::{Error, Result};

/// Named blob store holding serialized collections.
///
/// `write` replaces the whole blob atomically: a reader sees either the
/// previous value or the new one.
pub trait CacheStore: Send + Sync {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    fn write(&self, name: &str, data: &[u8]) -> Result<()>;
}

/// Decoded `StoredRecord` bytes keyed by list and transaction.
pub trait RecordCache: Send + Sync {
    fn load(&self, list_id: i64, transaction_id: i64) -> Result<Option<Vec<u8>>>;

    fn store(&self, list_id: i64, transaction_id: i64, data: &[u8]) -> Result<()>;
}

fn poisoned() -> Error {
    Error::persistence("cache lock poisoned")
}

/// In-process [`CacheStore`]; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().map_err(|_| poisoned())?;
        Ok(blobs.get(name).cloned())
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|_| poisoned())?;
        blobs.insert(name.to_string(), data.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecordCache {
    records: Mutex<HashMap<(i64, i64), Vec<u8>>>,
}

impl MemoryRecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordCache for MemoryRecordCache {
    fn load(&self, list_id: i64, transaction_id: i64) -> Result<Option<Vec<u8>>> {
        let records = self.records.lock().map_err(|_| poisoned())?;
        Ok(records.get(&(list_id, transaction_id)).cloned())
    }

    fn store(&self, list_id: i64, transaction_id: i64, data: &[u8]) -> Result<()> {
        let mut records = self.records.lock().map_err(|_| poisoned())?;
        records.insert((list_id, transaction_id), data.to_vec());
        Ok(())
    }
}
