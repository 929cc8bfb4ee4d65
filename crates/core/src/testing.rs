//! Builders and in-memory collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::cache::{CacheStore, MemoryCacheStore, MemoryRecordCache};
use crate::config::TodoConfig;
use crate::context::ServiceContext;
use crate::errors::{Error, Result};
use crate::events::{EventSink, TodoEvent};
use crate::records::{
    EncryptedRecord, GroupIndex, ListNameRecord, Record, RecordStorage, TaskRecord, TaskStatus,
    TaskStatusRecord,
};
use crate::remote::{GroupDirectory, Transaction, TransactionFeed};
use crate::secrets::{ScopeIndex, SecretKey, SecretKeyRegistry, SecretKeyType};

pub const ACCOUNT_ID: i64 = 3;
pub const LIST_ID: i64 = 42;

fn storage<R>(record: R, transaction_id: i64, target: Option<i64>) -> RecordStorage<R> {
    RecordStorage {
        record,
        transaction_id,
        account_id: ACCOUNT_ID,
        timestamp: transaction_id * 1000,
        target_transaction_id: target,
        group_id: LIST_ID,
    }
}

pub fn task_storage(transaction_id: i64, text: &str, target: Option<i64>) -> RecordStorage<TaskRecord> {
    storage(TaskRecord::new(text), transaction_id, target)
}

pub fn status_storage(
    transaction_id: i64,
    status: TaskStatus,
    target: i64,
) -> RecordStorage<TaskStatusRecord> {
    storage(TaskStatusRecord::new(status), transaction_id, Some(target))
}

pub fn name_storage(transaction_id: i64, name: &str) -> RecordStorage<ListNameRecord> {
    storage(ListNameRecord::new(name), transaction_id, None)
}

fn transaction(
    transaction_id: i64,
    group_index: u16,
    payload: Vec<u8>,
    target: Option<i64>,
) -> Transaction {
    Transaction {
        transaction_id,
        account_id: ACCOUNT_ID,
        timestamp: transaction_id * 1000,
        group_id: LIST_ID,
        group_index,
        payload,
        target_transaction_id: target,
    }
}

pub fn task_tx(key: &SecretKey, transaction_id: i64, text: &str, target: Option<i64>) -> Transaction {
    let sealed = EncryptedRecord::encrypt(key, &TaskRecord::new(text)).unwrap();
    transaction(
        transaction_id,
        GroupIndex::Task.as_u16(),
        sealed.to_bytes(),
        target,
    )
}

pub fn name_tx(key: &SecretKey, transaction_id: i64, name: &str) -> Transaction {
    let sealed = EncryptedRecord::encrypt(key, &ListNameRecord::new(name)).unwrap();
    transaction(
        transaction_id,
        GroupIndex::ListName.as_u16(),
        sealed.to_bytes(),
        None,
    )
}

pub fn status_tx(transaction_id: i64, status: TaskStatus, target: i64) -> Transaction {
    transaction(
        transaction_id,
        GroupIndex::TaskStatus.as_u16(),
        TaskStatusRecord::new(status).to_bytes(),
        Some(target),
    )
}

pub fn raw_tx(transaction_id: i64, group_index: u16, payload: Vec<u8>) -> Transaction {
    transaction(transaction_id, group_index, payload, None)
}

/// Ledger fake serving both the transaction feed and group membership.
#[derive(Default)]
pub struct FakeLedger {
    transactions: Mutex<HashMap<i64, Vec<Transaction>>>,
    groups: Mutex<Vec<i64>>,
    fail_downloads: AtomicBool,
    fail_directory: AtomicBool,
    download_calls: AtomicUsize,
    /// When set, each download waits for one permit.
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, list_id: i64, tx: Transaction) {
        self.transactions
            .lock()
            .unwrap()
            .entry(list_id)
            .or_default()
            .push(tx);
    }

    pub fn set_groups(&self, groups: Vec<i64>) {
        *self.groups.lock().unwrap() = groups;
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_directory(&self, fail: bool) {
        self.fail_directory.store(fail, Ordering::SeqCst);
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn hold_downloads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl TransactionFeed for FakeLedger {
    async fn download_transactions(
        &self,
        list_id: i64,
        minimal_transaction_id: i64,
        _include_attachments: bool,
    ) -> Result<Vec<Transaction>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(Error::remote("ledger unreachable"));
        }
        let transactions = self.transactions.lock().unwrap();
        let mut found: Vec<Transaction> = transactions
            .get(&list_id)
            .map(|txs| {
                txs.iter()
                    .filter(|tx| tx.transaction_id >= minimal_transaction_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Arrival order is not guaranteed.
        found.reverse();
        Ok(found)
    }
}

#[async_trait]
impl GroupDirectory for FakeLedger {
    async fn download_group_ids(&self, _account_id: i64) -> Result<Vec<i64>> {
        if self.fail_directory.load(Ordering::SeqCst) {
            return Err(Error::remote("directory unreachable"));
        }
        Ok(self.groups.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeKeys {
    keys: Mutex<HashMap<ScopeIndex, Vec<SecretKey>>>,
}

impl FakeKeys {
    pub fn add(&self, scope: ScopeIndex, key: SecretKey) {
        self.keys.lock().unwrap().entry(scope).or_default().push(key);
    }
}

impl SecretKeyRegistry for FakeKeys {
    fn keys_for(&self, scope: ScopeIndex, secret_id: u64) -> Vec<SecretKey> {
        self.keys
            .lock()
            .unwrap()
            .get(&scope)
            .map(|keys| {
                keys.iter()
                    .filter(|key| key.secret_id() == secret_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn has_key_type(&self, scope: ScopeIndex, key_type: SecretKeyType) -> bool {
        self.keys
            .lock()
            .unwrap()
            .get(&scope)
            .is_some_and(|keys| keys.iter().any(|key| key.info().key_type == key_type))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TodoEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<TodoEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: TodoEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Blob store whose writes can be switched off.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryCacheStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl CacheStore for FlakyStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.inner.read(name)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::persistence("disk full"));
        }
        self.inner.write(name, bytes)
    }
}

/// Wires a [`ServiceContext`] over the fakes and keeps handles to them.
pub struct Harness {
    pub ledger: Arc<FakeLedger>,
    pub keys: Arc<FakeKeys>,
    pub sink: Arc<RecordingSink>,
    pub record_cache: Arc<MemoryRecordCache>,
    pub store: Arc<FlakyStore>,
    pub context: Arc<ServiceContext>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(TodoConfig::default())
    }

    pub fn with_config(config: TodoConfig) -> Self {
        let ledger = Arc::new(FakeLedger::new());
        let keys = Arc::new(FakeKeys::default());
        let sink = Arc::new(RecordingSink::default());
        let record_cache = Arc::new(MemoryRecordCache::new());
        let store = Arc::new(FlakyStore::default());
        let context = Arc::new(ServiceContext {
            account_id: ACCOUNT_ID,
            config,
            feed: ledger.clone(),
            directory: ledger.clone(),
            secret_keys: keys.clone(),
            record_cache: record_cache.clone(),
            cache_store: store.clone(),
            event_sink: sink.clone(),
        });
        Self {
            ledger,
            keys,
            sink,
            record_cache,
            store,
            context,
        }
    }

    /// A fresh key registered for the test list's scope.
    pub fn list_key(&self) -> SecretKey {
        let key = SecretKey::generate();
        self.keys.add(ScopeIndex::for_list(LIST_ID), key.clone());
        key
    }
}
