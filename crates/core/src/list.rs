//! List aggregate: replays a list's transactions into tasks and a list name.
//!
//! A download cycle fetches everything at or above the cursor, sorts it by
//! transaction id and applies it in that order. Records that need a key the
//! registry does not have yet are recorded in `missing_secret_keys` and block
//! the cursor: nothing after the first unresolved transaction is applied
//! until a later cycle can decrypt it. Decoded records are kept in the
//! record cache so a transaction is decrypted at most once.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use serde::Serialize;

use crate::context::ServiceContext;
use crate::errors::{Error, Result};
use crate::events::TodoEvent;
use crate::pack::{PackKey, Packable, Packer, Unpacker};
use crate::records::{
    EncryptedRecord, GroupIndex, ListNameRecord, Record, RecordStorage, StoredRecord, TaskRecord,
    TaskStatus, TaskStatusRecord,
};
use crate::remote::Transaction;
use crate::secrets::{ScopeIndex, SecretKeyInfo, SecretKeyRegistry};
use crate::task::{supersedes, TodoTask};

/// Version byte written in front of every persisted list.
pub const DATA_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskSortMethod {
    #[default]
    Ignored,
    ByTransactionId,
    ByTransactionIdDesc,
    ByTimestamp,
    ByTimestampDesc,
}

/// Outcome of the most recent download attempt of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LastDownload {
    #[default]
    NeverDownloaded,
    Downloaded {
        fetched: usize,
    },
    Failed,
}

/// Summary of one successful download cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSyncReport {
    pub list_id: i64,
    pub fetched: usize,
    pub applied: usize,
    pub malformed: usize,
    /// Transactions held back by an unresolved key.
    pub deferred: usize,
    pub missing_secret_keys: usize,
    pub last_processed_transaction_id: i64,
}

enum Resolution {
    /// The key is set when the record was decrypted in this pass.
    Resolved(StoredRecord, Option<SecretKeyInfo>),
    /// Not a todo record (group administration, empty payload).
    Ignored,
    MissingKey(SecretKeyInfo),
}

enum Decrypted<R> {
    Record(R, SecretKeyInfo),
    MissingKey(SecretKeyInfo),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoList {
    list_id: i64,
    index: ScopeIndex,
    last_processed_transaction_id: i64,
    last_used_secret_key: Option<SecretKeyInfo>,
    missing_secret_keys: BTreeMap<u64, SecretKeyInfo>,
    tasks: BTreeMap<i64, TodoTask>,
    history_transaction_ids: BTreeSet<i64>,
    current_list_name: Option<RecordStorage<ListNameRecord>>,
    last_download: LastDownload,
}

impl TodoList {
    /// A list that has never been synced; `cursor` is the never-synced sentinel.
    pub fn new(list_id: i64, cursor: i64) -> Self {
        Self {
            list_id,
            index: ScopeIndex::for_list(list_id),
            last_processed_transaction_id: cursor,
            last_used_secret_key: None,
            missing_secret_keys: BTreeMap::new(),
            tasks: BTreeMap::new(),
            history_transaction_ids: BTreeSet::new(),
            current_list_name: None,
            last_download: LastDownload::NeverDownloaded,
        }
    }

    pub fn list_id(&self) -> i64 {
        self.list_id
    }

    pub fn index(&self) -> ScopeIndex {
        self.index
    }

    pub fn last_processed_transaction_id(&self) -> i64 {
        self.last_processed_transaction_id
    }

    pub fn last_used_secret_key(&self) -> Option<SecretKeyInfo> {
        self.last_used_secret_key
    }

    pub fn missing_secret_keys(&self) -> &BTreeMap<u64, SecretKeyInfo> {
        &self.missing_secret_keys
    }

    pub fn is_missing_secret_key(&self, secret_id: u64) -> bool {
        self.missing_secret_keys.contains_key(&secret_id)
    }

    pub fn tasks(&self) -> &BTreeMap<i64, TodoTask> {
        &self.tasks
    }

    pub fn task(&self, task_id: i64) -> Option<&TodoTask> {
        self.tasks.get(&task_id)
    }

    pub fn history_transaction_ids(&self) -> &BTreeSet<i64> {
        &self.history_transaction_ids
    }

    pub fn current_list_name(&self) -> Option<&RecordStorage<ListNameRecord>> {
        self.current_list_name.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.current_list_name
            .as_ref()
            .map(|storage| storage.record.name.as_str())
    }

    pub fn display_name<'a>(&'a self, default: &'a str) -> &'a str {
        self.name().unwrap_or(default)
    }

    pub fn last_download(&self) -> LastDownload {
        self.last_download
    }

    /// True when `key` is the key this list was last decrypted with, or when
    /// the list has no established key yet.
    pub fn is_last_used_secret_key(&self, key: Option<&SecretKeyInfo>) -> bool {
        match self.last_used_secret_key {
            None => true,
            Some(last) => key.is_some_and(|key| key.secret_id == last.secret_id),
        }
    }

    pub fn tasks_with_status(&self, status: TaskStatus, sort: TaskSortMethod) -> Vec<&TodoTask> {
        let mut tasks: Vec<&TodoTask> = self
            .tasks
            .values()
            .filter(|task| task.status() == status)
            .collect();

        match sort {
            TaskSortMethod::Ignored => {}
            TaskSortMethod::ByTransactionId => tasks.sort_by_key(|task| task.id()),
            TaskSortMethod::ByTransactionIdDesc => {
                tasks.sort_by_key(|task| std::cmp::Reverse(task.id()))
            }
            TaskSortMethod::ByTimestamp => {
                tasks.sort_by_key(|task| (task.effective_timestamp(), task.id()))
            }
            TaskSortMethod::ByTimestampDesc => tasks.sort_by_key(|task| {
                std::cmp::Reverse((task.effective_timestamp(), task.id()))
            }),
        }
        tasks
    }

    /// Merges one decoded record. Returns false when the transaction was
    /// already applied to this list.
    pub fn apply(&mut self, record: StoredRecord) -> bool {
        let transaction_id = record.transaction_id();
        if !self.history_transaction_ids.insert(transaction_id) {
            return false;
        }
        self.advance_cursor(transaction_id);

        match record {
            StoredRecord::ListName(storage) => {
                let current = self.current_list_name.as_ref().map(|s| s.transaction_id);
                if supersedes(current, storage.transaction_id) {
                    self.current_list_name = Some(storage);
                }
            }
            StoredRecord::Task(storage) => {
                let target = storage.target_transaction_id;
                if let Some(task) = target.and_then(|id| self.tasks.get_mut(&id)) {
                    task.apply_task(storage);
                } else {
                    self.tasks
                        .entry(storage.transaction_id)
                        .or_insert_with(|| TodoTask::new(storage));
                }
            }
            StoredRecord::TaskStatus(storage) => {
                let target = storage.target_transaction_id;
                if let Some(task) = target.and_then(|id| self.tasks.get_mut(&id)) {
                    task.apply_status(storage);
                } else {
                    debug!(
                        "[TodoSync] List {}: status transaction {} targets unknown task {:?}",
                        self.list_id, transaction_id, target
                    );
                }
            }
        }
        true
    }

    fn advance_cursor(&mut self, transaction_id: i64) {
        self.last_processed_transaction_id = self.last_processed_transaction_id.max(transaction_id);
    }

    /// Drops missing-key entries the registry can now satisfy.
    pub fn prune_missing_secret_keys(&mut self, registry: &dyn SecretKeyRegistry) {
        let index = self.index;
        self.missing_secret_keys
            .retain(|secret_id, _| registry.keys_for(index, *secret_id).is_empty());
    }

    /// Runs one download cycle. Emits `ListDownloading`, and
    /// `ListDownloadFailed` when the fetch fails; state is untouched on failure.
    pub async fn download_transactions(&mut self, ctx: &ServiceContext) -> Result<ListSyncReport> {
        self.prune_missing_secret_keys(ctx.secret_keys.as_ref());
        ctx.emit(TodoEvent::ListDownloading {
            list_id: self.list_id,
        });

        let minimal = self
            .last_processed_transaction_id
            .max(ctx.config.first_valid_transaction_id);
        debug!(
            "[TodoSync] Downloading list {} from transaction {}",
            self.list_id, minimal
        );

        let mut transactions = match ctx
            .feed
            .download_transactions(self.list_id, minimal, false)
            .await
        {
            Ok(transactions) => transactions,
            Err(err) => {
                warn!("[TodoSync] Download of list {} failed: {}", self.list_id, err);
                self.last_download = LastDownload::Failed;
                ctx.emit(TodoEvent::ListDownloadFailed {
                    list_id: self.list_id,
                });
                return Err(err);
            }
        };

        transactions.sort_by_key(|tx| tx.transaction_id);
        transactions.dedup_by_key(|tx| tx.transaction_id);

        let mut report = ListSyncReport {
            list_id: self.list_id,
            fetched: transactions.len(),
            applied: 0,
            malformed: 0,
            deferred: 0,
            missing_secret_keys: 0,
            last_processed_transaction_id: self.last_processed_transaction_id,
        };
        let mut missing = BTreeMap::new();
        let mut blocked_at: Option<i64> = None;

        for tx in &transactions {
            match self.resolve(ctx, tx) {
                Ok(Resolution::Resolved(record, key_info)) => {
                    if blocked_at.is_some() {
                        report.deferred += 1;
                    } else if self.apply(record) {
                        report.applied += 1;
                        if key_info.is_some() {
                            self.last_used_secret_key = key_info;
                        }
                    }
                }
                Ok(Resolution::Ignored) => {
                    if blocked_at.is_none() {
                        self.advance_cursor(tx.transaction_id);
                    }
                }
                Ok(Resolution::MissingKey(key_info)) => {
                    debug!(
                        "[TodoSync] List {}: no key {} for transaction {}",
                        self.list_id, key_info.secret_id, tx.transaction_id
                    );
                    missing.insert(key_info.secret_id, key_info);
                    blocked_at.get_or_insert(tx.transaction_id);
                    report.deferred += 1;
                }
                Err(err) => {
                    warn!(
                        "[TodoSync] List {}: skipping transaction {}: {}",
                        self.list_id, tx.transaction_id, err
                    );
                    report.malformed += 1;
                    if blocked_at.is_none() {
                        self.advance_cursor(tx.transaction_id);
                    }
                }
            }
        }

        self.missing_secret_keys = missing;
        self.last_download = LastDownload::Downloaded {
            fetched: report.fetched,
        };
        report.missing_secret_keys = self.missing_secret_keys.len();
        report.last_processed_transaction_id = self.last_processed_transaction_id;

        info!(
            "[TodoSync] List {} synced: fetched={} applied={} deferred={} malformed={} cursor={}",
            self.list_id,
            report.fetched,
            report.applied,
            report.deferred,
            report.malformed,
            report.last_processed_transaction_id
        );
        Ok(report)
    }

    fn resolve(&self, ctx: &ServiceContext, tx: &Transaction) -> Result<Resolution> {
        let use_cache = ctx.config.use_record_cache;
        if use_cache {
            if let Some(record) = self.cached_record(ctx, tx.transaction_id) {
                return Ok(Resolution::Resolved(record, None));
            }
        }

        let Some(group_index) = GroupIndex::from_u16(tx.group_index) else {
            return Ok(Resolution::Ignored);
        };
        if tx.payload.is_empty() {
            return Ok(Resolution::Ignored);
        }

        let registry = ctx.secret_keys.as_ref();
        let (record, used_key) = match group_index {
            GroupIndex::TaskStatus => {
                let record = TaskStatusRecord::from_bytes(&tx.payload)?;
                (StoredRecord::TaskStatus(storage_for(tx, record)), None)
            }
            GroupIndex::Task => match self.decrypt::<TaskRecord>(registry, &tx.payload)? {
                Decrypted::Record(record, key) => {
                    (StoredRecord::Task(storage_for(tx, record)), Some(key))
                }
                Decrypted::MissingKey(key_info) => return Ok(Resolution::MissingKey(key_info)),
            },
            GroupIndex::ListName => match self.decrypt::<ListNameRecord>(registry, &tx.payload)? {
                Decrypted::Record(record, key) => {
                    (StoredRecord::ListName(storage_for(tx, record)), Some(key))
                }
                Decrypted::MissingKey(key_info) => return Ok(Resolution::MissingKey(key_info)),
            },
        };

        if use_cache {
            if let Err(err) = ctx
                .record_cache
                .store(self.list_id, tx.transaction_id, &record.to_bytes())
            {
                warn!(
                    "[TodoSync] Failed to cache transaction {} of list {}: {}",
                    tx.transaction_id, self.list_id, err
                );
            }
        }
        Ok(Resolution::Resolved(record, used_key))
    }

    fn cached_record(&self, ctx: &ServiceContext, transaction_id: i64) -> Option<StoredRecord> {
        let bytes = match ctx.record_cache.load(self.list_id, transaction_id) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    "[TodoSync] Record cache read failed for transaction {}: {}",
                    transaction_id, err
                );
                return None;
            }
        };
        match StoredRecord::from_bytes(&bytes) {
            Ok(record) if record.transaction_id() == transaction_id => Some(record),
            Ok(_) | Err(_) => {
                warn!(
                    "[TodoSync] Ignoring unusable cached record for transaction {}",
                    transaction_id
                );
                None
            }
        }
    }

    /// A key that is held but fails to authenticate makes the record malformed,
    /// so it cannot block the cursor the way a missing key does.
    fn decrypt<R: Record>(
        &self,
        registry: &dyn SecretKeyRegistry,
        payload: &[u8],
    ) -> Result<Decrypted<R>> {
        let envelope = EncryptedRecord::<R>::from_bytes(payload)?;
        let key_info = envelope.key_info();
        let candidates = registry.keys_for(self.index, key_info.secret_id);
        if candidates.is_empty() {
            return Ok(Decrypted::MissingKey(key_info));
        }
        for key in &candidates {
            if let Some(record) = envelope.decrypt(key)? {
                return Ok(Decrypted::Record(record, key.info()));
            }
        }
        Err(Error::malformed(format!(
            "no held key {} authenticates the payload",
            key_info.secret_id
        )))
    }
}

fn storage_for<R>(tx: &Transaction, record: R) -> RecordStorage<R> {
    RecordStorage {
        record,
        transaction_id: tx.transaction_id,
        account_id: tx.account_id,
        timestamp: tx.timestamp,
        target_transaction_id: tx.target_transaction_id,
        group_id: tx.group_id,
    }
}

impl PackKey for TodoList {
    fn pack_key(&self) -> i64 {
        self.list_id
    }
}

impl Packable for TodoList {
    fn pack(&self, packer: &mut Packer) {
        packer.pack_u8(DATA_VERSION);
        packer.pack_i64(self.list_id);
        packer.pack_i64(self.last_processed_transaction_id);
        packer.pack_option(self.last_used_secret_key.as_ref());
        packer.pack_map(&self.tasks);
        packer.pack_id_set(&self.history_transaction_ids);
        packer.pack_option(self.current_list_name.as_ref());
    }

    fn unpack(unpacker: &mut Unpacker<'_>) -> Result<Self> {
        let version = unpacker.unpack_u8()?;
        if version > DATA_VERSION {
            return Err(Error::UnsupportedDataVersion {
                found: version,
                supported: DATA_VERSION,
            });
        }
        if version == 0 {
            return Err(Error::malformed("list data version 0"));
        }

        let list_id = unpacker.unpack_i64()?;
        let last_processed_transaction_id = unpacker.unpack_i64()?;
        let last_used_secret_key = unpacker.unpack_option()?;
        let tasks = unpacker.unpack_map()?;
        let history_transaction_ids = unpacker.unpack_id_set()?;
        let current_list_name = unpacker.unpack_option()?;
        Ok(Self {
            list_id,
            index: ScopeIndex::for_list(list_id),
            last_processed_transaction_id,
            last_used_secret_key,
            missing_secret_keys: BTreeMap::new(),
            tasks,
            history_transaction_ids,
            current_list_name,
            last_download: LastDownload::NeverDownloaded,
        })
    }
}
