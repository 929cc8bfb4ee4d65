//! The collection of todo lists of one account, and its persisted form.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::context::ServiceContext;
use crate::errors::{Error, Result};
use crate::events::{QueryResult, TodoEvent};
use crate::list::{ListSyncReport, TodoList};
use crate::pack::{Packer, Unpacker};

/// Version byte in front of the persisted collection.
pub const COLLECTION_DATA_VERSION: u8 = 1;

pub struct Todo {
    context: Arc<ServiceContext>,
    lists: BTreeMap<i64, TodoList>,
}

impl Todo {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self {
            context,
            lists: BTreeMap::new(),
        }
    }

    /// Restores the collection from the cache store. Never fails: unreadable
    /// or unsupported data yields an empty collection that resyncs from the
    /// ledger. Emits `CollectionQueried(StoredData)`.
    pub fn load(context: Arc<ServiceContext>) -> Self {
        let cache_name = context.config.cache_name.clone();
        let todo = match context.cache_store.read(&cache_name) {
            Ok(Some(bytes)) => match Self::from_bytes(Arc::clone(&context), &bytes) {
                Ok(todo) => {
                    debug!("[TodoSync] Restored {} lists from cache", todo.lists.len());
                    todo
                }
                Err(err) => {
                    warn!("[TodoSync] Discarding cached collection: {}", err);
                    Self::new(Arc::clone(&context))
                }
            },
            Ok(None) => Self::new(Arc::clone(&context)),
            Err(err) => {
                warn!("[TodoSync] Could not read cached collection: {}", err);
                Self::new(Arc::clone(&context))
            }
        };
        context.emit(TodoEvent::CollectionQueried {
            result: QueryResult::StoredData,
        });
        todo
    }

    pub fn from_bytes(context: Arc<ServiceContext>, bytes: &[u8]) -> Result<Self> {
        let mut unpacker = Unpacker::new(bytes);
        let version = unpacker
            .unpack_u8()
            .map_err(|e| Error::CacheLoad(e.to_string()))?;
        if version > COLLECTION_DATA_VERSION {
            return Err(Error::UnsupportedDataVersion {
                found: version,
                supported: COLLECTION_DATA_VERSION,
            });
        }
        let lists = unpacker
            .unpack_map::<TodoList>()
            .map_err(|e| match e {
                Error::UnsupportedDataVersion { .. } => e,
                other => Error::CacheLoad(other.to_string()),
            })?;
        if !unpacker.is_empty() {
            return Err(Error::CacheLoad("trailing bytes after collection".to_string()));
        }
        Ok(Self { context, lists })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut packer = Packer::new();
        packer.pack_u8(COLLECTION_DATA_VERSION);
        packer.pack_map(&self.lists);
        packer.into_bytes()
    }

    /// Writes the whole collection as one blob.
    pub fn persist(&self) -> Result<()> {
        self.context
            .cache_store
            .write(&self.context.config.cache_name, &self.to_bytes())
    }

    /// Persistence failures keep the in-memory state authoritative; the next
    /// successful cycle writes again.
    fn persist_logged(&self) {
        if let Err(err) = self.persist() {
            error!("[TodoSync] Failed to persist todo collection: {}", err);
        }
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    pub fn lists(&self) -> impl Iterator<Item = &TodoList> {
        self.lists.values()
    }

    pub fn list_ids(&self) -> Vec<i64> {
        self.lists.keys().copied().collect()
    }

    pub fn get_list(&self, list_id: i64) -> Option<&TodoList> {
        self.lists.get(&list_id)
    }

    pub fn get_list_mut(&mut self, list_id: i64) -> Option<&mut TodoList> {
        self.lists.get_mut(&list_id)
    }

    /// Returns the existing list or a fresh, never-synced one.
    pub fn add_list(&mut self, list_id: i64) -> &mut TodoList {
        let cursor = self.context.config.never_synced_cursor();
        self.lists
            .entry(list_id)
            .or_insert_with(|| TodoList::new(list_id, cursor))
    }

    /// Lists whose last download could not decrypt records under `secret_id`.
    pub fn lists_missing_key(&self, secret_id: u64) -> Vec<i64> {
        self.lists
            .values()
            .filter(|list| list.is_missing_secret_key(secret_id))
            .map(|list| list.list_id())
            .collect()
    }

    /// Group ids the account belongs to. On failure emits
    /// `CollectionQueried(DownloadError)` and returns an empty set; cached
    /// lists are kept.
    pub async fn discover_list_ids(&self) -> BTreeSet<i64> {
        self.fetch_list_ids().await.unwrap_or_default()
    }

    async fn fetch_list_ids(&self) -> Result<BTreeSet<i64>> {
        match self
            .context
            .directory
            .download_group_ids(self.context.account_id)
            .await
        {
            Ok(ids) => Ok(ids.into_iter().collect()),
            Err(err) => {
                warn!("[TodoSync] List discovery failed: {}", err);
                self.context.emit(TodoEvent::CollectionQueried {
                    result: QueryResult::DownloadError,
                });
                Err(err)
            }
        }
    }

    /// One download cycle for one list, followed by a persist and a
    /// `ListUpdated` event. Unknown ids are added first.
    pub async fn sync_list(&mut self, list_id: i64) -> Result<ListSyncReport> {
        let context = Arc::clone(&self.context);
        let report = self
            .add_list(list_id)
            .download_transactions(&context)
            .await?;
        self.persist_logged();
        context.emit(TodoEvent::ListUpdated {
            list_id,
            report: report.clone(),
        });
        Ok(report)
    }

    /// Discovers the account's lists and syncs every known list in turn.
    /// A failed list does not stop the others; a failed discovery aborts the
    /// pass.
    pub async fn sync_all(&mut self) -> Result<Vec<ListSyncReport>> {
        self.context.emit(TodoEvent::CollectionQueried {
            result: QueryResult::DownloadingData,
        });
        let discovered = self.fetch_list_ids().await?;
        for list_id in &discovered {
            self.add_list(*list_id);
        }
        self.persist_logged();

        let mut reports = Vec::with_capacity(self.lists.len());
        for list_id in self.list_ids() {
            match self.sync_list(list_id).await {
                Ok(report) => reports.push(report),
                Err(err) => debug!("[TodoSync] List {} not refreshed: {}", list_id, err),
            }
        }

        info!(
            "[TodoSync] Collection refreshed: {} of {} lists synced",
            reports.len(),
            self.lists.len()
        );
        self.context.emit(TodoEvent::CollectionQueried {
            result: QueryResult::LiveData,
        });
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::records::TaskStatus;
    use crate::testing::*;

    #[test]
    fn load_without_cache_is_empty_and_reports_stored_data() {
        let harness = Harness::new();
        let todo = Todo::load(harness.context.clone());
        assert_eq!(todo.lists().count(), 0);
        assert_eq!(
            harness.sink.events(),
            vec![TodoEvent::CollectionQueried {
                result: QueryResult::StoredData
            }]
        );
    }

    #[test]
    fn corrupt_or_newer_cache_loads_as_empty() {
        let harness = Harness::new();
        harness.store.write("todo", &[1, 0xFF, 0xFF]).unwrap();
        assert_eq!(Todo::load(harness.context.clone()).lists().count(), 0);

        harness
            .store
            .write("todo", &[COLLECTION_DATA_VERSION + 1, 0, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        assert_eq!(Todo::load(harness.context.clone()).lists().count(), 0);
    }

    #[test]
    fn add_list_returns_existing_list() {
        let harness = Harness::new();
        let mut todo = Todo::new(harness.context.clone());
        todo.add_list(7);
        let cursor = todo.add_list(7).last_processed_transaction_id();
        assert_eq!(cursor, -1);
        assert_eq!(todo.list_ids(), vec![7]);
    }

    #[tokio::test]
    async fn synced_collection_survives_persist_and_load() {
        let harness = Harness::new();
        let key = harness.list_key();
        harness.ledger.push(LIST_ID, task_tx(&key, 10, "Buy milk", None));
        harness.ledger.push(LIST_ID, status_tx(11, TaskStatus::Closed, 10));
        harness.ledger.push(LIST_ID, name_tx(&key, 12, "Groceries"));

        let mut todo = Todo::new(harness.context.clone());
        todo.sync_list(LIST_ID).await.unwrap();

        let restored = Todo::load(harness.context.clone());
        let list = restored.get_list(LIST_ID).unwrap();
        assert_eq!(list.name(), Some("Groceries"));
        assert_eq!(list.task(10).map(|t| t.status()), Some(TaskStatus::Closed));
        assert_eq!(list.last_processed_transaction_id(), 12);
        assert_eq!(list.last_used_secret_key(), Some(key.info()));
    }

    #[tokio::test]
    async fn sync_list_emits_updated_after_download() {
        let harness = Harness::new();
        let key = harness.list_key();
        harness.ledger.push(LIST_ID, task_tx(&key, 10, "A", None));

        let mut todo = Todo::new(harness.context.clone());
        let report = todo.sync_list(LIST_ID).await.unwrap();
        assert_eq!(
            harness.sink.events(),
            vec![
                TodoEvent::ListDownloading { list_id: LIST_ID },
                TodoEvent::ListUpdated {
                    list_id: LIST_ID,
                    report
                },
            ]
        );
    }

    #[tokio::test]
    async fn failed_persist_keeps_memory_state_and_retries_next_cycle() {
        let harness = Harness::new();
        let key = harness.list_key();
        harness.ledger.push(LIST_ID, task_tx(&key, 10, "A", None));
        harness.store.fail_writes(true);

        let mut todo = Todo::new(harness.context.clone());
        let report = todo.sync_list(LIST_ID).await.unwrap();
        assert_eq!(report.applied, 1);
        assert!(todo.get_list(LIST_ID).unwrap().task(10).is_some());
        assert!(harness.sink.events().contains(&TodoEvent::ListUpdated {
            list_id: LIST_ID,
            report
        }));
        assert_eq!(harness.store.read("todo").unwrap(), None);

        harness.store.fail_writes(false);
        harness.ledger.push(LIST_ID, task_tx(&key, 11, "B", None));
        todo.sync_list(LIST_ID).await.unwrap();

        let restored = Todo::load(harness.context.clone());
        let list = restored.get_list(LIST_ID).unwrap();
        assert_eq!(list.tasks().len(), 2);
        assert_eq!(list.last_processed_transaction_id(), 11);
    }

    #[tokio::test]
    async fn sync_all_discovers_lists_and_reports_live_data() {
        let harness = Harness::new();
        let key = harness.list_key();
        harness.ledger.set_groups(vec![LIST_ID, 77]);
        harness.ledger.push(LIST_ID, task_tx(&key, 10, "A", None));

        let mut todo = Todo::new(harness.context.clone());
        let reports = todo.sync_all().await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(todo.list_ids(), vec![LIST_ID, 77]);
        assert_eq!(
            harness.sink.events().last(),
            Some(&TodoEvent::CollectionQueried {
                result: QueryResult::LiveData
            })
        );
    }

    #[tokio::test]
    async fn discovery_failure_keeps_cached_lists() {
        let harness = Harness::new();
        let mut todo = Todo::new(harness.context.clone());
        todo.add_list(LIST_ID);
        harness.ledger.fail_directory(true);

        assert!(todo.discover_list_ids().await.is_empty());
        assert!(todo.sync_all().await.is_err());
        assert_eq!(todo.list_ids(), vec![LIST_ID]);
        assert!(harness.sink.events().contains(&TodoEvent::CollectionQueried {
            result: QueryResult::DownloadError
        }));
        assert_eq!(harness.ledger.download_calls(), 0);
    }

    #[tokio::test]
    async fn lists_missing_key_finds_blocked_lists() {
        let harness = Harness::new();
        let absent = crate::secrets::SecretKey::generate();
        harness.ledger.push(LIST_ID, name_tx(&absent, 5, "Home"));

        let mut todo = Todo::new(harness.context.clone());
        todo.add_list(8);
        todo.sync_list(LIST_ID).await.unwrap();
        assert_eq!(todo.lists_missing_key(absent.secret_id()), vec![LIST_ID]);
    }
}
