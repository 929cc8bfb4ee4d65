//! Remote-mutating list operations.
//!
//! Every operation passes one busy gate: while a submission is outstanding
//! any other operation fails fast with [`ServiceError::Busy`]. Each call
//! emits its result-classified event whatever the outcome, and resyncs the
//! affected lists after a successful submission.

use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use todoledger_core::{
    EncryptedRecord, GroupIndex, KeyAdded, ListNameRecord, Record, ScopeIndex, SecretKey,
    ServiceContext, SubmitOutcome, SyncEngine, SyncRun, TaskRecord, TaskStatus, TaskStatusRecord,
    Todo, TodoEvent,
};

use crate::error::{Result, ServiceError};
use crate::keyring::KeyRing;
use crate::submit::{DataSubmission, GroupChange, LedgerSubmitter, SubmitReceipt};

fn outcome_of<T>(result: &Result<T>) -> SubmitOutcome {
    match result {
        Ok(_) => SubmitOutcome::Ok,
        Err(err) => err.outcome(),
    }
}

pub struct TodoService {
    context: Arc<ServiceContext>,
    engine: SyncEngine,
    submitter: Arc<dyn LedgerSubmitter>,
    key_ring: Arc<KeyRing>,
    busy: Mutex<()>,
}

impl TodoService {
    /// `key_ring` should be the registry the collection's context decrypts with.
    pub fn new(todo: Todo, submitter: Arc<dyn LedgerSubmitter>, key_ring: Arc<KeyRing>) -> Self {
        let context = Arc::clone(todo.context());
        Self {
            context,
            engine: SyncEngine::new(todo),
            submitter,
            key_ring,
            busy: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn key_ring(&self) -> Arc<KeyRing> {
        Arc::clone(&self.key_ring)
    }

    fn enter(&self) -> Result<MutexGuard<'_, ()>> {
        self.busy.try_lock().map_err(|_| ServiceError::Busy)
    }

    fn account_id(&self) -> i64 {
        self.context.account_id
    }

    async fn refresh_list(&self, list_id: i64) {
        match self.engine.sync_list(list_id).await {
            Ok(SyncRun::Ran(_)) => {}
            Ok(SyncRun::Coalesced) => debug!("[TodoService] List {} already syncing", list_id),
            Err(err) => warn!("[TodoService] Resync of list {} failed: {}", list_id, err),
        }
    }

    /// Refreshes the collection, then gives every known list a default key.
    async fn refresh_all(&self) {
        match self.engine.sync_all().await {
            Ok(SyncRun::Ran(_)) => {}
            Ok(SyncRun::Coalesced) => {
                debug!("[TodoService] Collection refresh already running");
                return;
            }
            Err(err) => {
                warn!("[TodoService] Collection refresh failed: {}", err);
                return;
            }
        }
        let list_ids = self.engine.with_todo(|todo| todo.list_ids()).await;
        match self.key_ring.ensure_default_keys(list_ids) {
            Ok(0) => {}
            Ok(created) => info!("[TodoService] Derived {} default list keys", created),
            Err(err) => warn!("[TodoService] Default key derivation failed: {}", err),
        }
    }

    async fn ensure_known_list(&self, list_id: i64) -> Result<()> {
        let known = self
            .engine
            .with_todo(|todo| todo.get_list(list_id).is_some())
            .await;
        if known {
            Ok(())
        } else {
            Err(ServiceError::UnknownList(list_id))
        }
    }

    fn encryption_key(&self, list_id: i64) -> Result<SecretKey> {
        self.key_ring.ensure_default_key(list_id)?;
        let scope = ScopeIndex::for_list(list_id);
        self.key_ring
            .default_key(scope)
            .ok_or(ServiceError::MissingSecretKey(scope))
    }

    async fn submit_encrypted<R: Record>(
        &self,
        list_id: i64,
        group_index: GroupIndex,
        record: &R,
        target_transaction_id: Option<i64>,
    ) -> Result<SubmitReceipt> {
        let key = self.encryption_key(list_id)?;
        let payload = EncryptedRecord::encrypt(&key, record)?.to_bytes();
        self.submitter
            .submit_data(DataSubmission {
                account_id: self.account_id(),
                list_id,
                group_index,
                payload,
                target_transaction_id,
            })
            .await
    }

    /// Registers a new list owned by this account.
    pub async fn register_list(&self) -> Result<i64> {
        let result = self.submit_registration().await;
        if let Ok(list_id) = result {
            self.refresh_list(list_id).await;
        }
        self.context.emit(TodoEvent::ListRegistered {
            outcome: outcome_of(&result),
            list_id: result.as_ref().ok().copied(),
        });
        result
    }

    async fn submit_registration(&self) -> Result<i64> {
        let _busy = self.enter()?;
        let receipt = self.submitter.register_group(self.account_id()).await?;
        let list_id = receipt.new_group_id.ok_or_else(|| {
            todoledger_core::Error::malformed("registration receipt without group id")
        })?;

        self.engine
            .with_todo(|todo| {
                todo.add_list(list_id);
                if let Err(err) = todo.persist() {
                    warn!("[TodoService] Failed to persist new list {}: {}", list_id, err);
                }
            })
            .await;
        self.key_ring.ensure_default_key(list_id)?;
        info!("[TodoService] Registered list {}", list_id);
        Ok(list_id)
    }

    pub async fn invite_to_list(&self, list_id: i64, account_id: i64) -> Result<SubmitReceipt> {
        let result = self
            .administer(list_id, GroupChange::ApproveAdmin { account_id })
            .await;
        self.context.emit(TodoEvent::InvitationSent {
            outcome: outcome_of(&result),
            list_id,
            account_id,
        });
        result
    }

    /// Joins a list this account was invited to; `key` is the list key shared
    /// with the invitation.
    pub async fn accept_invitation(&self, list_id: i64, key: SecretKey) -> Result<SubmitReceipt> {
        let result = self.administer(list_id, GroupChange::AddSelf).await;
        if result.is_ok() {
            self.key_ring
                .add_key(ScopeIndex::for_list(list_id), key, false);
            self.refresh_all().await;
        }
        self.context.emit(TodoEvent::InvitationAccepted {
            outcome: outcome_of(&result),
            list_id,
        });
        result
    }

    pub async fn delete_list_user(&self, list_id: i64, account_id: i64) -> Result<SubmitReceipt> {
        let result = self
            .administer(list_id, GroupChange::RemoveAccount { account_id })
            .await;
        if result.is_ok() {
            self.refresh_list(list_id).await;
        }
        self.context.emit(TodoEvent::ListUserDeleted {
            outcome: outcome_of(&result),
            list_id,
            account_id,
        });
        result
    }

    /// Leaves the list. Its cached state stays until the collection drops it.
    pub async fn delete_list(&self, list_id: i64) -> Result<SubmitReceipt> {
        let result = self.administer(list_id, GroupChange::RemoveSelf).await;
        if result.is_ok() {
            self.refresh_list(list_id).await;
        }
        self.context.emit(TodoEvent::ListDeleted {
            outcome: outcome_of(&result),
            list_id,
        });
        result
    }

    async fn administer(&self, list_id: i64, change: GroupChange) -> Result<SubmitReceipt> {
        let _busy = self.enter()?;
        debug!("[TodoService] {:?} on list {}", change, list_id);
        self.submitter
            .administer_group(self.account_id(), list_id, change)
            .await
    }

    pub async fn rename_list(&self, list_id: i64, name: &str) -> Result<SubmitReceipt> {
        let result = self.submit_list_name(list_id, name).await;
        if result.is_ok() {
            self.refresh_list(list_id).await;
        }
        self.context.emit(TodoEvent::ListRenamed {
            outcome: outcome_of(&result),
            list_id,
        });
        result
    }

    async fn submit_list_name(&self, list_id: i64, name: &str) -> Result<SubmitReceipt> {
        let _busy = self.enter()?;
        self.ensure_known_list(list_id).await?;
        self.submit_encrypted(list_id, GroupIndex::ListName, &ListNameRecord::new(name), None)
            .await
    }

    /// Creates a task, or updates the text of task `target`.
    pub async fn add_or_update_task(
        &self,
        list_id: i64,
        text: &str,
        target: Option<i64>,
    ) -> Result<SubmitReceipt> {
        let result = self.submit_task(list_id, text, target).await;
        if result.is_ok() {
            self.refresh_list(list_id).await;
        }
        self.context.emit(TodoEvent::TaskSubmitted {
            outcome: outcome_of(&result),
            list_id,
        });
        result
    }

    async fn submit_task(
        &self,
        list_id: i64,
        text: &str,
        target: Option<i64>,
    ) -> Result<SubmitReceipt> {
        let _busy = self.enter()?;
        match target {
            Some(task_id) => self.ensure_known_task(list_id, task_id).await?,
            None => self.ensure_known_list(list_id).await?,
        }
        self.submit_encrypted(list_id, GroupIndex::Task, &TaskRecord::new(text), target)
            .await
    }

    pub async fn update_task_status(
        &self,
        list_id: i64,
        task_id: i64,
        status: TaskStatus,
    ) -> Result<SubmitReceipt> {
        let result = self.submit_status(list_id, task_id, status).await;
        if result.is_ok() {
            self.refresh_list(list_id).await;
        }
        self.context.emit(TodoEvent::TaskStatusChanged {
            outcome: outcome_of(&result),
            list_id,
            task_id,
        });
        result
    }

    async fn submit_status(
        &self,
        list_id: i64,
        task_id: i64,
        status: TaskStatus,
    ) -> Result<SubmitReceipt> {
        let _busy = self.enter()?;
        self.ensure_known_task(list_id, task_id).await?;
        // Status records travel unencrypted.
        self.submitter
            .submit_data(DataSubmission {
                account_id: self.account_id(),
                list_id,
                group_index: GroupIndex::TaskStatus,
                payload: TaskStatusRecord::new(status).to_bytes(),
                target_transaction_id: Some(task_id),
            })
            .await
    }

    async fn ensure_known_task(&self, list_id: i64, task_id: i64) -> Result<()> {
        let found = self
            .engine
            .with_todo(|todo| {
                todo.get_list(list_id)
                    .map(|list| list.task(task_id).is_some())
            })
            .await;
        match found {
            None => Err(ServiceError::UnknownList(list_id)),
            Some(false) => Err(ServiceError::UnknownTask { list_id, task_id }),
            Some(true) => Ok(()),
        }
    }

    /// False when the list's established key differs from the key new
    /// records would be encrypted with.
    pub async fn uses_established_key(&self, list_id: i64) -> Result<bool> {
        let key = self
            .key_ring
            .default_key(ScopeIndex::for_list(list_id))
            .map(|key| key.info());
        self.engine
            .with_todo(|todo| {
                todo.get_list(list_id)
                    .map(|list| list.is_last_used_secret_key(key.as_ref()))
            })
            .await
            .ok_or(ServiceError::UnknownList(list_id))
    }

    /// Resyncs every list that was waiting for the new key. Returns their ids.
    pub async fn handle_key_added(&self, added: KeyAdded) -> Vec<i64> {
        let waiting = self.engine.lists_missing_key(added.info.secret_id).await;
        for list_id in &waiting {
            debug!(
                "[TodoService] Key {} unblocks list {}",
                added.info.secret_id, list_id
            );
            self.refresh_list(*list_id).await;
        }
        waiting
    }

    /// Listens for new keys for as long as the service is alive.
    pub fn spawn_key_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.key_ring.subscribe();
        let service: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(added) => {
                        let Some(service) = service.upgrade() else {
                            break;
                        };
                        service.handle_key_added(added).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("[TodoService] Key listener skipped {} notifications", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
