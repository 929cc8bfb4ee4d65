//! Per-task merge state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::pack::{PackKey, Packable, Packer, Unpacker};
use crate::records::{RecordStorage, TaskRecord, TaskStatus, TaskStatusRecord};

/// True when an incoming record replaces the current one: the numerically
/// greater transaction id wins, timestamps never take part.
pub fn supersedes(current_transaction_id: Option<i64>, incoming_transaction_id: i64) -> bool {
    match current_transaction_id {
        Some(current) => incoming_transaction_id > current,
        None => true,
    }
}

/// A task, keyed by the transaction id of the record that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoTask {
    creation: RecordStorage<TaskRecord>,
    current_task: RecordStorage<TaskRecord>,
    current_status: Option<RecordStorage<TaskStatusRecord>>,
    history_transaction_ids: BTreeSet<i64>,
}

impl TodoTask {
    pub fn new(creation: RecordStorage<TaskRecord>) -> Self {
        let mut history_transaction_ids = BTreeSet::new();
        history_transaction_ids.insert(creation.transaction_id);
        Self {
            current_task: creation.clone(),
            creation,
            current_status: None,
            history_transaction_ids,
        }
    }

    pub fn id(&self) -> i64 {
        self.creation.transaction_id
    }

    pub fn group_id(&self) -> i64 {
        self.creation.group_id
    }

    pub fn text(&self) -> &str {
        &self.current_task.record.text
    }

    pub fn status(&self) -> TaskStatus {
        self.current_status
            .as_ref()
            .map(|storage| storage.record.status)
            .unwrap_or_default()
    }

    pub fn creation(&self) -> &RecordStorage<TaskRecord> {
        &self.creation
    }

    pub fn current_task(&self) -> &RecordStorage<TaskRecord> {
        &self.current_task
    }

    pub fn current_status(&self) -> Option<&RecordStorage<TaskStatusRecord>> {
        self.current_status.as_ref()
    }

    pub fn history_transaction_ids(&self) -> &BTreeSet<i64> {
        &self.history_transaction_ids
    }

    /// Audit history, newest transaction first.
    pub fn transaction_ids_desc(&self) -> Vec<i64> {
        self.history_transaction_ids.iter().rev().copied().collect()
    }

    /// Display ordering only; merge decisions never look at timestamps.
    pub fn effective_timestamp(&self) -> i64 {
        let status_timestamp = self
            .current_status
            .as_ref()
            .map(|storage| storage.timestamp)
            .unwrap_or(0);
        self.current_task.timestamp.max(status_timestamp)
    }

    /// [`Self::effective_timestamp`] read as unix milliseconds.
    pub fn effective_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.effective_timestamp())
    }

    /// Returns false when the transaction was already applied.
    pub fn apply_task(&mut self, storage: RecordStorage<TaskRecord>) -> bool {
        if !self.history_transaction_ids.insert(storage.transaction_id) {
            return false;
        }
        if supersedes(
            Some(self.current_task.transaction_id),
            storage.transaction_id,
        ) {
            self.current_task = storage;
        }
        true
    }

    /// Returns false when the transaction was already applied.
    pub fn apply_status(&mut self, storage: RecordStorage<TaskStatusRecord>) -> bool {
        if !self.history_transaction_ids.insert(storage.transaction_id) {
            return false;
        }
        let current = self.current_status.as_ref().map(|s| s.transaction_id);
        if supersedes(current, storage.transaction_id) {
            self.current_status = Some(storage);
        }
        true
    }
}

impl PackKey for TodoTask {
    fn pack_key(&self) -> i64 {
        self.id()
    }
}

impl Packable for TodoTask {
    fn pack(&self, packer: &mut Packer) {
        self.creation.pack(packer);
        self.current_task.pack(packer);
        packer.pack_option(self.current_status.as_ref());
        packer.pack_id_set(&self.history_transaction_ids);
    }

    fn unpack(unpacker: &mut Unpacker<'_>) -> Result<Self> {
        let creation = RecordStorage::unpack(unpacker)?;
        let current_task = RecordStorage::unpack(unpacker)?;
        let current_status = unpacker.unpack_option()?;
        let history_transaction_ids = unpacker.unpack_id_set()?;
        Ok(Self {
            creation,
            current_task,
            current_status,
            history_transaction_ids,
        })
    }
}
