//! Decoded records with their ledger provenance.

use serde::Serialize;

use super::{ListNameRecord, Record, RecordKind, TaskRecord, TaskStatusRecord};
use crate::errors::Result;
use crate::pack::{Packable, Packer, Unpacker};

/// A decoded (and, if needed, decrypted) record plus the transaction it came from.
///
/// Immutable once built; this is the unit cached so a transaction is never
/// decrypted twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStorage<R> {
    pub record: R,
    pub transaction_id: i64,
    pub account_id: i64,
    pub timestamp: i64,
    pub target_transaction_id: Option<i64>,
    pub group_id: i64,
}

impl<R: Record> Packable for RecordStorage<R> {
    fn pack(&self, packer: &mut Packer) {
        packer.pack_bytes(&self.record.to_bytes());
        packer.pack_i64(self.transaction_id);
        packer.pack_i64(self.account_id);
        packer.pack_i64(self.timestamp);
        if let Some(target) = self.target_transaction_id {
            packer.pack_bool(true);
            packer.pack_i64(target);
        } else {
            packer.pack_bool(false);
        }
        packer.pack_i64(self.group_id);
    }

    fn unpack(unpacker: &mut Unpacker<'_>) -> Result<Self> {
        let record = R::from_bytes(unpacker.unpack_bytes()?)?;
        let transaction_id = unpacker.unpack_i64()?;
        let account_id = unpacker.unpack_i64()?;
        let timestamp = unpacker.unpack_i64()?;
        let target_transaction_id = if unpacker.unpack_bool()? {
            Some(unpacker.unpack_i64()?)
        } else {
            None
        };
        let group_id = unpacker.unpack_i64()?;
        Ok(Self {
            record,
            transaction_id,
            account_id,
            timestamp,
            target_transaction_id,
            group_id,
        })
    }
}

/// Closed set of decoded record storages, dispatched by kind tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredRecord {
    ListName(RecordStorage<ListNameRecord>),
    Task(RecordStorage<TaskRecord>),
    TaskStatus(RecordStorage<TaskStatusRecord>),
}

impl StoredRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::ListName(_) => RecordKind::ListName,
            Self::Task(_) => RecordKind::Task,
            Self::TaskStatus(_) => RecordKind::TaskStatus,
        }
    }

    pub fn transaction_id(&self) -> i64 {
        match self {
            Self::ListName(storage) => storage.transaction_id,
            Self::Task(storage) => storage.transaction_id,
            Self::TaskStatus(storage) => storage.transaction_id,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut packer = Packer::new();
        self.pack(&mut packer);
        packer.into_bytes()
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        Self::unpack(&mut Unpacker::new(raw))
    }
}

impl Packable for StoredRecord {
    fn pack(&self, packer: &mut Packer) {
        packer.pack_u8(self.kind().tag());
        match self {
            Self::ListName(storage) => storage.pack(packer),
            Self::Task(storage) => storage.pack(packer),
            Self::TaskStatus(storage) => storage.pack(packer),
        }
    }

    fn unpack(unpacker: &mut Unpacker<'_>) -> Result<Self> {
        let kind = RecordKind::from_tag(unpacker.unpack_u8()?)?;
        Ok(match kind {
            RecordKind::ListName => Self::ListName(RecordStorage::unpack(unpacker)?),
            RecordKind::Task => Self::Task(RecordStorage::unpack(unpacker)?),
            RecordKind::TaskStatus => Self::TaskStatus(RecordStorage::unpack(unpacker)?),
        })
    }
}
