//! Todo record payloads and their tagged binary form.
//!
//! Every record starts with a one-byte [`RecordKind`] tag followed by the
//! record body. Task and list-name records travel inside an
//! [`EncryptedRecord`] envelope; task-status records are sent in the clear.

mod envelope;
mod storage;

pub use envelope::*;
pub use storage::*;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::pack::{Packer, Unpacker};

/// Leading type tag of an encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    ListName,
    Task,
    TaskStatus,
}

impl RecordKind {
    pub fn tag(self) -> u8 {
        match self {
            Self::ListName => 1,
            Self::Task => 2,
            Self::TaskStatus => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(Self::ListName),
            2 => Ok(Self::Task),
            3 => Ok(Self::TaskStatus),
            other => Err(Error::malformed(format!("unknown record tag {}", other))),
        }
    }
}

/// Group index of a ledger transaction, selecting which record it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupIndex {
    ListName,
    Task,
    TaskStatus,
}

impl GroupIndex {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::ListName => 1,
            Self::Task => 2,
            Self::TaskStatus => 3,
        }
    }

    /// `None` for indexes that carry no todo record (group administration).
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ListName),
            2 => Some(Self::Task),
            3 => Some(Self::TaskStatus),
            _ => None,
        }
    }

    pub fn record_kind(self) -> RecordKind {
        match self {
            Self::ListName => RecordKind::ListName,
            Self::Task => RecordKind::Task,
            Self::TaskStatus => RecordKind::TaskStatus,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    Closed,
    Deleted,
}

impl TaskStatus {
    fn as_u8(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Closed => 1,
            Self::Deleted => 2,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::Closed),
            2 => Ok(Self::Deleted),
            other => Err(Error::malformed(format!("unknown task status {}", other))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Deleted => "deleted",
        };
        f.write_str(label)
    }
}

/// Reads the leading type tag and returns it with the undecoded body.
pub fn decode(raw: &[u8]) -> Result<(RecordKind, &[u8])> {
    let (tag, body) = raw
        .split_first()
        .ok_or_else(|| Error::malformed("empty record payload"))?;
    Ok((RecordKind::from_tag(*tag)?, body))
}

/// A record variant with a fixed kind tag.
pub trait Record: Sized + Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: RecordKind;

    fn pack_body(&self, packer: &mut Packer);

    fn unpack_body(unpacker: &mut Unpacker<'_>) -> Result<Self>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut packer = Packer::new();
        packer.pack_u8(Self::KIND.tag());
        self.pack_body(&mut packer);
        packer.into_bytes()
    }

    fn from_bytes(raw: &[u8]) -> Result<Self> {
        let (kind, body) = decode(raw)?;
        if kind != Self::KIND {
            return Err(Error::malformed(format!(
                "expected {:?} record, found {:?}",
                Self::KIND,
                kind
            )));
        }
        Self::unpack_body(&mut Unpacker::new(body))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListNameRecord {
    pub name: String,
}

impl ListNameRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Record for ListNameRecord {
    const KIND: RecordKind = RecordKind::ListName;

    fn pack_body(&self, packer: &mut Packer) {
        packer.pack_str(&self.name);
    }

    fn unpack_body(unpacker: &mut Unpacker<'_>) -> Result<Self> {
        Ok(Self {
            name: unpacker.unpack_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub text: String,
}

impl TaskRecord {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Record for TaskRecord {
    const KIND: RecordKind = RecordKind::Task;

    fn pack_body(&self, packer: &mut Packer) {
        packer.pack_str(&self.text);
    }

    fn unpack_body(unpacker: &mut Unpacker<'_>) -> Result<Self> {
        Ok(Self {
            text: unpacker.unpack_string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusRecord {
    pub status: TaskStatus,
}

impl TaskStatusRecord {
    pub fn new(status: TaskStatus) -> Self {
        Self { status }
    }
}

impl Record for TaskStatusRecord {
    const KIND: RecordKind = RecordKind::TaskStatus;

    fn pack_body(&self, packer: &mut Packer) {
        packer.pack_u8(self.status.as_u8());
    }

    fn unpack_body(unpacker: &mut Unpacker<'_>) -> Result<Self> {
        Ok(Self {
            status: TaskStatus::from_u8(unpacker.unpack_u8()?)?,
        })
    }
}
