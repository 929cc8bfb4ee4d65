//! Row types for the cache tables.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::errors::Result;

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(primary_key(name))]
#[diesel(table_name = crate::schema::cache_blobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CacheBlobDB {
    pub name: String,
    pub data: Vec<u8>,
    pub updated_at: String,
}

impl CacheBlobDB {
    pub fn new(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            data: data.to_vec(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(primary_key(list_id, transaction_id))]
#[diesel(table_name = crate::schema::decoded_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DecodedRecordDB {
    pub list_id: i64,
    pub transaction_id: i64,
    pub data: Vec<u8>,
}

/// What the blob store reports about one stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub name: String,
    pub size: usize,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CacheBlobDB> for BlobInfo {
    type Error = crate::errors::StorageError;

    fn try_from(row: CacheBlobDB) -> Result<Self> {
        Ok(Self {
            updated_at: DateTime::parse_from_rfc3339(&row.updated_at)?.with_timezone(&Utc),
            size: row.data.len(),
            name: row.name,
        })
    }
}
