use std::sync::Arc;

use diesel::prelude::*;
use todoledger_core::RecordCache;

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::Result;
use crate::models::DecodedRecordDB;
use crate::schema::decoded_records;

/// Decoded records in the `decoded_records` table.
pub struct SqliteRecordCache {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteRecordCache {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    fn load_record(&self, list_id: i64, transaction_id: i64) -> Result<Option<Vec<u8>>> {
        let mut conn = get_connection(&self.pool)?;
        let data = decoded_records::table
            .find((list_id, transaction_id))
            .select(decoded_records::data)
            .first::<Vec<u8>>(&mut conn)
            .optional()?;
        Ok(data)
    }

    fn insert_record(&self, list_id: i64, transaction_id: i64, data: &[u8]) -> Result<()> {
        let row = DecodedRecordDB {
            list_id,
            transaction_id,
            data: data.to_vec(),
        };
        // Decoded records are immutable; the first write wins.
        self.writer.exec(move |conn| {
            diesel::insert_into(decoded_records::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
    }

    /// Drops every cached record of `list_id`.
    pub fn clear_list(&self, list_id: i64) -> Result<usize> {
        self.writer.exec(move |conn| {
            let removed = diesel::delete(
                decoded_records::table.filter(decoded_records::list_id.eq(list_id)),
            )
            .execute(conn)?;
            Ok(removed)
        })
    }
}

impl RecordCache for SqliteRecordCache {
    fn load(&self, list_id: i64, transaction_id: i64) -> todoledger_core::Result<Option<Vec<u8>>> {
        Ok(self.load_record(list_id, transaction_id)?)
    }

    fn store(&self, list_id: i64, transaction_id: i64, data: &[u8]) -> todoledger_core::Result<()> {
        Ok(self.insert_record(list_id, transaction_id, data)?)
    }
}
