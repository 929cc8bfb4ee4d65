use std::sync::Arc;

use diesel::prelude::*;
use diesel::upsert::excluded;
use todoledger_core::CacheStore;

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::Result;
use crate::models::{BlobInfo, CacheBlobDB};
use crate::schema::cache_blobs;

/// Collection blobs in the `cache_blobs` table. Each write is one upsert, so
/// a reader sees either the old or the new blob.
pub struct SqliteCacheStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteCacheStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    fn load_blob(&self, name: &str) -> Result<Option<CacheBlobDB>> {
        let mut conn = get_connection(&self.pool)?;
        let row = cache_blobs::table
            .find(name)
            .select(CacheBlobDB::as_select())
            .first::<CacheBlobDB>(&mut conn)
            .optional()?;
        Ok(row)
    }

    fn upsert_blob(&self, name: &str, data: &[u8]) -> Result<()> {
        let row = CacheBlobDB::new(name, data);
        self.writer.exec(move |conn| {
            diesel::insert_into(cache_blobs::table)
                .values(&row)
                .on_conflict(cache_blobs::name)
                .do_update()
                .set((
                    cache_blobs::data.eq(excluded(cache_blobs::data)),
                    cache_blobs::updated_at.eq(excluded(cache_blobs::updated_at)),
                ))
                .execute(conn)?;
            Ok(())
        })
    }

    /// Size and last write time of `name`.
    pub fn blob_info(&self, name: &str) -> Result<Option<BlobInfo>> {
        self.load_blob(name)?.map(BlobInfo::try_from).transpose()
    }
}

impl CacheStore for SqliteCacheStore {
    fn read(&self, name: &str) -> todoledger_core::Result<Option<Vec<u8>>> {
        Ok(self.load_blob(name)?.map(|row| row.data))
    }

    fn write(&self, name: &str, data: &[u8]) -> todoledger_core::Result<()> {
        Ok(self.upsert_blob(name, data)?)
    }
}
