//! Database file handling, the connection pool and embedded migrations.

pub mod write_actor;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, info};

use crate::errors::{Result, StorageError};

pub use write_actor::{spawn_writer, WriteHandle};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

pub const DB_FILE_NAME: &str = "todoledger.db";

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const POOL_SIZE: u32 = 8;
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), r2d2::Error> {
        conn.batch_execute(
            "PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;",
        )
        .map_err(r2d2::Error::QueryError)
    }
}

/// Creates `app_data_dir` if needed and returns the database path inside it.
pub fn init(app_data_dir: &str) -> Result<String> {
    std::fs::create_dir_all(app_data_dir)?;
    let db_path = Path::new(app_data_dir).join(DB_FILE_NAME);
    Ok(db_path.to_string_lossy().to_string())
}

pub fn run_migrations(db_path: &str) -> Result<()> {
    let mut conn = SqliteConnection::establish(db_path)?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    if !applied.is_empty() {
        info!("[Storage] Applied {} migrations to {}", applied.len(), db_path);
    }
    Ok(())
}

pub fn create_pool(db_path: &str) -> Result<Arc<DbPool>> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path);
    let pool = Pool::builder()
        .max_size(POOL_SIZE)
        .connection_timeout(CONNECTION_TIMEOUT)
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)?;
    debug!("[Storage] Connection pool ready for {}", db_path);
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection> {
    Ok(pool.get()?)
}

/// Full startup: directory, migrations, pool and the writer thread.
pub fn open(app_data_dir: &str) -> Result<(Arc<DbPool>, WriteHandle)> {
    let db_path = init(app_data_dir)?;
    run_migrations(&db_path)?;
    let pool = create_pool(&db_path)?;
    let writer = spawn_writer(pool.as_ref().clone())?;
    Ok((pool, writer))
}
