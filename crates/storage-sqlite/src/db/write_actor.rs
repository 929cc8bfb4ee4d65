//! Single writer: one thread owns one pooled connection and runs every write
//! as an immediate transaction, in submission order.

use std::sync::mpsc;
use std::thread;

use diesel::sqlite::SqliteConnection;
use log::{debug, error};

use super::{get_connection, DbPool};
use crate::errors::{Result, StorageError};

type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

#[derive(Clone)]
pub struct WriteHandle {
    jobs: mpsc::Sender<Job>,
}

impl WriteHandle {
    /// Runs `f` on the writer thread inside an immediate transaction and
    /// blocks until it has finished.
    pub fn exec<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let (reply, outcome) = mpsc::sync_channel(1);
        let job: Job = Box::new(move |conn| {
            let result = conn.immediate_transaction(f);
            // The caller may have gone away.
            let _ = reply.send(result);
        });
        self.jobs.send(job).map_err(|_| StorageError::WriterClosed)?;
        outcome.recv().map_err(|_| StorageError::WriterClosed)?
    }
}

/// Starts the writer thread. It stops once every handle is dropped.
pub fn spawn_writer(pool: DbPool) -> Result<WriteHandle> {
    let (jobs, queue) = mpsc::channel::<Job>();
    thread::Builder::new()
        .name("todoledger-db-writer".to_string())
        .spawn(move || run(pool, queue))?;
    Ok(WriteHandle { jobs })
}

fn run(pool: DbPool, queue: mpsc::Receiver<Job>) {
    let mut conn = match get_connection(&pool) {
        Ok(conn) => conn,
        Err(err) => {
            error!("[Storage] Writer could not get a connection: {}", err);
            return;
        }
    };
    for job in queue {
        job(&mut *conn);
    }
    debug!("[Storage] Writer stopped");
}
