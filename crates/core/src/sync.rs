//! Serializes sync cycles over a shared collection.
//!
//! The collection lives behind one async mutex, so aggregate mutation and
//! persistence never interleave. A request for a target that already has a
//! cycle in flight is coalesced instead of queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use log::debug;
use tokio::sync::Mutex as AsyncMutex;

use crate::collection::Todo;
use crate::errors::Result;
use crate::list::ListSyncReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTarget {
    Collection,
    List(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRun<T> {
    Ran(T),
    /// Another cycle for the same target was already running.
    Coalesced,
}

impl<T> SyncRun<T> {
    pub fn ran(self) -> Option<T> {
        match self {
            Self::Ran(value) => Some(value),
            Self::Coalesced => None,
        }
    }

    pub fn is_coalesced(&self) -> bool {
        matches!(self, Self::Coalesced)
    }
}

struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<SyncTarget>>>,
    target: SyncTarget,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.target);
        }
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    todo: Arc<AsyncMutex<Todo>>,
    in_flight: Arc<Mutex<HashSet<SyncTarget>>>,
}

impl SyncEngine {
    pub fn new(todo: Todo) -> Self {
        Self {
            todo: Arc::new(AsyncMutex::new(todo)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn todo(&self) -> Arc<AsyncMutex<Todo>> {
        Arc::clone(&self.todo)
    }

    fn begin(&self, target: SyncTarget) -> Option<InFlightGuard> {
        let mut in_flight = self.in_flight.lock().ok()?;
        if !in_flight.insert(target) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            target,
        })
    }

    pub async fn sync_list(&self, list_id: i64) -> Result<SyncRun<ListSyncReport>> {
        let Some(_guard) = self.begin(SyncTarget::List(list_id)) else {
            debug!("[TodoSync] Sync of list {} already in flight", list_id);
            return Ok(SyncRun::Coalesced);
        };
        let mut todo = self.todo.lock().await;
        todo.sync_list(list_id).await.map(SyncRun::Ran)
    }

    pub async fn sync_all(&self) -> Result<SyncRun<Vec<ListSyncReport>>> {
        let Some(_guard) = self.begin(SyncTarget::Collection) else {
            debug!("[TodoSync] Collection refresh already in flight");
            return Ok(SyncRun::Coalesced);
        };
        let mut todo = self.todo.lock().await;
        todo.sync_all().await.map(SyncRun::Ran)
    }

    pub async fn lists_missing_key(&self, secret_id: u64) -> Vec<i64> {
        self.todo.lock().await.lists_missing_key(secret_id)
    }

    /// Runs `f` with exclusive access to the collection.
    pub async fn with_todo<R>(&self, f: impl FnOnce(&mut Todo) -> R) -> R {
        let mut todo = self.todo.lock().await;
        f(&mut todo)
    }
}
