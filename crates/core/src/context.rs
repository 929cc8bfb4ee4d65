use std::sync::Arc;

use crate::cache::{CacheStore, RecordCache};
use crate::config::TodoConfig;
use crate::events::{EventSink, TodoEvent};
use crate::remote::{GroupDirectory, TransactionFeed};
use crate::secrets::SecretKeyRegistry;

/// Collaborators shared by the collection, its lists and the services on top.
pub struct ServiceContext {
    /// Remote account whose lists this context replays.
    pub account_id: i64,
    pub config: TodoConfig,

    pub feed: Arc<dyn TransactionFeed>,
    pub directory: Arc<dyn GroupDirectory>,
    pub secret_keys: Arc<dyn SecretKeyRegistry>,
    pub record_cache: Arc<dyn RecordCache>,
    pub cache_store: Arc<dyn CacheStore>,
    pub event_sink: Arc<dyn EventSink>,
}

impl ServiceContext {
    pub fn emit(&self, event: TodoEvent) {
        self.event_sink.emit(event);
    }
}
