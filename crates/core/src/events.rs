//! Notifications emitted after sync and mutation outcomes.
//!
//! Delivery is fire-and-forget: the core never awaits a subscriber.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::list::ListSyncReport;

/// Classification of a collection or list query outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryResult {
    StoredData,
    DownloadingData,
    LiveData,
    DownloadError,
}

/// Classification of a remote-mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    Ok,
    Busy,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TodoEvent {
    CollectionQueried {
        result: QueryResult,
    },
    ListDownloading {
        list_id: i64,
    },
    ListUpdated {
        list_id: i64,
        report: ListSyncReport,
    },
    ListDownloadFailed {
        list_id: i64,
    },
    ListRegistered {
        outcome: SubmitOutcome,
        list_id: Option<i64>,
    },
    InvitationSent {
        outcome: SubmitOutcome,
        list_id: i64,
        account_id: i64,
    },
    InvitationAccepted {
        outcome: SubmitOutcome,
        list_id: i64,
    },
    ListUserDeleted {
        outcome: SubmitOutcome,
        list_id: i64,
        account_id: i64,
    },
    ListDeleted {
        outcome: SubmitOutcome,
        list_id: i64,
    },
    ListRenamed {
        outcome: SubmitOutcome,
        list_id: i64,
    },
    TaskSubmitted {
        outcome: SubmitOutcome,
        list_id: i64,
    },
    TaskStatusChanged {
        outcome: SubmitOutcome,
        list_id: i64,
        task_id: i64,
    },
}

/// Sink for [`TodoEvent`]s. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TodoEvent);
}

/// Fans events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<TodoEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TodoEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: TodoEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}
