//! Contract of the ledger client used to submit transactions.

use async_trait::async_trait;
use serde::Serialize;
use todoledger_core::GroupIndex;

use crate::error::Result;

/// Membership change requested through a group administration transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupChange {
    ApproveAdmin { account_id: i64 },
    AddSelf,
    RemoveAccount { account_id: i64 },
    RemoveSelf,
}

/// A data transaction carrying one encoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSubmission {
    pub account_id: i64,
    pub list_id: i64,
    pub group_index: GroupIndex,
    pub payload: Vec<u8>,
    pub target_transaction_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub transaction_id: i64,
    /// Set by group registrations.
    pub new_group_id: Option<i64>,
}

/// Sends transactions to the ledger and waits for their result.
///
/// Implementations map ledger refusals to `ServiceError::Rejected` and
/// connection failures to `ServiceError::Transport`.
#[async_trait]
pub trait LedgerSubmitter: Send + Sync {
    async fn register_group(&self, account_id: i64) -> Result<SubmitReceipt>;

    async fn administer_group(
        &self,
        account_id: i64,
        list_id: i64,
        change: GroupChange,
    ) -> Result<SubmitReceipt>;

    async fn submit_data(&self, submission: DataSubmission) -> Result<SubmitReceipt>;
}
