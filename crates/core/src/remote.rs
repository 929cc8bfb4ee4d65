//! Contracts of the remote ledger collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// An immutable, remotely appended ledger transaction.
///
/// `transaction_id` is the only ordering authority; `timestamp` is
/// informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: i64,
    pub account_id: i64,
    pub timestamp: i64,
    pub group_id: i64,
    pub group_index: u16,
    pub payload: Vec<u8>,
    pub target_transaction_id: Option<i64>,
}

/// Fetches the transactions of one list.
#[async_trait]
pub trait TransactionFeed: Send + Sync {
    /// Transactions of `list_id` with `transaction_id >= minimal_transaction_id`,
    /// in any order. One bounded remote call; timeouts surface as errors.
    async fn download_transactions(
        &self,
        list_id: i64,
        minimal_transaction_id: i64,
        include_attachments: bool,
    ) -> Result<Vec<Transaction>>;
}

/// Looks up the lists an account is a member of.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn download_group_ids(&self, account_id: i64) -> Result<Vec<i64>>;
}
