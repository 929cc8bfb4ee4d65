//! In-memory ledger that both serves and accepts transactions.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use todoledger_core::{
    EncryptedRecord, EventSink, GroupDirectory, GroupIndex, MemoryCacheStore, MemoryRecordCache,
    SecretKey, ServiceContext, TaskRecord, Todo, TodoConfig, TodoEvent, Transaction,
    TransactionFeed,
};

use crate::error::{Result, ServiceError};
use crate::keyring::KeyRing;
use crate::service::TodoService;
use crate::submit::{DataSubmission, GroupChange, LedgerSubmitter, SubmitReceipt};

pub const ACCOUNT_ID: i64 = 3;
const OTHER_ACCOUNT_ID: i64 = 4;

#[derive(Default)]
struct LedgerState {
    next_transaction_id: i64,
    next_group_id: i64,
    transactions: HashMap<i64, Vec<Transaction>>,
    members: BTreeSet<i64>,
    submissions: Vec<DataSubmission>,
    rejection: Option<(u16, String)>,
}

impl LedgerState {
    fn next_id(&mut self) -> i64 {
        self.next_transaction_id += 1;
        self.next_transaction_id
    }

    fn append(
        &mut self,
        account_id: i64,
        list_id: i64,
        group_index: u16,
        payload: Vec<u8>,
        target: Option<i64>,
    ) -> i64 {
        let transaction_id = self.next_id();
        self.transactions.entry(list_id).or_default().push(Transaction {
            transaction_id,
            account_id,
            timestamp: transaction_id * 1000,
            group_id: list_id,
            group_index,
            payload,
            target_transaction_id: target,
        });
        transaction_id
    }
}

pub struct FakeLedger {
    state: Mutex<LedgerState>,
    download_calls: AtomicUsize,
    waiting_submissions: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                next_transaction_id: 1000,
                next_group_id: 100,
                ..LedgerState::default()
            }),
            download_calls: AtomicUsize::new(0),
            waiting_submissions: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    /// A task written into `list_id` by another account.
    pub fn seed_task(&self, list_id: i64, key: &SecretKey, text: &str) -> i64 {
        let payload = EncryptedRecord::encrypt(key, &TaskRecord::new(text))
            .unwrap()
            .to_bytes();
        self.state.lock().unwrap().append(
            OTHER_ACCOUNT_ID,
            list_id,
            GroupIndex::Task.as_u16(),
            payload,
            None,
        )
    }

    pub fn join(&self, list_id: i64) {
        self.state.lock().unwrap().members.insert(list_id);
    }

    pub fn is_member(&self, list_id: i64) -> bool {
        self.state.lock().unwrap().members.contains(&list_id)
    }

    pub fn submissions(&self) -> Vec<DataSubmission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn reject_next(&self, code: u16, message: &str) {
        self.state.lock().unwrap().rejection = Some((code, message.to_string()));
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn waiting_submissions(&self) -> usize {
        self.waiting_submissions.load(Ordering::SeqCst)
    }

    /// Makes every submission wait for one permit of the returned semaphore.
    pub fn hold_submissions(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn release_submissions(&self) {
        *self.gate.lock().unwrap() = None;
    }

    async fn admit(&self) -> Result<()> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.waiting_submissions.fetch_add(1, Ordering::SeqCst);
            gate.acquire().await.unwrap().forget();
            self.waiting_submissions.fetch_sub(1, Ordering::SeqCst);
        }
        match self.state.lock().unwrap().rejection.take() {
            Some((code, message)) => Err(ServiceError::rejected(code, message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TransactionFeed for FakeLedger {
    async fn download_transactions(
        &self,
        list_id: i64,
        minimal_transaction_id: i64,
        _include_attachments: bool,
    ) -> todoledger_core::Result<Vec<Transaction>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .get(&list_id)
            .map(|txs| {
                txs.iter()
                    .filter(|tx| tx.transaction_id >= minimal_transaction_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl GroupDirectory for FakeLedger {
    async fn download_group_ids(&self, _account_id: i64) -> todoledger_core::Result<Vec<i64>> {
        Ok(self.state.lock().unwrap().members.iter().copied().collect())
    }
}

#[async_trait]
impl LedgerSubmitter for FakeLedger {
    async fn register_group(&self, account_id: i64) -> Result<SubmitReceipt> {
        self.admit().await?;
        let mut state = self.state.lock().unwrap();
        state.next_group_id += 1;
        let list_id = state.next_group_id;
        state.members.insert(list_id);
        let transaction_id = state.append(account_id, list_id, 0, Vec::new(), None);
        Ok(SubmitReceipt {
            transaction_id,
            new_group_id: Some(list_id),
        })
    }

    async fn administer_group(
        &self,
        account_id: i64,
        list_id: i64,
        change: GroupChange,
    ) -> Result<SubmitReceipt> {
        self.admit().await?;
        let mut state = self.state.lock().unwrap();
        match change {
            GroupChange::AddSelf => {
                state.members.insert(list_id);
            }
            GroupChange::RemoveSelf => {
                state.members.remove(&list_id);
            }
            GroupChange::ApproveAdmin { .. } | GroupChange::RemoveAccount { .. } => {}
        }
        let transaction_id = state.append(account_id, list_id, 0, Vec::new(), None);
        Ok(SubmitReceipt {
            transaction_id,
            new_group_id: None,
        })
    }

    async fn submit_data(&self, submission: DataSubmission) -> Result<SubmitReceipt> {
        self.admit().await?;
        let mut state = self.state.lock().unwrap();
        let transaction_id = state.append(
            submission.account_id,
            submission.list_id,
            submission.group_index.as_u16(),
            submission.payload.clone(),
            submission.target_transaction_id,
        );
        state.submissions.push(submission);
        Ok(SubmitReceipt {
            transaction_id,
            new_group_id: None,
        })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TodoEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<TodoEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: TodoEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub ledger: Arc<FakeLedger>,
    pub key_ring: Arc<KeyRing>,
    pub sink: Arc<RecordingSink>,
    pub service: Arc<TodoService>,
}

impl Harness {
    pub fn new() -> Self {
        let ledger = Arc::new(FakeLedger::new());
        let key_ring = Arc::new(KeyRing::new([9u8; 32]));
        let sink = Arc::new(RecordingSink::default());
        let context = Arc::new(ServiceContext {
            account_id: ACCOUNT_ID,
            config: TodoConfig::default(),
            feed: ledger.clone(),
            directory: ledger.clone(),
            secret_keys: key_ring.clone(),
            record_cache: Arc::new(MemoryRecordCache::new()),
            cache_store: Arc::new(MemoryCacheStore::new()),
            event_sink: sink.clone(),
        });
        let service = Arc::new(TodoService::new(
            Todo::new(context),
            ledger.clone(),
            key_ring.clone(),
        ));
        Self {
            ledger,
            key_ring,
            sink,
            service,
        }
    }
}
