//! Worker node: one replica of one partition, acting as a 2PC participant.
//!
//! [`Participant`] is the in-memory state machine (committed balances plus
//! prepared effect lists). [`WorkerNode`] wraps it behind a single lock and
//! adds durability: every COMMIT appends to the shared ledger and rewrites
//! the replica's snapshot before the lock is released.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::Amount;
use crate::config::WorkerConfig;
use crate::model::{Account, AccountId, Effect, LedgerRecord, Operation, TxId};
use crate::protocol::{self, ErrorKind, WorkerReply, WorkerRequest};
use crate::storage::{Ledger, SnapshotFile, StorageError};
use crate::topology::NodeId;

mod error;
pub use error::{CommitError, NodeError, PrepareError};

mod plan;
pub use plan::{Ownership, check_reservations, local_effects};

mod state;
pub use state::AccountEntry;

/// In-memory participant state of one replica.
#[derive(Debug)]
pub struct Participant {
    accounts: BTreeMap<AccountId, AccountEntry>,
    /// Effects voted READY but not yet committed or aborted
    prepared: HashMap<TxId, Vec<Effect>>,
    ownership: Ownership,
}

/// Public API
impl Participant {
    pub fn new(ownership: Ownership) -> Self {
        Self {
            accounts: BTreeMap::new(),
            prepared: HashMap::new(),
            ownership,
        }
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>, ownership: Ownership) -> Self {
        let mut participant = Self::new(ownership);
        for account in accounts {
            participant
                .accounts
                .insert(account.id, AccountEntry::from(&account));
        }
        participant
    }

    /// Phase 1: validate `operation` locally and reserve its effects under
    /// `tx_id`. Nothing is recorded when validation fails.
    pub fn prepare(&mut self, tx_id: TxId, operation: &Operation) -> Result<usize, PrepareError> {
        if self.prepared.contains_key(&tx_id) {
            return Err(PrepareError::AlreadyPrepared(tx_id));
        }
        let effects = local_effects(operation, &self.accounts, &self.ownership)?;
        check_reservations(&effects, &self.accounts, &self.prepared)?;

        let count = effects.len();
        // Even an empty effect list is stored so the COMMIT that follows is recognised
        self.prepared.insert(tx_id, effects);
        Ok(count)
    }

    /// Phase 2: apply every prepared effect of `tx_id` and return the ledger
    /// records describing them.
    pub fn commit(
        &mut self,
        tx_id: &TxId,
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerRecord>, CommitError> {
        let effects = self
            .prepared
            .remove(tx_id)
            .ok_or_else(|| CommitError::WithoutPrepare(tx_id.clone()))?;

        let mut records = Vec::with_capacity(effects.len());
        for effect in effects {
            let kind = effect.kind();
            let account = effect.account();
            let amount = match effect {
                Effect::Debit { account, amount } => {
                    if let Some(entry) = self.entry_mut(account, tx_id) {
                        entry.debit(amount);
                    }
                    amount
                }
                Effect::Credit { account, amount } => {
                    if let Some(entry) = self.entry_mut(account, tx_id) {
                        entry.credit(amount);
                    }
                    amount
                }
                Effect::Create {
                    account,
                    initial,
                    owner,
                    opened_on,
                } => {
                    self.accounts.insert(
                        account,
                        AccountEntry {
                            balance: initial,
                            owner,
                            opened_on: Some(opened_on),
                        },
                    );
                    initial
                }
                Effect::Delete { account } => self
                    .accounts
                    .remove(&account)
                    .map(|e| e.balance)
                    .unwrap_or_default(),
            };
            records.push(LedgerRecord {
                tx_id: tx_id.clone(),
                account,
                kind,
                amount,
                timestamp: now,
            });
        }
        Ok(records)
    }

    /// Discard `tx_id` if it was prepared. Returns whether anything was dropped.
    pub fn abort(&mut self, tx_id: &TxId) -> bool {
        self.prepared.remove(tx_id).is_some()
    }

    /// Committed state of one account.
    pub fn account(&self, account: AccountId) -> Option<Account> {
        self.accounts.get(&account).map(|e| e.to_account(account))
    }

    /// Sum of committed balances; prepared effects are not included.
    /// `None` when the total does not fit in an [`Amount`].
    pub fn sum(&self) -> Option<Amount> {
        Amount::checked_sum(self.accounts.values().map(|e| e.balance))
    }

    /// Committed accounts in id order.
    pub fn accounts(&self) -> impl Iterator<Item = Account> + '_ {
        self.accounts.iter().map(|(&id, e)| e.to_account(id))
    }

    pub fn is_prepared(&self, tx_id: &TxId) -> bool {
        self.prepared.contains_key(tx_id)
    }

    pub fn prepared_count(&self) -> usize {
        self.prepared.len()
    }
}

/// Private API
impl Participant {
    fn entry_mut(&mut self, account: AccountId, tx_id: &TxId) -> Option<&mut AccountEntry> {
        let entry = self.accounts.get_mut(&account);
        if entry.is_none() {
            // reservations make this unreachable unless the state was edited behind our back
            error!(tx_id = %tx_id, account, "prepared effect targets a missing account");
        }
        entry
    }
}

/// A worker replica: participant state behind one lock, plus durable storage.
pub struct WorkerNode {
    id: NodeId,
    state: Mutex<Participant>,
    snapshot: SnapshotFile,
    ledger: Option<Ledger>,
}

impl WorkerNode {
    pub fn new(
        id: NodeId,
        participant: Participant,
        snapshot: SnapshotFile,
        ledger: Option<Ledger>,
    ) -> Self {
        Self {
            id,
            state: Mutex::new(participant),
            snapshot,
            ledger,
        }
    }

    /// Open the replica described by `config`, loading its snapshot.
    pub fn open(config: &WorkerConfig) -> Result<Self, StorageError> {
        let snapshot = SnapshotFile::new(&config.snapshot);
        let accounts = snapshot.load()?;
        let ownership = Ownership::Partition {
            index: config.partition,
            count: config.partition_count,
        };
        info!(
            node = config.node.id,
            partition = config.partition,
            accounts = accounts.len(),
            "worker state loaded"
        );
        Ok(Self::new(
            config.node.id,
            Participant::with_accounts(accounts, ownership),
            snapshot,
            config.ledger.as_ref().map(Ledger::new),
        ))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Decode, execute and encode one wire line.
    pub async fn handle_line(&self, line: &str) -> String {
        let reply = match protocol::decode::<WorkerRequest>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(node = self.id, reason = %e, "rejected request");
                WorkerReply::error(e.kind(), e.to_string(), None)
            }
        };
        protocol::encode(&reply)
    }

    pub async fn handle(&self, request: WorkerRequest) -> WorkerReply {
        match request {
            WorkerRequest::PrepareTransfer {
                tx_id,
                from,
                to,
                amount,
            } => {
                self.prepare_reply(tx_id, Operation::Transfer { from, to, amount })
                    .await
            }
            WorkerRequest::PrepareCreate {
                tx_id,
                account,
                initial,
                id_cliente,
                fecha_apertura,
            } => {
                let operation = Operation::Create {
                    account,
                    initial,
                    owner: id_cliente,
                    opened_on: fecha_apertura,
                };
                self.prepare_reply(tx_id, operation).await
            }
            WorkerRequest::PrepareDelete { tx_id, account } => {
                self.prepare_reply(tx_id, Operation::Delete { account })
                    .await
            }
            WorkerRequest::Commit { tx_id } => match self.commit(&tx_id).await {
                Ok(()) => WorkerReply::committed(tx_id),
                Err(e) => WorkerReply::error(e.kind(), e.to_string(), Some(tx_id)),
            },
            WorkerRequest::Abort { tx_id } => {
                self.abort(&tx_id).await;
                WorkerReply::aborted(tx_id)
            }
            WorkerRequest::Query { account } => match self.query(account).await {
                Ok(a) => WorkerReply::account(a.id, a.balance, a.owner, a.opened_on),
                Err(e) => WorkerReply::error(e.kind(), e.to_string(), None),
            },
            WorkerRequest::SumPartition => match self.sum().await {
                Ok(sum) => WorkerReply::sum(sum),
                Err(e) => WorkerReply::error(e.kind(), e.to_string(), None),
            },
        }
    }

    async fn prepare_reply(&self, tx_id: TxId, operation: Operation) -> WorkerReply {
        match self.prepare(tx_id.clone(), &operation).await {
            Ok(()) => WorkerReply::ready(tx_id),
            Err(e) => WorkerReply::error(e.kind(), e.to_string(), Some(tx_id)),
        }
    }

    pub async fn prepare(&self, tx_id: TxId, operation: &Operation) -> Result<(), NodeError> {
        let mut state = self.state.lock().await;
        let result = state.prepare(tx_id.clone(), operation);
        match &result {
            Ok(effects) => info!(
                node = self.id,
                tx_id = %tx_id,
                op = operation.name(),
                effects,
                "prepared"
            ),
            Err(e) if e.kind() == ErrorKind::Protocol => {
                warn!(node = self.id, tx_id = %tx_id, reason = %e, "prepare rejected")
            }
            Err(e) => info!(
                node = self.id,
                tx_id = %tx_id,
                op = operation.name(),
                reason = %e,
                "prepare refused"
            ),
        }
        result.map(|_| ()).map_err(NodeError::from)
    }

    pub async fn commit(&self, tx_id: &TxId) -> Result<(), NodeError> {
        let mut state = self.state.lock().await;
        let records = match state.commit(tx_id, Utc::now()) {
            Ok(records) => records,
            Err(e) => {
                warn!(node = self.id, tx_id = %tx_id, reason = %e, "commit rejected");
                return Err(e.into());
            }
        };

        // Persist while still holding the lock so snapshots never interleave
        let accounts: Vec<Account> = state.accounts().collect();
        let snapshot = self.snapshot.clone();
        let ledger = self.ledger.clone();
        let effects = records.len();
        let persisted = tokio::task::spawn_blocking(move || {
            let appended = match ledger {
                Some(ledger) => ledger.append(&records),
                None => Ok(()),
            };
            (appended, snapshot.store(&accounts))
        })
        .await;

        match persisted {
            Ok((appended, stored)) => {
                if let Err(e) = &appended {
                    error!(node = self.id, tx_id = %tx_id, reason = %e, "committed but ledger append failed");
                }
                if let Err(e) = &stored {
                    error!(node = self.id, tx_id = %tx_id, reason = %e, "committed but snapshot write failed");
                }
                if appended.is_ok() && stored.is_ok() {
                    info!(node = self.id, tx_id = %tx_id, effects, "committed");
                }
            }
            Err(e) => {
                error!(node = self.id, tx_id = %tx_id, reason = %e, "committed but persistence task failed")
            }
        }
        Ok(())
    }

    /// Idempotent: aborting an unknown transaction is a no-op.
    pub async fn abort(&self, tx_id: &TxId) {
        let dropped = self.state.lock().await.abort(tx_id);
        info!(node = self.id, tx_id = %tx_id, dropped, "aborted");
    }

    pub async fn query(&self, account: AccountId) -> Result<Account, NodeError> {
        self.state
            .lock()
            .await
            .account(account)
            .ok_or(NodeError::AccountNotFound(account))
    }

    pub async fn sum(&self) -> Result<Amount, NodeError> {
        let sum = self.state.lock().await.sum();
        if sum.is_none() {
            error!(node = self.id, "partition sum overflows");
        }
        sum.ok_or(NodeError::SumOverflow)
    }

    pub async fn prepared_count(&self) -> usize {
        self.state.lock().await.prepared_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EffectKind;
    use crate::protocol::Status;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    // test utils

    const P0_OF_2: Ownership = Ownership::Partition { index: 0, count: 2 };

    fn account(id: AccountId, cents: i64) -> Account {
        Account {
            id,
            balance: Amount::from_scaled(cents),
            owner: None,
            opened_on: None,
        }
    }

    fn participant(entries: &[(AccountId, i64)]) -> Participant {
        Participant::with_accounts(entries.iter().map(|&(id, c)| account(id, c)), P0_OF_2)
    }

    fn transfer(from: AccountId, to: AccountId, cents: i64) -> Operation {
        Operation::Transfer {
            from,
            to,
            amount: Amount::from_scaled(cents),
        }
    }

    fn balance(p: &Participant, id: AccountId) -> Amount {
        p.account(id).unwrap().balance
    }

    fn tx(id: &str) -> TxId {
        TxId::from(id)
    }

    // Participant

    #[test]
    fn prepare_then_commit_applies_transfer() {
        let mut p = participant(&[(1000, 50_000), (1002, 20_000)]);
        assert_eq!(p.prepare(tx("t1"), &transfer(1000, 1002, 5_000)), Ok(2));
        let records = p.commit(&tx("t1"), Utc::now()).unwrap();

        assert_eq!(balance(&p, 1000), Amount::from_scaled(45_000));
        assert_eq!(balance(&p, 1002), Amount::from_scaled(25_000));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, EffectKind::Debit);
        assert_eq!(records[1].kind, EffectKind::Credit);
        assert!(!p.is_prepared(&tx("t1")));
    }

    #[test]
    fn prepared_effects_are_invisible_until_commit() {
        let mut p = participant(&[(1000, 50_000), (1002, 20_000)]);
        p.prepare(tx("t1"), &transfer(1000, 1002, 5_000)).unwrap();

        assert_eq!(balance(&p, 1000), Amount::from_scaled(50_000));
        assert_eq!(p.sum(), Some(Amount::from_scaled(70_000)));
    }

    #[test]
    fn abort_leaves_no_trace() {
        let mut p = participant(&[(1000, 50_000), (1002, 20_000)]);
        p.prepare(tx("t1"), &transfer(1000, 1002, 5_000)).unwrap();
        assert!(p.abort(&tx("t1")));

        assert_eq!(balance(&p, 1000), Amount::from_scaled(50_000));
        assert_eq!(balance(&p, 1002), Amount::from_scaled(20_000));
        assert_eq!(p.prepared_count(), 0);
    }

    #[test]
    fn abort_is_idempotent() {
        let mut p = participant(&[]);
        assert!(!p.abort(&tx("never")));
        assert!(!p.abort(&tx("never")));
    }

    #[test]
    fn commit_without_prepare_fails() {
        let mut p = participant(&[(1000, 100)]);
        assert_eq!(
            p.commit(&tx("ghost"), Utc::now()),
            Err(CommitError::WithoutPrepare(tx("ghost")))
        );
    }

    #[test]
    fn commit_after_abort_fails() {
        let mut p = participant(&[(1000, 50_000), (1002, 0)]);
        p.prepare(tx("t1"), &transfer(1000, 1002, 100)).unwrap();
        p.abort(&tx("t1"));
        assert!(p.commit(&tx("t1"), Utc::now()).is_err());
    }

    #[test]
    fn re_prepare_is_a_protocol_error() {
        let mut p = participant(&[(1000, 50_000), (1002, 0)]);
        p.prepare(tx("t1"), &transfer(1000, 1002, 100)).unwrap();
        let err = p.prepare(tx("t1"), &transfer(1000, 1002, 100)).unwrap_err();
        assert_eq!(err, PrepareError::AlreadyPrepared(tx("t1")));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn failed_prepare_records_nothing() {
        let mut p = participant(&[(1000, 45_000), (1002, 0)]);
        let err = p.prepare(tx("t1"), &transfer(1000, 1002, 999_900)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!p.is_prepared(&tx("t1")));
    }

    #[test]
    fn unrelated_transfer_is_prepared_empty() {
        let mut p = participant(&[(1000, 100)]);
        assert_eq!(p.prepare(tx("t1"), &transfer(1001, 1003, 50)), Ok(0));
        assert!(p.commit(&tx("t1"), Utc::now()).unwrap().is_empty());
        assert_eq!(p.sum(), Some(Amount::from_scaled(100)));
    }

    #[test]
    fn concurrent_debits_cannot_overdraw() {
        let mut p = participant(&[(1000, 50_000), (1002, 0), (1004, 0)]);
        p.prepare(tx("t1"), &transfer(1000, 1002, 40_000)).unwrap();
        assert!(matches!(
            p.prepare(tx("t2"), &transfer(1000, 1004, 40_000)),
            Err(PrepareError::InsufficientFunds(1000, _, _))
        ));
        p.commit(&tx("t1"), Utc::now()).unwrap();
        assert!(!balance(&p, 1000).is_negative());
    }

    #[test]
    fn interleaved_transfers_match_a_serial_order() {
        let mut p = participant(&[(1000, 10_000), (1002, 10_000)]);
        p.prepare(tx("a"), &transfer(1000, 1002, 3_000)).unwrap();
        p.prepare(tx("b"), &transfer(1002, 1000, 1_000)).unwrap();
        p.commit(&tx("b"), Utc::now()).unwrap();
        p.commit(&tx("a"), Utc::now()).unwrap();

        assert_eq!(balance(&p, 1000), Amount::from_scaled(8_000));
        assert_eq!(balance(&p, 1002), Amount::from_scaled(12_000));
        assert_eq!(p.sum(), Some(Amount::from_scaled(20_000)));
    }

    #[test]
    fn overflowing_credit_is_refused_before_commit() {
        let rich = 9_000_000_000_000_000_000;
        let mut p = participant(&[(1000, rich), (1002, rich)]);
        let err = p
            .prepare(tx("t1"), &transfer(1000, 1002, 1_000_000_000_000_000_000))
            .unwrap_err();
        assert_eq!(err, PrepareError::BalanceOverflow(1002));

        assert!(!p.is_prepared(&tx("t1")));
        assert_eq!(balance(&p, 1000), Amount::from_scaled(rich));
        assert_eq!(balance(&p, 1002), Amount::from_scaled(rich));
    }

    #[test]
    fn stacked_credits_cannot_overflow_at_commit() {
        let mut p = participant(&[(1000, i64::MAX - 100), (1002, 100), (1004, 100)]);
        p.prepare(tx("t1"), &transfer(1002, 1000, 60)).unwrap();
        assert_eq!(
            p.prepare(tx("t2"), &transfer(1004, 1000, 60)),
            Err(PrepareError::BalanceOverflow(1000))
        );
        p.commit(&tx("t1"), Utc::now()).unwrap();
        assert_eq!(balance(&p, 1000), Amount::from_scaled(i64::MAX - 40));
    }

    #[test]
    fn sum_reports_overflow() {
        let p = participant(&[(1000, i64::MAX), (1002, 1)]);
        assert_eq!(p.sum(), None);
    }

    #[test]
    fn create_then_delete_removes_account() {
        let mut p = participant(&[]);
        let opened_on = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let create = Operation::Create {
            account: 20_000,
            initial: Amount::from_scaled(10_000),
            owner: Some(5),
            opened_on,
        };
        p.prepare(tx("c"), &create).unwrap();
        p.commit(&tx("c"), Utc::now()).unwrap();

        let created = p.account(20_000).unwrap();
        assert_eq!(created.owner, Some(5));
        assert_eq!(created.opened_on, Some(opened_on));

        p.prepare(tx("d"), &Operation::Delete { account: 20_000 })
            .unwrap();
        let records = p.commit(&tx("d"), Utc::now()).unwrap();
        assert!(p.account(20_000).is_none());
        assert_eq!(records[0].kind, EffectKind::Delete);
        assert_eq!(records[0].amount, Amount::from_scaled(10_000));
    }

    // WorkerNode

    fn node(dir: &TempDir, entries: &[(AccountId, i64)]) -> WorkerNode {
        WorkerNode::new(
            1,
            participant(entries),
            SnapshotFile::new(dir.path().join("p0.csv")),
            Some(Ledger::new(dir.path().join("ledger.csv"))),
        )
    }

    #[tokio::test]
    async fn commit_persists_snapshot_and_ledger() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir, &[(1000, 50_000), (1002, 20_000)]);

        node.prepare(tx("t1"), &transfer(1000, 1002, 5_000))
            .await
            .unwrap();
        node.commit(&tx("t1")).await.unwrap();

        let stored = SnapshotFile::new(dir.path().join("p0.csv")).load().unwrap();
        assert_eq!(stored, vec![account(1000, 45_000), account(1002, 25_000)]);

        let history = Ledger::new(dir.path().join("ledger.csv"))
            .history(1000, 10)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, EffectKind::Debit);
    }

    #[tokio::test]
    async fn snapshot_is_stored_even_when_ledger_append_fails() {
        let dir = TempDir::new().unwrap();
        // a directory cannot be opened for appending
        let node = WorkerNode::new(
            1,
            participant(&[(1000, 50_000), (1002, 20_000)]),
            SnapshotFile::new(dir.path().join("p0.csv")),
            Some(Ledger::new(dir.path())),
        );

        node.prepare(tx("t1"), &transfer(1000, 1002, 5_000))
            .await
            .unwrap();
        node.commit(&tx("t1")).await.unwrap();

        let stored = SnapshotFile::new(dir.path().join("p0.csv")).load().unwrap();
        assert_eq!(stored, vec![account(1000, 45_000), account(1002, 25_000)]);
    }

    #[tokio::test]
    async fn overflowing_sum_is_an_error_reply() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p0.csv");
        std::fs::write(&path, "1000,90000000000000000.00\n1002,90000000000000000.00\n").unwrap();
        let node = WorkerNode::new(
            1,
            Participant::with_accounts(SnapshotFile::new(&path).load().unwrap(), P0_OF_2),
            SnapshotFile::new(&path),
            None,
        );

        assert_eq!(node.sum().await, Err(NodeError::SumOverflow));
        let reply = node.handle(WorkerRequest::SumPartition).await;
        assert_eq!(reply.status, Status::Error);
        assert_eq!(reply.code, Some(ErrorKind::Conflict));
        assert_eq!(reply.sum, None);
    }

    #[tokio::test]
    async fn handle_maps_replies() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir, &[(1000, 50_000)]);

        let reply = node.handle(WorkerRequest::Query { account: 1000 }).await;
        assert_eq!(reply.status, Status::Ok);
        assert_eq!(reply.balance, Some(Amount::from_scaled(50_000)));

        let reply = node.handle(WorkerRequest::Query { account: 4242 }).await;
        assert_eq!(reply.status, Status::Error);
        assert_eq!(reply.code, Some(ErrorKind::NotFound));

        let reply = node.handle(WorkerRequest::SumPartition).await;
        assert_eq!(reply.sum, Some(Amount::from_scaled(50_000)));

        let reply = node
            .handle(WorkerRequest::Commit { tx_id: tx("ghost") })
            .await;
        assert_eq!(reply.status, Status::Error);
        assert_eq!(reply.code, Some(ErrorKind::Protocol));
        assert!(reply.error_message().contains("COMMIT_WITHOUT_PREPARE"));

        let reply = node.handle(WorkerRequest::Abort { tx_id: tx("ghost") }).await;
        assert_eq!(reply.status, Status::Aborted);
    }

    #[tokio::test]
    async fn handle_line_answers_garbage_with_error() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir, &[]);

        let line = node.handle_line("{{{").await;
        let reply: WorkerReply = serde_json::from_str(&line).unwrap();
        assert_eq!(reply.status, Status::Error);
        assert_eq!(reply.code, Some(ErrorKind::Protocol));

        let line = node.handle_line(r#"{"type":"SUM_PARTITION"}"#).await;
        assert_eq!(line, r#"{"status":"OK","sum":0.0}"#);
    }

    #[tokio::test]
    async fn open_loads_snapshot_with_partition_ownership() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p1.csv");
        std::fs::write(&path, "1001,10.00\n1003,5.50\n").unwrap();

        let config = WorkerConfig {
            node: crate::topology::NodeInfo {
                id: 7,
                host: "127.0.0.1".to_string(),
                port: 0,
                data: Some(path.clone()),
            },
            partition: 1,
            partition_count: 2,
            snapshot: path,
            ledger: None,
        };
        let node = WorkerNode::open(&config).unwrap();
        assert_eq!(node.id(), 7);
        assert_eq!(node.sum().await, Ok(Amount::from_scaled(1_550)));

        // 1005 is owned by partition 1 but not held
        let err = node
            .prepare(tx("t1"), &transfer(1001, 1005, 100))
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::Prepare(PrepareError::AccountNotFound(1005)));
    }
}
