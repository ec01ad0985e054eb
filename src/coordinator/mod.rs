//! Coordinator: routes client requests to partition replicas and drives
//! two-phase commit for every mutation.
//!
//! Reads go to the first reachable replica of the owning partition.
//! Mutations are broadcast as PREPARE to every replica of every touched
//! partition; the transaction commits only if all of them vote READY.

use chrono::Local;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::Amount;
use crate::config::{ClusterConfig, CommitRetry};
use crate::model::{Account, AccountId, ClientId, LedgerRecord, Operation, PartitionId, TxId};
use crate::protocol::{
    self, ClientReply, ClientRequest, HistoryEntry, Status, WorkerReply, WorkerRequest,
};
use crate::storage::Ledger;
use crate::topology::{NodeId, NodeInfo, Topology};

mod error;
pub use error::CoordinatorError;

mod transport;
pub use transport::{TcpTransport, Transport};

mod txn;
pub use txn::{Decision, IllegalTransition, InFlightTx, TxState, Vote};

/// Records returned by CONSULTAR_TRANSACCIONES when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

pub struct Coordinator<T = TcpTransport> {
    topology: Topology,
    transport: Arc<T>,
    prepare_timeout: Duration,
    commit_retry: CommitRetry,
    ledger: Option<Ledger>,
    in_flight: Mutex<HashMap<TxId, InFlightTx>>,
    /// COMMITs still being redelivered after the foreground attempts ran out
    redeliveries: Arc<Mutex<HashSet<(TxId, NodeId)>>>,
}

/// How one participant answered the COMMIT of a decided transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitOutcome {
    Acked,
    Rejected,
    /// Handed to a background task that retries until the replica answers
    Deferred,
}

impl Coordinator<TcpTransport> {
    pub fn new(config: &ClusterConfig) -> Self {
        Self::with_transport(config, TcpTransport::new(config.timeouts))
    }
}

/// Public API
impl<T: Transport + 'static> Coordinator<T> {
    pub fn with_transport(config: &ClusterConfig, transport: T) -> Self {
        Self {
            topology: config.topology.clone(),
            transport: Arc::new(transport),
            prepare_timeout: config.timeouts.prepare(),
            commit_retry: config.commit_retry,
            ledger: config.ledger.as_ref().map(Ledger::new),
            in_flight: Mutex::new(HashMap::new()),
            redeliveries: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Number of transactions between PREPARE and the end of their decision round.
    pub fn in_flight(&self) -> usize {
        self.registry().len()
    }

    /// Number of (transaction, replica) pairs whose COMMIT is still being
    /// redelivered in the background.
    pub fn pending_commits(&self) -> usize {
        lock(&self.redeliveries).len()
    }

    /// Decode, execute and encode one client line.
    pub async fn handle_line(&self, line: &str) -> String {
        let reply = match protocol::decode::<ClientRequest>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(reason = %e, "rejected client request");
                ClientReply::error(e.kind(), e.to_string())
            }
        };
        protocol::encode(&reply)
    }

    pub async fn handle(&self, request: ClientRequest) -> ClientReply {
        let op = request.name();
        let result = match request {
            ClientRequest::QueryAccount { account } => {
                self.query_account(account).await.map(|a| ClientReply {
                    account: Some(a.id),
                    balance: Some(a.balance),
                    id_cliente: a.owner,
                    fecha_apertura: a.opened_on,
                    ..ClientReply::ok()
                })
            }
            ClientRequest::Transfer { from, to, amount } => {
                self.transfer(from, to, amount).await.map(|()| ClientReply {
                    mensaje: Some(format!("transferred {amount} from {from} to {to}")),
                    ..ClientReply::ok()
                })
            }
            ClientRequest::CreateAccount {
                account,
                initial,
                id_cliente,
            } => self
                .create_account(account, initial, id_cliente)
                .await
                .map(|()| ClientReply::ok()),
            ClientRequest::DeleteAccount { account } => self
                .delete_account(account)
                .await
                .map(|()| ClientReply::ok()),
            ClientRequest::Reconcile => self.reconcile().await.map(|total| ClientReply {
                total_balance: Some(total),
                ..ClientReply::ok()
            }),
            ClientRequest::History { account, limit } => {
                self.history(account, limit).await.map(|records| ClientReply {
                    data: Some(records.into_iter().map(HistoryEntry::from).collect()),
                    ..ClientReply::ok()
                })
            }
        };
        Self::log_result(op, &result);
        result.unwrap_or_else(|e| ClientReply::error(e.kind(), e.to_string()))
    }

    /// Balance and metadata of `account`, read from the first reachable
    /// replica of its partition.
    pub async fn query_account(&self, account: AccountId) -> Result<Account, CoordinatorError> {
        let partition = self.topology.partition_of(account);
        let reply = self
            .read(partition, &WorkerRequest::Query { account })
            .await?;
        let balance = reply
            .balance
            .ok_or_else(|| CoordinatorError::UnexpectedReply("account reply without balance".into()))?;
        Ok(Account {
            id: account,
            balance,
            owner: reply.id_cliente,
            opened_on: reply.fecha_apertura,
        })
    }

    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    ) -> Result<(), CoordinatorError> {
        if !amount.is_positive() {
            return Err(CoordinatorError::NonPositiveAmount(amount));
        }
        if from == to {
            return Err(CoordinatorError::SelfTransfer(from));
        }
        self.run_2pc(Operation::Transfer { from, to, amount }).await
    }

    /// Open `account` on every replica of its partition, dated today.
    pub async fn create_account(
        &self,
        account: AccountId,
        initial: Amount,
        owner: Option<ClientId>,
    ) -> Result<(), CoordinatorError> {
        if initial.is_negative() {
            return Err(CoordinatorError::NegativeInitialBalance(initial));
        }
        self.run_2pc(Operation::Create {
            account,
            initial,
            owner,
            opened_on: Local::now().date_naive(),
        })
        .await
    }

    pub async fn delete_account(&self, account: AccountId) -> Result<(), CoordinatorError> {
        self.run_2pc(Operation::Delete { account }).await
    }

    /// Sum of committed balances over all partitions, one replica each.
    /// Any partition without a reachable replica fails the whole sum.
    pub async fn reconcile(&self) -> Result<Amount, CoordinatorError> {
        let request = WorkerRequest::SumPartition;
        let partitions = self.topology.partition_count();
        let replies = join_all((0..partitions).map(|p| self.read(p, &request))).await;

        let mut total = Amount::ZERO;
        for reply in replies {
            let sum = reply?.sum.ok_or_else(|| {
                CoordinatorError::UnexpectedReply("SUM_PARTITION reply without sum".into())
            })?;
            total = total
                .checked_add(sum)
                .ok_or(CoordinatorError::TotalOverflow)?;
        }
        info!(total = %total, partitions, "reconciled");
        Ok(total)
    }

    /// Ledger records of `account`, newest first.
    pub async fn history(
        &self,
        account: AccountId,
        limit: Option<usize>,
    ) -> Result<Vec<LedgerRecord>, CoordinatorError> {
        let ledger = self.ledger.clone().ok_or(CoordinatorError::NoLedger)?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        let records = tokio::task::spawn_blocking(move || ledger.history(account, limit)).await??;
        Ok(records)
    }
}

/// Private API
impl<T: Transport + 'static> Coordinator<T> {
    /// Small helper to log `handle` results
    fn log_result<R>(op: &str, result: &Result<R, CoordinatorError>) {
        match result {
            Ok(_) => info!("{op} served"),
            Err(e) => info!(code = ?e.kind(), reason = %e, "{op} failed"),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<TxId, InFlightTx>> {
        lock(&self.in_flight)
    }

    fn with_tx<R>(
        &self,
        tx_id: &TxId,
        f: impl FnOnce(&mut InFlightTx) -> R,
    ) -> Result<R, CoordinatorError> {
        self.registry()
            .get_mut(tx_id)
            .map(f)
            .ok_or_else(|| CoordinatorError::UnexpectedReply(format!("transaction {tx_id} is not in flight")))
    }

    fn partitions_of(&self, operation: &Operation) -> Vec<PartitionId> {
        match *operation {
            Operation::Transfer { from, to, .. } => vec![
                self.topology.partition_of(from),
                self.topology.partition_of(to),
            ],
            Operation::Create { account, .. } | Operation::Delete { account } => {
                vec![self.topology.partition_of(account)]
            }
        }
    }

    /// Send `request` to the replicas of `partition` in order until one
    /// answers. Only unreachable replicas are skipped; an error reply is final.
    async fn read(
        &self,
        partition: PartitionId,
        request: &WorkerRequest,
    ) -> Result<WorkerReply, CoordinatorError> {
        for node in self.topology.replicas(partition) {
            match self.transport.send(node, request).await {
                Ok(reply) => {
                    return match reply.status {
                        Status::Ok => Ok(reply),
                        Status::Error => Err(CoordinatorError::Refused {
                            kind: reply.error_kind(),
                            message: reply.error_message().to_string(),
                        }),
                        other => Err(CoordinatorError::UnexpectedReply(format!(
                            "{other:?} from node {}",
                            node.id
                        ))),
                    };
                }
                Err(e) if e.is_unreachable() => {
                    warn!(node = node.id, partition, reason = %e, "replica unreachable")
                }
                Err(e) => return Err(CoordinatorError::UnexpectedReply(e.to_string())),
            }
        }
        Err(CoordinatorError::PartitionUnreachable(partition))
    }

    async fn run_2pc(&self, operation: Operation) -> Result<(), CoordinatorError> {
        let tx_id = TxId::generate();
        let participants = self.topology.participants(&self.partitions_of(&operation));
        self.registry().insert(
            tx_id.clone(),
            InFlightTx::new(tx_id.clone(), operation.clone(), participants.clone()),
        );

        let result = self.drive(&tx_id, &operation, &participants).await;
        self.registry().remove(&tx_id);
        result
    }

    async fn drive(
        &self,
        tx_id: &TxId,
        operation: &Operation,
        participants: &[NodeInfo],
    ) -> Result<(), CoordinatorError> {
        let prepare = WorkerRequest::prepare(tx_id, operation);
        let votes = join_all(
            participants
                .iter()
                .map(|node| self.collect_vote(tx_id, node, &prepare)),
        )
        .await;

        let decision = self.with_tx(tx_id, |tx| {
            for (node, vote) in participants.iter().zip(votes) {
                tx.record_vote(node.id, vote);
            }
            tx.decision()
        })?;

        match decision {
            Decision::Commit => {
                self.with_tx(tx_id, |tx| tx.advance(TxState::Committing))??;
                info!(
                    tx_id = %tx_id,
                    op = operation.name(),
                    participants = participants.len(),
                    "commit"
                );
                let outcomes = join_all(
                    participants
                        .iter()
                        .map(|node| self.deliver_commit(tx_id, node)),
                )
                .await;
                let count = |outcome: CommitOutcome| outcomes.iter().filter(|o| **o == outcome).count();
                let diverged = count(CommitOutcome::Rejected);
                if diverged > 0 {
                    error!(tx_id = %tx_id, diverged, "committed with replicas that rejected the decision");
                }
                let deferred = count(CommitOutcome::Deferred);
                if deferred > 0 {
                    warn!(tx_id = %tx_id, deferred, "committed, redelivery continues in background");
                }
                self.with_tx(tx_id, |tx| tx.advance(TxState::Committed))??;
                Ok(())
            }
            Decision::Abort(cause) => {
                self.with_tx(tx_id, |tx| tx.advance(TxState::Aborting))??;
                info!(
                    tx_id = %tx_id,
                    op = operation.name(),
                    participants = participants.len(),
                    "abort"
                );
                join_all(
                    participants
                        .iter()
                        .map(|node| self.deliver_abort(tx_id, node)),
                )
                .await;
                self.with_tx(tx_id, |tx| tx.advance(TxState::Aborted))??;
                Err(match cause {
                    Vote::Refused { kind, message } => CoordinatorError::Refused { kind, message },
                    Vote::Ready | Vote::Unreachable => CoordinatorError::VoteMissing,
                })
            }
        }
    }

    async fn collect_vote(&self, tx_id: &TxId, node: &NodeInfo, prepare: &WorkerRequest) -> Vote {
        match timeout(self.prepare_timeout, self.transport.send(node, prepare)).await {
            Err(_) => {
                warn!(tx_id = %tx_id, node = node.id, "prepare timed out");
                Vote::Unreachable
            }
            Ok(Err(e)) if e.is_unreachable() => {
                warn!(tx_id = %tx_id, node = node.id, reason = %e, "participant unreachable");
                Vote::Unreachable
            }
            Ok(Err(e)) => Vote::Refused {
                kind: e.kind(),
                message: e.to_string(),
            },
            Ok(Ok(reply)) => match reply.status {
                Status::Ready => Vote::Ready,
                Status::Error => Vote::Refused {
                    kind: reply.error_kind(),
                    message: reply.error_message().to_string(),
                },
                other => Vote::Refused {
                    kind: protocol::ErrorKind::Protocol,
                    message: format!("unexpected {other:?} reply to PREPARE"),
                },
            },
        }
    }

    /// Deliver COMMIT with backoff for `commit_retry.attempts` rounds, then
    /// hand the replica to a background task that keeps going.
    async fn deliver_commit(&self, tx_id: &TxId, node: &NodeInfo) -> CommitOutcome {
        let attempts = self.commit_retry.attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                sleep(self.commit_retry.backoff(attempt - 1)).await;
            }
            match send_commit(self.transport.as_ref(), tx_id, node, attempt).await {
                Some(true) => return CommitOutcome::Acked,
                Some(false) => return CommitOutcome::Rejected,
                None => {}
            }
        }
        self.redeliver_in_background(tx_id, node, attempts);
        CommitOutcome::Deferred
    }

    /// Retry COMMIT to `node` at the capped backoff until it answers. The
    /// pair stays in `redeliveries` while the task runs.
    fn redeliver_in_background(&self, tx_id: &TxId, node: &NodeInfo, first_attempt: usize) {
        if !lock(&self.redeliveries).insert((tx_id.clone(), node.id)) {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let redeliveries = Arc::clone(&self.redeliveries);
        let retry = self.commit_retry;
        let tx_id = tx_id.clone();
        let node = node.clone();

        tokio::spawn(async move {
            let mut attempt = first_attempt;
            let applied = loop {
                sleep(retry.backoff(attempt.saturating_sub(1))).await;
                if let Some(applied) = send_commit(transport.as_ref(), &tx_id, &node, attempt).await {
                    break applied;
                }
                attempt += 1;
            };
            if applied {
                info!(tx_id = %tx_id, node = node.id, attempts = attempt + 1, "commit redelivered");
            }
            lock(&redeliveries).remove(&(tx_id, node.id));
        });
    }

    async fn deliver_abort(&self, tx_id: &TxId, node: &NodeInfo) {
        let request = WorkerRequest::Abort {
            tx_id: tx_id.clone(),
        };
        match self.transport.send(node, &request).await {
            Ok(reply) if reply.status == Status::Aborted => {}
            Ok(reply) => warn!(
                tx_id = %tx_id,
                node = node.id,
                reason = reply.error_message(),
                "abort not acknowledged"
            ),
            Err(e) => warn!(tx_id = %tx_id, node = node.id, reason = %e, "abort not delivered"),
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One COMMIT delivery. `Some(applied)` once the replica answered, `None`
/// when it could not be reached and the delivery should be retried.
async fn send_commit<T: Transport>(
    transport: &T,
    tx_id: &TxId,
    node: &NodeInfo,
    attempt: usize,
) -> Option<bool> {
    let request = WorkerRequest::Commit {
        tx_id: tx_id.clone(),
    };
    match transport.send(node, &request).await {
        Ok(reply) if reply.status == Status::Committed => Some(true),
        // an earlier attempt may have been applied with its reply lost
        Ok(reply) if attempt > 0 && reply.is_commit_without_prepare() => {
            warn!(
                tx_id = %tx_id,
                node = node.id,
                attempt,
                "commit acknowledgement ambiguous, assuming an earlier delivery was applied"
            );
            Some(true)
        }
        Ok(reply) => {
            error!(
                tx_id = %tx_id,
                node = node.id,
                reason = reply.error_message(),
                "commit rejected by participant, replica diverged"
            );
            Some(false)
        }
        Err(e) => {
            warn!(
                tx_id = %tx_id,
                node = node.id,
                attempt,
                reason = %e,
                "commit delivery failed"
            );
            None
        }
    }
}
