//! Error types for the coordinator.

use thiserror::Error;
use tokio::task::JoinError;

use crate::Amount;
use crate::model::{AccountId, PartitionId};
use crate::protocol::ErrorKind;
use crate::storage::StorageError;

use super::txn::IllegalTransition;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),

    #[error("initial balance must not be negative, got {0}")]
    NegativeInitialBalance(Amount),

    #[error("cannot transfer from account {0} to itself")]
    SelfTransfer(AccountId),

    /// Error reply of a worker, relayed unchanged
    #[error("{message}")]
    Refused { kind: ErrorKind, message: String },

    #[error("NODE_UNREACHABLE: no replica of partition {0} responded")]
    PartitionUnreachable(PartitionId),

    #[error("NODE_UNREACHABLE: a participant did not vote in time")]
    VoteMissing,

    #[error("total balance is out of range")]
    TotalOverflow,

    #[error("unexpected reply from worker: {0}")]
    UnexpectedReply(String),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("transaction ledger is not configured")]
    NoLedger,

    #[error("cannot read transaction ledger: {0}")]
    Ledger(#[from] StorageError),

    #[error("ledger reader failed: {0}")]
    LedgerTask(#[from] JoinError),
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::NonPositiveAmount(_)
            | CoordinatorError::NegativeInitialBalance(_)
            | CoordinatorError::SelfTransfer(_) => ErrorKind::Validation,
            CoordinatorError::Refused { kind, .. } => *kind,
            CoordinatorError::TotalOverflow => ErrorKind::Conflict,
            CoordinatorError::PartitionUnreachable(_)
            | CoordinatorError::VoteMissing
            | CoordinatorError::NoLedger
            | CoordinatorError::Ledger(_)
            | CoordinatorError::LedgerTask(_) => ErrorKind::Unreachable,
            CoordinatorError::UnexpectedReply(_) | CoordinatorError::Transition(_) => {
                ErrorKind::Protocol
            }
        }
    }
}
