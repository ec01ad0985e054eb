//! Error types for the 2PC participant.

use thiserror::Error;

use crate::Amount;
use crate::model::{AccountId, TxId};
use crate::protocol::ErrorKind;

/// Refusal to vote READY on a PREPARE.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrepareError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),

    #[error("initial balance must not be negative, got {0}")]
    NegativeInitialBalance(Amount),

    #[error("cannot transfer from account {0} to itself")]
    SelfTransfer(AccountId),

    #[error("insufficient funds in account {0}: available {1}, requested {2}")]
    InsufficientFunds(AccountId, Amount, Amount),

    #[error("balance of account {0} would overflow")]
    BalanceOverflow(AccountId),

    #[error("account {0} already exists")]
    AccountExists(AccountId),

    #[error("ACCOUNT_NOT_FOUND: account {0}")]
    AccountNotFound(AccountId),

    #[error("account {0} is locked by pending transaction {1}")]
    AccountBusy(AccountId, TxId),

    #[error("account {0} does not belong to this partition")]
    NotOwned(AccountId),

    #[error("transaction {0} is already prepared")]
    AlreadyPrepared(TxId),
}

impl PrepareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrepareError::NonPositiveAmount(_)
            | PrepareError::NegativeInitialBalance(_)
            | PrepareError::SelfTransfer(_)
            | PrepareError::NotOwned(_) => ErrorKind::Validation,
            PrepareError::AccountNotFound(_) => ErrorKind::NotFound,
            PrepareError::InsufficientFunds(..)
            | PrepareError::BalanceOverflow(_)
            | PrepareError::AccountExists(_)
            | PrepareError::AccountBusy(..) => ErrorKind::Conflict,
            PrepareError::AlreadyPrepared(_) => ErrorKind::Protocol,
        }
    }
}

/// COMMIT that cannot be applied.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitError {
    #[error("COMMIT_WITHOUT_PREPARE: transaction {0} was never prepared")]
    WithoutPrepare(TxId),
}

/// Top-level error of a worker request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("prepare failed: {0}")]
    Prepare(#[from] PrepareError),

    #[error("{0}")]
    Commit(#[from] CommitError),

    #[error("ACCOUNT_NOT_FOUND: account {0}")]
    AccountNotFound(AccountId),

    #[error("partition sum is out of range")]
    SumOverflow,
}

impl NodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::Prepare(e) => e.kind(),
            NodeError::Commit(_) => ErrorKind::Protocol,
            NodeError::AccountNotFound(_) => ErrorKind::NotFound,
            NodeError::SumOverflow => ErrorKind::Conflict,
        }
    }
}
