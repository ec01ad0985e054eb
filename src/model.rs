//! Core domain types shared by workers and the coordinator.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Amount;

/// Account identifier.
pub type AccountId = i64;

/// Identifier of the client owning an account.
pub type ClientId = i64;

/// Partition index, `0..partition_count`.
pub type PartitionId = u32;

/// Globally unique identifier of a distributed transaction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    pub fn generate() -> Self {
        TxId(format!("tx_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TxId {
    fn from(value: &str) -> Self {
        TxId(value.to_string())
    }
}

impl From<String> for TxId {
    fn from(value: String) -> Self {
        TxId(value)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An account as held by one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub balance: Amount,
    pub owner: Option<ClientId>,
    pub opened_on: Option<NaiveDate>,
}

/// A mutating request that is driven through two-phase commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Move funds between two accounts, possibly in different partitions.
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    /// Open a new account with an initial balance.
    Create {
        account: AccountId,
        initial: Amount,
        owner: Option<ClientId>,
        opened_on: NaiveDate,
    },
    /// Close an existing account.
    Delete { account: AccountId },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Transfer { .. } => "transfer",
            Operation::Create { .. } => "create",
            Operation::Delete { .. } => "delete",
        }
    }
}

/// Kind of a balance-affecting effect, as recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    Debit,
    Credit,
    Create,
    Delete,
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EffectKind::Debit => "debit",
            EffectKind::Credit => "credit",
            EffectKind::Create => "create",
            EffectKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One local effect a participant prepared for a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Debit {
        account: AccountId,
        amount: Amount,
    },
    Credit {
        account: AccountId,
        amount: Amount,
    },
    Create {
        account: AccountId,
        initial: Amount,
        owner: Option<ClientId>,
        opened_on: NaiveDate,
    },
    Delete {
        account: AccountId,
    },
}

impl Effect {
    pub fn kind(&self) -> EffectKind {
        match self {
            Effect::Debit { .. } => EffectKind::Debit,
            Effect::Credit { .. } => EffectKind::Credit,
            Effect::Create { .. } => EffectKind::Create,
            Effect::Delete { .. } => EffectKind::Delete,
        }
    }

    pub fn account(&self) -> AccountId {
        match self {
            Effect::Debit { account, .. }
            | Effect::Credit { account, .. }
            | Effect::Create { account, .. }
            | Effect::Delete { account } => *account,
        }
    }
}

/// Durable, append-only record of one committed effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub tx_id: TxId,
    pub account: AccountId,
    pub kind: EffectKind,
    /// Always non-negative; the direction is given by `kind`. For a delete
    /// this is the balance the account held when it was removed.
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
}
