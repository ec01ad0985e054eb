//! Local relevance filter for broadcast PREPAREs.
//!
//! Every participant of a transaction receives the full operation and
//! decides on its own which effects apply to the accounts it owns. Both
//! functions here are pure so the decision can be tested without a node.

use std::collections::{BTreeMap, HashMap};

use super::PrepareError;
use super::state::AccountEntry;
use crate::Amount;
use crate::model::{AccountId, Effect, Operation, PartitionId, TxId};
use crate::topology::partition_of;

/// How a replica decides which accounts are its responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The replica serves partition `index` out of `count`; an owned account
    /// it does not hold does not exist.
    Partition { index: PartitionId, count: u32 },
    /// No topology knowledge: the replica owns exactly what it holds.
    Held,
}

impl Ownership {
    fn owns(&self, account: AccountId, held: bool) -> bool {
        match *self {
            Ownership::Partition { index, count } => partition_of(account, count) == index,
            Ownership::Held => held,
        }
    }

    /// True only when the topology says the account lives elsewhere.
    fn is_foreign(&self, account: AccountId) -> bool {
        match *self {
            Ownership::Partition { index, count } => partition_of(account, count) != index,
            Ownership::Held => false,
        }
    }
}

/// Effects this replica must apply for `operation`, validated against the
/// committed balances. A transfer yields 0, 1 or 2 effects depending on
/// which endpoints are local; the debit always comes first.
pub fn local_effects(
    operation: &Operation,
    accounts: &BTreeMap<AccountId, AccountEntry>,
    ownership: &Ownership,
) -> Result<Vec<Effect>, PrepareError> {
    match *operation {
        Operation::Transfer { from, to, amount } => {
            if !amount.is_positive() {
                return Err(PrepareError::NonPositiveAmount(amount));
            }
            if from == to {
                return Err(PrepareError::SelfTransfer(from));
            }

            let mut effects = Vec::with_capacity(2);
            if ownership.owns(from, accounts.contains_key(&from)) {
                let entry = accounts
                    .get(&from)
                    .ok_or(PrepareError::AccountNotFound(from))?;
                if entry.balance < amount {
                    return Err(PrepareError::InsufficientFunds(from, entry.balance, amount));
                }
                effects.push(Effect::Debit {
                    account: from,
                    amount,
                });
            }
            if ownership.owns(to, accounts.contains_key(&to)) {
                let entry = accounts.get(&to).ok_or(PrepareError::AccountNotFound(to))?;
                if entry.balance.checked_add(amount).is_none() {
                    return Err(PrepareError::BalanceOverflow(to));
                }
                effects.push(Effect::Credit { account: to, amount });
            }
            Ok(effects)
        }
        Operation::Create {
            account,
            initial,
            owner,
            opened_on,
        } => {
            if initial.is_negative() {
                return Err(PrepareError::NegativeInitialBalance(initial));
            }
            if ownership.is_foreign(account) {
                return Err(PrepareError::NotOwned(account));
            }
            if accounts.contains_key(&account) {
                return Err(PrepareError::AccountExists(account));
            }
            Ok(vec![Effect::Create {
                account,
                initial,
                owner,
                opened_on,
            }])
        }
        Operation::Delete { account } => {
            if ownership.is_foreign(account) {
                return Err(PrepareError::NotOwned(account));
            }
            if !accounts.contains_key(&account) {
                return Err(PrepareError::AccountNotFound(account));
            }
            Ok(vec![Effect::Delete { account }])
        }
    }
}

/// Checks `effects` against what other prepared transactions already hold.
///
/// Debits are validated against the balance minus debits reserved by other
/// prepared transactions. Credits must still fit once every pending credit
/// of the account lands, so a COMMIT can always be applied in full.
/// Creates and deletes need the account to themselves, and nothing else may
/// touch an account being created or deleted.
pub fn check_reservations(
    effects: &[Effect],
    accounts: &BTreeMap<AccountId, AccountEntry>,
    prepared: &HashMap<TxId, Vec<Effect>>,
) -> Result<(), PrepareError> {
    for effect in effects {
        let account = effect.account();
        let exclusive = matches!(effect, Effect::Create { .. } | Effect::Delete { .. });
        let mut reserved = Amount::ZERO;
        let mut incoming = Amount::ZERO;

        for (tx_id, pending) in prepared {
            for other in pending.iter().filter(|e| e.account() == account) {
                let other_exclusive =
                    matches!(other, Effect::Create { .. } | Effect::Delete { .. });
                if exclusive || other_exclusive {
                    return Err(PrepareError::AccountBusy(account, tx_id.clone()));
                }
                match other {
                    Effect::Debit { amount, .. } => {
                        reserved = reserved
                            .checked_add(*amount)
                            .ok_or(PrepareError::BalanceOverflow(account))?;
                    }
                    Effect::Credit { amount, .. } => {
                        incoming = incoming
                            .checked_add(*amount)
                            .ok_or(PrepareError::BalanceOverflow(account))?;
                    }
                    Effect::Create { .. } | Effect::Delete { .. } => {}
                }
            }
        }

        let balance = accounts.get(&account).map(|e| e.balance).unwrap_or_default();
        match effect {
            Effect::Debit { amount, .. } => {
                let available = balance
                    .checked_sub(reserved)
                    .ok_or(PrepareError::BalanceOverflow(account))?;
                if available < *amount {
                    return Err(PrepareError::InsufficientFunds(account, available, *amount));
                }
            }
            Effect::Credit { amount, .. } => {
                balance
                    .checked_add(incoming)
                    .and_then(|b| b.checked_add(*amount))
                    .ok_or(PrepareError::BalanceOverflow(account))?;
            }
            Effect::Create { .. } | Effect::Delete { .. } => {}
        }
    }
    Ok(())
}
