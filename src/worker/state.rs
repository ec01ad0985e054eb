use chrono::NaiveDate;

use crate::Amount;
use crate::model::{Account, AccountId, ClientId};

/// Committed state of one account held by this replica.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountEntry {
    pub balance: Amount,
    pub owner: Option<ClientId>,
    pub opened_on: Option<NaiveDate>,
}

impl AccountEntry {
    pub fn credit(&mut self, amount: Amount) {
        self.balance += amount;
    }

    pub fn debit(&mut self, amount: Amount) {
        self.balance -= amount;
    }

    pub fn to_account(&self, id: AccountId) -> Account {
        Account {
            id,
            balance: self.balance,
            owner: self.owner,
            opened_on: self.opened_on,
        }
    }
}

impl From<&Account> for AccountEntry {
    fn from(account: &Account) -> Self {
        Self {
            balance: account.balance,
            owner: account.owner,
            opened_on: account.opened_on,
        }
    }
}
