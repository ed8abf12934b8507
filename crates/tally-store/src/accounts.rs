//! Account repository. Accounts live for the lifetime of the process.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password_hash: String,
    pub balance: i64,
}

/// Balances of both sides after a transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferReceipt {
    pub from_balance: i64,
    pub to_balance: i64,
}

/// Storage contract used by the command handlers.
pub trait AccountRepo: Send + Sync {
    fn find_by_username(&self, username: &str) -> Option<Account>;

    /// Insert a new account. Fails with [`StoreError::Conflict`] if the
    /// username is already present; the check and the insert are atomic.
    fn create(&self, account: Account) -> Result<(), StoreError>;

    /// Add `delta` (possibly negative) and return the new balance.
    fn adjust_balance(&self, username: &str, delta: i64) -> Result<i64, StoreError>;

    /// Move `amount` from one account to another as a single step.
    fn transfer(&self, from: &str, to: &str, amount: i64) -> Result<TransferReceipt, StoreError>;
}

/// Mutex-guarded map.
#[derive(Default)]
pub struct InMemoryAccountRepo {
    accounts: Mutex<HashMap<String, Account>>,
}

impl InMemoryAccountRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.lock().is_empty()
    }
}

impl AccountRepo for InMemoryAccountRepo {
    fn find_by_username(&self, username: &str) -> Option<Account> {
        self.accounts.lock().get(username).cloned()
    }

    #[instrument(skip(self, account), fields(username = %account.username))]
    fn create(&self, account: Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock();
        if accounts.contains_key(&account.username) {
            return Err(StoreError::Conflict(format!("account {}", account.username)));
        }
        accounts.insert(account.username.clone(), account);
        Ok(())
    }

    #[instrument(skip(self))]
    fn adjust_balance(&self, username: &str, delta: i64) -> Result<i64, StoreError> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .get_mut(username)
            .ok_or_else(|| StoreError::NotFound(format!("account {username}")))?;
        let next = account
            .balance
            .checked_add(delta)
            .ok_or_else(|| StoreError::Overflow(username.to_string()))?;
        if next < 0 {
            return Err(StoreError::InsufficientBalance {
                available: account.balance,
                requested: -delta,
            });
        }
        account.balance = next;
        Ok(next)
    }

    #[instrument(skip(self))]
    fn transfer(&self, from: &str, to: &str, amount: i64) -> Result<TransferReceipt, StoreError> {
        let mut accounts = self.accounts.lock();
        let from_balance = accounts
            .get(from)
            .map(|a| a.balance)
            .ok_or_else(|| StoreError::NotFound(format!("account {from}")))?;
        let to_balance = accounts
            .get(to)
            .map(|a| a.balance)
            .ok_or_else(|| StoreError::NotFound(format!("account {to}")))?;

        if from_balance < amount {
            return Err(StoreError::InsufficientBalance {
                available: from_balance,
                requested: amount,
            });
        }
        let credited = to_balance
            .checked_add(amount)
            .ok_or_else(|| StoreError::Overflow(to.to_string()))?;
        let debited = from_balance - amount;

        // Both lookups succeeded under the same lock.
        if let Some(a) = accounts.get_mut(from) {
            a.balance = debited;
        }
        if let Some(a) = accounts.get_mut(to) {
            a.balance = credited;
        }
        Ok(TransferReceipt {
            from_balance: debited,
            to_balance: credited,
        })
    }
}
