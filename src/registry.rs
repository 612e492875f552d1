// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Account registry.
//!
//! One coarse mutex guards identifier allocation, insertion, removal and
//! enumeration. It is never held while an existing account is mutated; callers
//! clone the `Arc<Account>` out and release it first.
//!
//! Lock order: an account mutex may be held while taking the registry mutex,
//! never the other way round.

use crate::account::Account;
use crate::base::AccountId;
use crate::error::LedgerError;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct Registry {
    accounts: Mutex<HashMap<AccountId, Arc<Account>>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, id: AccountId) -> Option<Arc<Account>> {
        self.accounts.lock().get(&id).cloned()
    }

    pub(crate) fn contains(&self, id: AccountId) -> bool {
        self.accounts.lock().contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.accounts.lock().len()
    }

    /// Draws random identifiers until one is free, builds the account with it
    /// and inserts it, all under the registry lock.
    ///
    /// `build` must not touch the registry.
    pub(crate) fn insert_new<F>(&self, build: F) -> Result<Arc<Account>, LedgerError>
    where
        F: FnOnce(AccountId) -> Result<Account, LedgerError>,
    {
        let mut accounts = self.accounts.lock();
        let mut rng = rand::thread_rng();
        let id = loop {
            let candidate = AccountId(rng.gen_range(AccountId::MIN..=AccountId::MAX));
            if !accounts.contains_key(&candidate) {
                break candidate;
            }
        };
        let account = Arc::new(build(id)?);
        accounts.insert(id, Arc::clone(&account));
        Ok(account)
    }

    /// Inserts a rehydrated account, keeping its identifier.
    pub(crate) fn restore(&self, account: Account) -> Result<(), LedgerError> {
        let id = account.id();
        let mut accounts = self.accounts.lock();
        if accounts.contains_key(&id) {
            return Err(LedgerError::invalid(format!("duplicate account {id} in repository")));
        }
        accounts.insert(id, Arc::new(account));
        Ok(())
    }

    pub(crate) fn remove(&self, id: AccountId) -> Option<Arc<Account>> {
        self.accounts.lock().remove(&id)
    }

    /// Accounts at this instant, ordered by identifier.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Account>> {
        let mut accounts: Vec<_> = self.accounts.lock().values().cloned().collect();
        accounts.sort_by_key(|account| account.id());
        accounts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountType;
    use crate::clock::SystemClock;
    use rust_decimal::Decimal;

    fn open(id: AccountId) -> Result<Account, LedgerError> {
        Account::open(
            id,
            "Holder",
            AccountType::Current {
                overdraft_limit: Decimal::ZERO,
            },
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn insert_new_issues_unique_ids_in_range() {
        let registry = Registry::new();
        for _ in 0..500 {
            registry.insert_new(open).unwrap();
        }
        let accounts = registry.snapshot();
        assert_eq!(accounts.len(), 500);
        assert!(accounts.windows(2).all(|pair| pair[0].id() < pair[1].id()));
        assert!(accounts
            .iter()
            .all(|a| (AccountId::MIN..=AccountId::MAX).contains(&a.id().0)));
    }

    #[test]
    fn failed_build_inserts_nothing() {
        let registry = Registry::new();
        let result = registry.insert_new(|_| Err(LedgerError::invalid("nope")));
        assert!(result.is_err());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn restore_rejects_duplicates() {
        let registry = Registry::new();
        registry.restore(open(AccountId(100_000_001)).unwrap()).unwrap();
        assert!(registry.restore(open(AccountId(100_000_001)).unwrap()).is_err());
        assert!(registry.contains(AccountId(100_000_001)));
    }

    #[test]
    fn remove_returns_the_account() {
        let registry = Registry::new();
        let id = registry.insert_new(open).unwrap().id();
        assert_eq!(registry.remove(id).map(|a| a.id()), Some(id));
        assert!(registry.remove(id).is_none());
        assert!(registry.get(id).is_none());
    }
}
