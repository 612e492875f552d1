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

//! Persistence port.
//!
//! Storage backends live outside this crate and plug in through
//! [`Repository`]. [`InMemoryRepository`] is the default backend.

use crate::account::AccountSnapshot;
use crate::base::AccountId;
use crate::error::RepositoryError;
use parking_lot::RwLock;
use std::collections::HashMap;

pub trait Repository: Send + Sync {
    fn find_account(&self, id: AccountId) -> Result<Option<AccountSnapshot>, RepositoryError>;

    fn save_account(&self, account: &AccountSnapshot) -> Result<(), RepositoryError>;

    /// Saves every account or none of them.
    fn save_accounts(&self, accounts: &[AccountSnapshot]) -> Result<(), RepositoryError>;

    /// Returns whether the account existed.
    fn delete_account(&self, id: AccountId) -> Result<bool, RepositoryError>;

    /// Every stored account, used to hydrate the bank at startup.
    fn load_accounts(&self) -> Result<Vec<AccountSnapshot>, RepositoryError>;
}

/// Process-local repository.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    accounts: RwLock<HashMap<AccountId, AccountSnapshot>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }
}

impl Repository for InMemoryRepository {
    fn find_account(&self, id: AccountId) -> Result<Option<AccountSnapshot>, RepositoryError> {
        Ok(self.accounts.read().get(&id).cloned())
    }

    fn save_account(&self, account: &AccountSnapshot) -> Result<(), RepositoryError> {
        self.accounts.write().insert(account.id, account.clone());
        Ok(())
    }

    fn save_accounts(&self, accounts: &[AccountSnapshot]) -> Result<(), RepositoryError> {
        // One write guard for the whole batch keeps it atomic to readers.
        let mut stored = self.accounts.write();
        for account in accounts {
            stored.insert(account.id, account.clone());
        }
        Ok(())
    }

    fn delete_account(&self, id: AccountId) -> Result<bool, RepositoryError> {
        Ok(self.accounts.write().remove(&id).is_some())
    }

    fn load_accounts(&self) -> Result<Vec<AccountSnapshot>, RepositoryError> {
        Ok(self.accounts.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, AccountType};
    use crate::clock::SystemClock;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn snapshot(id: u32) -> AccountSnapshot {
        let account = Account::open(
            AccountId(id),
            "Holder",
            AccountType::Current {
                overdraft_limit: dec!(0),
            },
            Arc::new(SystemClock),
        )
        .unwrap();
        account.deposit(dec!(10)).unwrap();
        account.snapshot()
    }

    #[test]
    fn save_then_find() {
        let repository = InMemoryRepository::new();
        let account = snapshot(100_000_001);
        repository.save_account(&account).unwrap();
        assert_eq!(
            repository.find_account(AccountId(100_000_001)).unwrap(),
            Some(account)
        );
        assert_eq!(repository.find_account(AccountId(5)).unwrap(), None);
    }

    #[test]
    fn save_accounts_stores_all() {
        let repository = InMemoryRepository::new();
        repository
            .save_accounts(&[snapshot(100_000_001), snapshot(100_000_002)])
            .unwrap();
        assert_eq!(repository.len(), 2);
        assert_eq!(repository.load_accounts().unwrap().len(), 2);
    }

    #[test]
    fn delete_reports_existence() {
        let repository = InMemoryRepository::new();
        repository.save_account(&snapshot(100_000_001)).unwrap();
        assert!(repository.delete_account(AccountId(100_000_001)).unwrap());
        assert!(!repository.delete_account(AccountId(100_000_001)).unwrap());
        assert!(repository.is_empty());
    }
}
