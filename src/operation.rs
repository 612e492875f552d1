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

//! Balance-mutating commands.
//!
//! # Operations
//!
//! | Operation | Accounts locked | Floor rule | Persisted with |
//! |-----------|-----------------|------------|----------------|
//! | Deposit | one | none | `save_account` |
//! | Withdraw | one | source | `save_account` |
//! | Transfer | two, lower id first | source | `save_accounts` |
//!
//! Every error is folded into a failed [`OperationResult`]; nothing here
//! panics or returns `Err` to the submitter.
//!
//! # Lock ordering
//!
//! A transfer locks the account with the numerically smaller [`AccountId`]
//! first, whichever side it is on. Two transfers running in opposite
//! directions between the same pair therefore request the locks in the same
//! order and cannot wait on each other in a cycle.

use crate::account::{Account, AccountData, AccountSnapshot};
use crate::base::AccountId;
use crate::cache::Cache;
use crate::error::LedgerError;
use crate::registry::Registry;
use crate::repository::Repository;
use parking_lot::MutexGuard;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Deposit {
        account: AccountId,
        amount: Decimal,
    },
    Withdraw {
        account: AccountId,
        amount: Decimal,
    },
    Transfer {
        source: AccountId,
        target: AccountId,
        amount: Decimal,
    },
}

impl Operation {
    pub fn deposit(account: AccountId, amount: Decimal) -> Self {
        Self::Deposit { account, amount }
    }

    pub fn withdraw(account: AccountId, amount: Decimal) -> Self {
        Self::Withdraw { account, amount }
    }

    pub fn transfer(source: AccountId, target: AccountId, amount: Decimal) -> Self {
        Self::Transfer {
            source,
            target,
            amount,
        }
    }

    pub fn amount(&self) -> Decimal {
        match self {
            Self::Deposit { amount, .. }
            | Self::Withdraw { amount, .. }
            | Self::Transfer { amount, .. } => *amount,
        }
    }

    /// Accounts this operation mutates.
    pub fn accounts(&self) -> Vec<AccountId> {
        match self {
            Self::Deposit { account, .. } | Self::Withdraw { account, .. } => vec![*account],
            Self::Transfer { source, target, .. } => vec![*source, *target],
        }
    }

    /// Runs the operation to completion.
    pub(crate) fn execute(
        &self,
        registry: &Registry,
        repository: &dyn Repository,
        cache: &dyn Cache<AccountId, AccountSnapshot>,
    ) -> OperationResult {
        match self.apply(registry, repository, cache) {
            Ok(message) => OperationResult::success(message),
            Err(error) => {
                match &error {
                    LedgerError::Persistence(cause) => {
                        tracing::error!(operation = %self, %cause, "failed to persist operation");
                    }
                    _ => tracing::debug!(operation = %self, %error, "operation rejected"),
                }
                OperationResult::failure(self, error)
            }
        }
    }

    /// Cache entries of mutated accounts are dropped before their locks are
    /// released, so a reader that fills the cache under the same lock can
    /// never store a snapshot older than a completed operation.
    fn apply(
        &self,
        registry: &Registry,
        repository: &dyn Repository,
        cache: &dyn Cache<AccountId, AccountSnapshot>,
    ) -> Result<String, LedgerError> {
        match *self {
            Self::Deposit { account, amount } => {
                let handle = lookup(registry, account)?;
                let mut data = handle.lock();
                ensure_open(registry, &data)?;
                data.deposit(amount)?;
                cache.invalidate(&account);
                repository.save_account(&data.snapshot())?;
                Ok(format!("{self}; balance {}", data.balance()))
            }
            Self::Withdraw { account, amount } => {
                let handle = lookup(registry, account)?;
                let mut data = handle.lock();
                ensure_open(registry, &data)?;
                if !data.withdraw(amount)? {
                    return Err(data.rule_violation(amount));
                }
                cache.invalidate(&account);
                repository.save_account(&data.snapshot())?;
                Ok(format!("{self}; balance {}", data.balance()))
            }
            Self::Transfer {
                source,
                target,
                amount,
            } => {
                if source == target {
                    return Err(LedgerError::invalid(format!(
                        "cannot transfer from account {source} to itself"
                    )));
                }
                if amount <= Decimal::ZERO {
                    return Err(LedgerError::invalid(format!(
                        "amount must be positive, got {amount}"
                    )));
                }
                let source_account = lookup(registry, source)?;
                let target_account = lookup(registry, target)?;
                let (mut debit, mut credit) = lock_in_order(&source_account, &target_account);
                ensure_open(registry, &debit)?;
                ensure_open(registry, &credit)?;

                // Both legs are applied only after the source passes its floor
                // check and the target can take the credit, and only while both
                // locks are held.
                credit.credited(amount)?;
                if !debit.transfer_out(amount, target)? {
                    return Err(debit.rule_violation(amount));
                }
                credit.receive_transfer(amount, source)?;
                cache.invalidate(&source);
                cache.invalidate(&target);

                repository.save_accounts(&[debit.snapshot(), credit.snapshot()])?;
                Ok(format!(
                    "{self}; balances {} and {}",
                    debit.balance(),
                    credit.balance()
                ))
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit { account, amount } => {
                write!(f, "deposit of {amount} into account {account}")
            }
            Self::Withdraw { account, amount } => {
                write!(f, "withdrawal of {amount} from account {account}")
            }
            Self::Transfer {
                source,
                target,
                amount,
            } => write!(
                f,
                "transfer of {amount} from account {source} to account {target}"
            ),
        }
    }
}

fn lookup(registry: &Registry, id: AccountId) -> Result<std::sync::Arc<Account>, LedgerError> {
    registry.get(id).ok_or(LedgerError::AccountNotFound(id))
}

/// Rejects accounts closed between lookup and lock acquisition.
fn ensure_open(registry: &Registry, data: &AccountData) -> Result<(), LedgerError> {
    if registry.contains(data.id()) {
        Ok(())
    } else {
        Err(LedgerError::AccountNotFound(data.id()))
    }
}

/// Locks `source` and `target` in ascending id order and returns the guards
/// as `(source, target)`.
fn lock_in_order<'a>(
    source: &'a Account,
    target: &'a Account,
) -> (MutexGuard<'a, AccountData>, MutexGuard<'a, AccountData>) {
    debug_assert_ne!(source.id(), target.id());
    if source.id() < target.id() {
        let first = source.lock();
        let second = target.lock();
        (first, second)
    } else {
        let first = target.lock();
        let second = source.lock();
        (second, first)
    }
}

/// Outcome of one operation execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    success: bool,
    message: String,
    error: Option<LedgerError>,
}

impl OperationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failure(operation: &Operation, error: LedgerError) -> Self {
        Self {
            success: false,
            message: format!("{operation} failed: {error}"),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Cause of a failure, kept for logging.
    pub fn error(&self) -> Option<&LedgerError> {
        self.error.as_ref()
    }

    pub fn into_result(self) -> Result<String, LedgerError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.message),
        }
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
