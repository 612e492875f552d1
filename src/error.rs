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

//! Error types for ledger operations and persistence.

use crate::base::AccountId;
use thiserror::Error;

/// Ledger errors.
///
/// Operations never return these to the caller directly; they are carried
/// inside a failed [`OperationResult`](crate::OperationResult).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Non-positive amount, blank name, equal transfer endpoints, bad config
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Referenced account does not exist in the registry
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    /// Floor, overdraft or maturity rule rejected the debit
    #[error("rule violation on account {account}: {reason}")]
    RuleViolation { account: AccountId, reason: String },

    /// Repository failed to persist or delete
    #[error("persistence failure: {0}")]
    Persistence(#[from] RepositoryError),

    /// Operation queue is at capacity
    #[error("operation queue is full")]
    QueueFull,

    /// Bank no longer accepts or dispatches operations
    #[error("bank is shutting down")]
    ShuttingDown,

    /// Operation panicked on its worker; the worker keeps running
    #[error("internal error: {0}")]
    Internal(String),

    /// Worker or scheduler thread could not be started
    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}

impl LedgerError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Repository errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Backend could not be reached
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected the write
    #[error("write rejected: {0}")]
    WriteRejected(String),
}
