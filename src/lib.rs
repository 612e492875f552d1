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

//! # Bank Ledger
//!
//! This library provides a concurrent retail-banking ledger: typed accounts,
//! the operations that move money between them, and an orchestrator that runs
//! those operations on a worker pool.
//!
//! ## Core Components
//!
//! - [`Bank`]: Owns the account registry, queues operations, runs interest
//! - [`Account`]: Balance and append-only history behind a per-account lock
//! - [`Operation`]: Deposit, withdrawal and transfer commands
//! - [`Cache`]: TTL read-through cache for account lookups
//! - [`Repository`]: Persistence port, with [`InMemoryRepository`] as default
//! - [`LedgerError`]: Error types for ledger and persistence failures
//!
//! ## Example
//!
//! ```
//! use bank_ledger_rs::{AccountType, Bank, LedgerConfig, Operation};
//! use rust_decimal_macros::dec;
//!
//! let bank = Bank::new(LedgerConfig::default()).unwrap();
//!
//! let checking = bank
//!     .create_account("Alice", AccountType::Current { overdraft_limit: dec!(100) }, dec!(50))
//!     .unwrap();
//! let savings = bank
//!     .create_account(
//!         "Alice",
//!         AccountType::Savings { minimum_balance: dec!(0), interest_rate: dec!(0.02) },
//!         dec!(0),
//!     )
//!     .unwrap();
//!
//! // Transfers may take the current account into its overdraft.
//! let result = bank.submit(Operation::transfer(checking, savings, dec!(120))).wait();
//! assert!(result.is_success());
//! assert_eq!(bank.balance(checking), Some(dec!(-70)));
//! assert_eq!(bank.balance(savings), Some(dec!(120)));
//! ```
//!
//! ## Thread Safety
//!
//! Each account has its own mutex. Transfers lock both accounts in ascending
//! [`AccountId`] order, so concurrent transfers cannot deadlock. The registry
//! lock is only held for identifier allocation, insertion, removal and
//! enumeration.

pub mod account;
mod bank;
mod base;
pub mod cache;
pub mod clock;
mod config;
pub mod error;
pub mod observer;
mod operation;
mod registry;
pub mod repository;
mod schedule;
mod transaction;

pub use account::{Account, AccountKind, AccountSnapshot, AccountType};
pub use bank::{Bank, OperationHandle};
pub use base::{AccountId, TransactionId};
pub use cache::{Cache, NoOpCache, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LedgerConfig;
pub use error::{LedgerError, RepositoryError};
pub use observer::{LedgerEvent, Observer, TracingObserver};
pub use operation::{Operation, OperationResult};
pub use repository::{InMemoryRepository, Repository};
pub use schedule::InterestSchedule;
pub use transaction::{Transaction, TransactionKind};
