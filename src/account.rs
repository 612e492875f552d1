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

//! Account management.
//!
//! An [`Account`] owns its balance and its append-only transaction history
//! behind a single mutex. The variant ([`AccountKind`]) decides whether a debit
//! may proceed (the floor rule) and whether interest accrues.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rust_decimal_macros::dec;
//! use bank_ledger_rs::{Account, AccountId, AccountType, SystemClock};
//!
//! let account = Account::open(
//!     AccountId(100_000_001),
//!     "Alice",
//!     AccountType::Current { overdraft_limit: dec!(50) },
//!     Arc::new(SystemClock),
//! )
//! .unwrap();
//! account.deposit(dec!(20)).unwrap();
//! assert!(account.withdraw(dec!(60)).unwrap());
//! assert_eq!(account.balance(), dec!(-40));
//! ```

use crate::base::AccountId;
use crate::clock::Clock;
use crate::error::LedgerError;
use crate::transaction::{Transaction, TransactionKind};
use chrono::{DateTime, Months, Utc};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const MONTHS_PER_YEAR: u32 = 12;

/// Variant requested when opening an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountType {
    Savings {
        minimum_balance: Decimal,
        interest_rate: Decimal,
    },
    Current {
        overdraft_limit: Decimal,
    },
    FixedTerm {
        term_months: u32,
        interest_rate: Decimal,
    },
}

impl AccountType {
    /// Validates the parameters and fixes the maturity date for term deposits.
    fn into_kind(self, opened_at: DateTime<Utc>) -> Result<AccountKind, LedgerError> {
        match self {
            Self::Savings {
                minimum_balance,
                interest_rate,
            } => {
                if minimum_balance < Decimal::ZERO {
                    return Err(LedgerError::invalid("minimum balance cannot be negative"));
                }
                if interest_rate < Decimal::ZERO {
                    return Err(LedgerError::invalid("interest rate cannot be negative"));
                }
                Ok(AccountKind::Savings {
                    minimum_balance,
                    interest_rate,
                })
            }
            Self::Current { overdraft_limit } => {
                if overdraft_limit < Decimal::ZERO {
                    return Err(LedgerError::invalid("overdraft limit cannot be negative"));
                }
                Ok(AccountKind::Current { overdraft_limit })
            }
            Self::FixedTerm {
                term_months,
                interest_rate,
            } => {
                if interest_rate < Decimal::ZERO {
                    return Err(LedgerError::invalid("interest rate cannot be negative"));
                }
                let maturity = opened_at
                    .checked_add_months(Months::new(term_months))
                    .ok_or_else(|| LedgerError::invalid("term is too long"))?;
                Ok(AccountKind::FixedTerm {
                    term_months,
                    interest_rate,
                    maturity,
                })
            }
        }
    }
}

/// Variant of an opened account, with its type-specific rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountKind {
    Savings {
        minimum_balance: Decimal,
        interest_rate: Decimal,
    },
    Current {
        overdraft_limit: Decimal,
    },
    FixedTerm {
        term_months: u32,
        interest_rate: Decimal,
        maturity: DateTime<Utc>,
    },
}

impl AccountKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Savings { .. } => "savings",
            Self::Current { .. } => "current",
            Self::FixedTerm { .. } => "fixed_term",
        }
    }

    /// Annual rate for interest-bearing variants.
    pub fn interest_rate(&self) -> Option<Decimal> {
        match self {
            Self::Savings { interest_rate, .. } | Self::FixedTerm { interest_rate, .. } => {
                Some(*interest_rate)
            }
            Self::Current { .. } => None,
        }
    }

    /// Returns why debiting `amount` from `balance` at `now` is refused, or
    /// `None` when the floor rule allows it.
    pub fn refusal(&self, balance: Decimal, amount: Decimal, now: DateTime<Utc>) -> Option<String> {
        let Some(after) = balance.checked_sub(amount) else {
            return Some(format!("debit of {amount} is out of range"));
        };
        match self {
            Self::Savings {
                minimum_balance, ..
            } => (after < *minimum_balance).then(|| {
                format!("balance {after} would fall below minimum balance {minimum_balance}")
            }),
            Self::Current { overdraft_limit } => (after < -*overdraft_limit)
                .then(|| format!("overdraft limit {overdraft_limit} would be exceeded")),
            Self::FixedTerm { maturity, .. } => {
                if now < *maturity {
                    Some(format!("term deposit matures at {}", maturity.to_rfc3339()))
                } else if after < Decimal::ZERO {
                    Some(format!("insufficient funds: balance is {balance}"))
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Read-only copy of an account, handed to callers and repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub name: String,
    pub kind: AccountKind,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug)]
pub(crate) struct AccountData {
    id: AccountId,
    name: String,
    kind: AccountKind,
    balance: Decimal,
    created_at: DateTime<Utc>,
    transactions: Vec<Transaction>,
    clock: Arc<dyn Clock>,
}

impl AccountData {
    fn assert_invariants(&self) {
        debug_assert!(
            match self.kind {
                AccountKind::Current { overdraft_limit } => self.balance >= -overdraft_limit,
                _ => true,
            },
            "Invariant violated: overdraft exceeded on {}: {}",
            self.id,
            self.balance
        );
        debug_assert!(
            self.transactions
                .windows(2)
                .last()
                .is_none_or(|pair| pair[0].timestamp() <= pair[1].timestamp()),
            "Invariant violated: transactions out of order on {}",
            self.id
        );
    }

    fn validate_amount(amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::invalid(format!(
                "amount must be positive, got {amount}"
            )));
        }
        Ok(())
    }

    /// Balance after crediting `amount`, if it is positive and representable.
    pub(crate) fn credited(&self, amount: Decimal) -> Result<Decimal, LedgerError> {
        Self::validate_amount(amount)?;
        self.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::invalid(format!(
                "crediting {amount} would overflow the balance of account {}",
                self.id
            ))
        })
    }

    fn append(&mut self, kind: TransactionKind, amount: Decimal, counterparty: Option<AccountId>) {
        let timestamp = self.clock.now();
        self.transactions
            .push(Transaction::record(kind, amount, timestamp, counterparty));
    }

    pub(crate) fn id(&self) -> AccountId {
        self.id
    }

    pub(crate) fn balance(&self) -> Decimal {
        self.balance
    }

    pub(crate) fn kind(&self) -> AccountKind {
        self.kind
    }

    pub(crate) fn deposit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        self.balance = self.credited(amount)?;
        self.append(TransactionKind::Deposit, amount, None);
        self.assert_invariants();
        Ok(())
    }

    /// Debits `amount` when the floor rule allows it.
    ///
    /// Returns `Ok(false)` without touching the account otherwise.
    pub(crate) fn withdraw(&mut self, amount: Decimal) -> Result<bool, LedgerError> {
        self.debit(TransactionKind::Withdrawal, amount, None)
    }

    pub(crate) fn transfer_out(
        &mut self,
        amount: Decimal,
        counterparty: AccountId,
    ) -> Result<bool, LedgerError> {
        self.debit(TransactionKind::TransferOut, amount, Some(counterparty))
    }

    fn debit(
        &mut self,
        kind: TransactionKind,
        amount: Decimal,
        counterparty: Option<AccountId>,
    ) -> Result<bool, LedgerError> {
        Self::validate_amount(amount)?;
        if self
            .kind
            .refusal(self.balance, amount, self.clock.now())
            .is_some()
        {
            return Ok(false);
        }
        // `refusal` already rejected unrepresentable results.
        let Some(after) = self.balance.checked_sub(amount) else {
            return Ok(false);
        };
        self.balance = after;
        self.append(kind, amount, counterparty);
        self.assert_invariants();
        Ok(true)
    }

    /// Credits an incoming transfer.
    ///
    /// Transfers call [`credited`](Self::credited) before debiting the source,
    /// so this cannot fail halfway through one.
    pub(crate) fn receive_transfer(
        &mut self,
        amount: Decimal,
        counterparty: AccountId,
    ) -> Result<(), LedgerError> {
        self.balance = self.credited(amount)?;
        self.append(TransactionKind::TransferIn, amount, Some(counterparty));
        self.assert_invariants();
        Ok(())
    }

    /// Applies one month of interest. Returns the amount credited, if any.
    pub(crate) fn add_interest(&mut self) -> Option<Decimal> {
        let rate = self.kind.interest_rate()?;
        let interest = self
            .balance
            .checked_mul(rate)?
            .checked_div(Decimal::from(MONTHS_PER_YEAR))?
            .round_dp(Account::DECIMAL_PRECISION);
        if interest <= Decimal::ZERO {
            return None;
        }
        let Some(balance) = self.balance.checked_add(interest) else {
            tracing::warn!(account = %self.id, %interest, "interest would overflow balance");
            return None;
        };
        self.balance = balance;
        self.append(TransactionKind::Interest, interest, None);
        self.assert_invariants();
        Some(interest)
    }

    pub(crate) fn rename(&mut self, name: &str) -> Result<(), LedgerError> {
        self.name = validate_name(name)?;
        Ok(())
    }

    /// Builds the error explaining a refused debit of `amount`.
    pub(crate) fn rule_violation(&self, amount: Decimal) -> LedgerError {
        let reason = self
            .kind
            .refusal(self.balance, amount, self.clock.now())
            .unwrap_or_else(|| format!("debit of {amount} refused"));
        LedgerError::RuleViolation {
            account: self.id,
            reason,
        }
    }

    pub(crate) fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            balance: self.balance,
            created_at: self.created_at,
            transactions: self.transactions.clone(),
        }
    }
}

fn validate_name(name: &str) -> Result<String, LedgerError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::invalid("account name cannot be blank"));
    }
    Ok(trimmed.to_string())
}

/// Ledger account.
///
/// The identifier and creation time live outside the mutex since they never
/// change; everything else is only reachable through the lock.
#[derive(Debug)]
pub struct Account {
    id: AccountId,
    created_at: DateTime<Utc>,
    inner: Mutex<AccountData>,
}

impl Account {
    pub const DECIMAL_PRECISION: u32 = 4;

    /// Opens an account with zero balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidArgument`] for a blank name or invalid variant
    /// parameters (negative rate, limit or minimum balance).
    pub fn open(
        id: AccountId,
        name: &str,
        account_type: AccountType,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        let name = validate_name(name)?;
        let created_at = clock.now();
        let kind = account_type.into_kind(created_at)?;
        Ok(Self {
            id,
            created_at,
            inner: Mutex::new(AccountData {
                id,
                name,
                kind,
                balance: Decimal::ZERO,
                created_at,
                transactions: Vec::new(),
                clock,
            }),
        })
    }

    /// Rebuilds an account from a persisted snapshot.
    pub fn from_snapshot(snapshot: AccountSnapshot, clock: Arc<dyn Clock>) -> Self {
        Self {
            id: snapshot.id,
            created_at: snapshot.created_at,
            inner: Mutex::new(AccountData {
                id: snapshot.id,
                name: snapshot.name,
                kind: snapshot.kind,
                balance: snapshot.balance,
                created_at: snapshot.created_at,
                transactions: snapshot.transactions,
                clock,
            }),
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    pub fn kind(&self) -> AccountKind {
        self.inner.lock().kind
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.lock().transactions.len()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.inner.lock().transactions.clone()
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        self.inner.lock().snapshot()
    }

    /// Acquires the account mutex. Multi-account callers must lock in
    /// ascending [`AccountId`] order.
    pub(crate) fn lock(&self) -> MutexGuard<'_, AccountData> {
        self.inner.lock()
    }

    /// Credits `amount`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidArgument`] if `amount <= 0` or the balance would
    /// overflow.
    pub fn deposit(&self, amount: Decimal) -> Result<(), LedgerError> {
        self.inner.lock().deposit(amount)
    }

    /// Debits `amount` if the floor rule allows it; `Ok(false)` leaves the
    /// account untouched.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidArgument`] if `amount <= 0`.
    pub fn withdraw(&self, amount: Decimal) -> Result<bool, LedgerError> {
        self.inner.lock().withdraw(amount)
    }

    pub fn transfer_out(&self, amount: Decimal, counterparty: AccountId) -> Result<bool, LedgerError> {
        self.inner.lock().transfer_out(amount, counterparty)
    }

    /// Credits an incoming transfer from `counterparty`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidArgument`] if `amount <= 0` or the balance would
    /// overflow.
    pub fn receive_transfer(
        &self,
        amount: Decimal,
        counterparty: AccountId,
    ) -> Result<(), LedgerError> {
        self.inner.lock().receive_transfer(amount, counterparty)
    }

    /// Credits one month of interest (`balance * rate / 12`). No-op for
    /// current accounts and non-positive balances.
    pub fn add_interest(&self) -> Option<Decimal> {
        self.inner.lock().add_interest()
    }

    pub fn rename(&self, name: &str) -> Result<(), LedgerError> {
        self.inner.lock().rename(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn savings(minimum_balance: Decimal) -> Account {
        Account::open(
            AccountId(100_000_001),
            "Savings",
            AccountType::Savings {
                minimum_balance,
                interest_rate: dec!(0.12),
            },
            Arc::new(SystemClock),
        )
        .unwrap()
    }

    // === AccountData Internal Tests ===

    #[test]
    fn account_data_debit_refused_leaves_state_untouched() {
        let account = savings(dec!(100));
        let mut data = account.lock();
        data.deposit(dec!(150)).unwrap();
        assert!(!data.withdraw(dec!(60)).unwrap());
        assert_eq!(data.balance, dec!(150));
        assert_eq!(data.transactions.len(), 1);
    }

    #[test]
    fn account_data_rule_violation_names_the_floor() {
        let account = savings(dec!(1000));
        let mut data = account.lock();
        data.deposit(dec!(1000)).unwrap();
        let error = data.rule_violation(dec!(50));
        assert_eq!(
            error,
            LedgerError::RuleViolation {
                account: AccountId(100_000_001),
                reason: "balance 950 would fall below minimum balance 1000".into(),
            }
        );
    }

    #[test]
    fn account_data_transfer_legs_reference_counterparty() {
        let account = savings(Decimal::ZERO);
        let mut data = account.lock();
        data.deposit(dec!(10)).unwrap();
        assert!(data.transfer_out(dec!(4), AccountId(200_000_000)).unwrap());
        data.receive_transfer(dec!(1), AccountId(300_000_000)).unwrap();

        let kinds: Vec<_> = data.transactions.iter().map(|t| t.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                TransactionKind::Deposit,
                TransactionKind::TransferOut,
                TransactionKind::TransferIn
            ]
        );
        assert_eq!(data.transactions[1].counterparty(), Some(AccountId(200_000_000)));
        assert_eq!(data.balance, dec!(7));
    }

    #[test]
    fn overflowing_credit_is_rejected_without_mutation() {
        let account = savings(Decimal::ZERO);
        account.deposit(Decimal::MAX).unwrap();

        assert!(matches!(
            account.deposit(Decimal::ONE),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(matches!(
            account.receive_transfer(Decimal::MAX, AccountId(200_000_000)),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert_eq!(account.balance(), Decimal::MAX);
        assert_eq!(account.transaction_count(), 1);
        // Interest that would overflow is skipped.
        assert_eq!(account.add_interest(), None);
    }

    #[test]
    fn overflowing_debit_is_refused() {
        let account = Account::open(
            AccountId(100_000_003),
            "Deep",
            AccountType::Current {
                overdraft_limit: Decimal::MAX,
            },
            Arc::new(SystemClock),
        )
        .unwrap();
        assert!(account.withdraw(Decimal::MAX).unwrap());
        assert!(!account.withdraw(Decimal::ONE).unwrap());
        assert_eq!(account.balance(), -Decimal::MAX);
        assert_eq!(account.transaction_count(), 1);
    }

    #[test]
    fn interest_is_monthly_and_rounded() {
        let account = savings(Decimal::ZERO);
        account.deposit(dec!(1000)).unwrap();
        // 1000 * 0.12 / 12
        assert_eq!(account.add_interest(), Some(dec!(10)));
        assert_eq!(account.balance(), dec!(1010));

        let odd = savings(Decimal::ZERO);
        odd.deposit(dec!(333.33)).unwrap();
        // 333.33 * 0.12 / 12 = 3.3333
        assert_eq!(odd.add_interest(), Some(dec!(3.3333)));
    }

    #[test]
    fn interest_skipped_on_empty_balance() {
        let account = savings(Decimal::ZERO);
        assert_eq!(account.add_interest(), None);
        assert_eq!(account.transaction_count(), 0);
    }

    #[test]
    fn fixed_term_blocks_withdrawal_until_maturity() {
        let start = Utc.with_ymd_and_hms(2025, 1, 31, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let account = Account::open(
            AccountId(100_000_002),
            "Term",
            AccountType::FixedTerm {
                term_months: 1,
                interest_rate: dec!(0.05),
            },
            clock.clone(),
        )
        .unwrap();
        account.deposit(dec!(500)).unwrap();

        // 2025-01-31 plus one month clamps to 2025-02-28.
        let AccountKind::FixedTerm { maturity, .. } = account.kind() else {
            panic!("expected fixed term");
        };
        assert_eq!(maturity, Utc.with_ymd_and_hms(2025, 2, 28, 9, 0, 0).unwrap());

        assert!(!account.withdraw(dec!(100)).unwrap());
        clock.advance(Duration::from_secs(29 * 24 * 60 * 60));
        assert!(account.withdraw(dec!(100)).unwrap());
        assert!(!account.withdraw(dec!(401)).unwrap());
        assert_eq!(account.balance(), dec!(400));
    }

    #[test]
    fn open_rejects_invalid_parameters() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        assert!(matches!(
            Account::open(
                AccountId(1),
                "x",
                AccountType::Current {
                    overdraft_limit: dec!(-1)
                },
                clock.clone()
            ),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(matches!(
            Account::open(
                AccountId(1),
                "x",
                AccountType::Savings {
                    minimum_balance: Decimal::ZERO,
                    interest_rate: dec!(-0.01)
                },
                clock
            ),
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rename_trims_and_rejects_blank() {
        let account = savings(Decimal::ZERO);
        account.rename("  Holiday fund ").unwrap();
        assert_eq!(account.name(), "Holiday fund");
        assert!(matches!(
            account.rename("\t"),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert_eq!(account.name(), "Holiday fund");
    }

    // === Serialization Tests ===

    #[test]
    fn snapshot_round_trips_through_json() {
        let account = savings(dec!(10));
        account.deposit(dec!(123.4567)).unwrap();
        let snapshot = account.snapshot();

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["id"], 100_000_001);
        assert_eq!(parsed["balance"].as_str().unwrap(), "123.4567");
        assert_eq!(parsed["kind"]["type"], "savings");
        assert_eq!(parsed["transactions"][0]["kind"], "deposit");

        let back: AccountSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn from_snapshot_restores_history() {
        let account = savings(Decimal::ZERO);
        account.deposit(dec!(5)).unwrap();
        let restored = Account::from_snapshot(account.snapshot(), Arc::new(SystemClock));
        assert_eq!(restored.id(), account.id());
        assert_eq!(restored.balance(), dec!(5));
        assert_eq!(restored.transactions(), account.transactions());
    }
}
