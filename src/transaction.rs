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

//! Ledger entries.
//!
//! A [`Transaction`] is created once by the owning account while its lock is
//! held and is never edited afterwards. Debits carry a negative amount.

use crate::base::{AccountId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Interest,
    TransferOut,
    TransferIn,
}

impl TransactionKind {
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::TransferOut | Self::TransferIn)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Interest => "interest",
            Self::TransferOut => "transfer-out",
            Self::TransferIn => "transfer-in",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    id: TransactionId,
    kind: TransactionKind,
    amount: Decimal,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    counterparty: Option<AccountId>,
}

impl Transaction {
    /// `amount` is the unsigned magnitude; the sign is derived from `kind`.
    pub(crate) fn record(
        kind: TransactionKind,
        amount: Decimal,
        timestamp: DateTime<Utc>,
        counterparty: Option<AccountId>,
    ) -> Self {
        let amount = match kind {
            TransactionKind::Withdrawal | TransactionKind::TransferOut => -amount.abs(),
            _ => amount.abs(),
        };
        Self {
            id: TransactionId::new(),
            kind,
            amount,
            timestamp,
            counterparty,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Signed effect on the balance.
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Other side of a transfer, `None` for every other kind.
    pub fn counterparty(&self) -> Option<AccountId> {
        self.counterparty
    }
}
