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

//! Lifecycle notifications.
//!
//! Observers are called synchronously on the thread that made the change. A
//! panicking observer is caught and logged; it never fails the change itself.

use crate::account::AccountKind;
use crate::base::AccountId;
use parking_lot::RwLock;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Something that happened in the ledger. `Display` renders the message
/// delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    AccountCreated {
        id: AccountId,
        name: String,
        kind: AccountKind,
    },
    AccountClosed {
        id: AccountId,
    },
    OperationCompleted {
        message: String,
    },
    OperationFailed {
        message: String,
    },
    InterestApplied {
        accounts: usize,
    },
}

impl LedgerEvent {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::OperationFailed { .. })
    }
}

impl fmt::Display for LedgerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccountCreated { id, name, kind } => {
                write!(f, "account {id} ({kind}) created for {name}")
            }
            Self::AccountClosed { id } => write!(f, "account {id} closed"),
            Self::OperationCompleted { message } => write!(f, "completed: {message}"),
            Self::OperationFailed { message } => write!(f, "failed: {message}"),
            Self::InterestApplied { accounts } => {
                write!(f, "interest batch processed {accounts} accounts")
            }
        }
    }
}

pub trait Observer: Send + Sync {
    fn on_event(&self, event: &LedgerEvent);
}

impl<F> Observer for F
where
    F: Fn(&LedgerEvent) + Send + Sync,
{
    fn on_event(&self, event: &LedgerEvent) {
        self(event)
    }
}

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &LedgerEvent) {
        if event.is_failure() {
            tracing::warn!(target: "ledger::events", "{event}");
        } else {
            tracing::info!(target: "ledger::events", "{event}");
        }
    }
}

/// Registered observers.
#[derive(Default)]
pub(crate) struct Observers {
    listeners: RwLock<Vec<Arc<dyn Observer>>>,
}

impl Observers {
    pub(crate) fn register(&self, observer: Arc<dyn Observer>) {
        self.listeners.write().push(observer);
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub(crate) fn notify(&self, event: &LedgerEvent) {
        // Clone the list so observers can register others without deadlocking.
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if outcome.is_err() {
                tracing::warn!(%event, "observer panicked; event delivery continues");
            }
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn event_messages() {
        assert_eq!(
            LedgerEvent::AccountClosed {
                id: AccountId(123_456_789)
            }
            .to_string(),
            "account 123456789 closed"
        );
        assert_eq!(
            LedgerEvent::InterestApplied { accounts: 3 }.to_string(),
            "interest batch processed 3 accounts"
        );
    }

    struct Faulty;

    impl Observer for Faulty {
        fn on_event(&self, _event: &LedgerEvent) {
            panic!("listener bug");
        }
    }

    #[test]
    fn panicking_observer_is_isolated() {
        let observers = Observers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        observers.register(Arc::new(Faulty));
        observers.register(Arc::new(move |event: &LedgerEvent| {
            sink.lock().push(event.to_string())
        }));

        observers.notify(&LedgerEvent::AccountClosed { id: AccountId(1) });
        assert_eq!(*seen.lock(), vec!["account 1 closed".to_string()]);
    }
}
