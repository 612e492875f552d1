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

//! Ledger orchestrator.
//!
//! The [`Bank`] owns every account, issues identifiers and runs submitted
//! [`Operation`]s on a fixed pool of worker threads.
//!
//! # Operation lifecycle
//!
//! - **Submit**: the operation is pushed onto a bounded queue without
//!   blocking. A full queue or a stopped bank resolves the handle immediately
//!   with a failed result.
//! - **Dispatch**: workers pull operations in submission order and run them in
//!   parallel. Completion order is not guaranteed.
//! - **Complete**: the cache entries of the touched accounts are invalidated,
//!   observers are notified, and the [`OperationHandle`] resolves.
//!
//! # Thread Safety
//!
//! Registry changes are serialized by one coarse lock; account mutations take
//! only the per-account locks. See [`Operation`] for the transfer lock order.

use crate::account::{Account, AccountSnapshot, AccountType};
use crate::base::AccountId;
use crate::cache::{Cache, TtlCache};
use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::observer::{LedgerEvent, Observer, Observers};
use crate::operation::{Operation, OperationResult};
use crate::registry::Registry;
use crate::repository::{InMemoryRepository, Repository};
use crate::schedule::InterestSchedule;
use crate::transaction::Transaction;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pending result of a submitted operation.
#[derive(Debug)]
pub struct OperationHandle {
    operation: Operation,
    result: Receiver<OperationResult>,
}

impl OperationHandle {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Blocks until a worker has run the operation.
    pub fn wait(self) -> OperationResult {
        self.result
            .recv()
            .unwrap_or_else(|_| OperationResult::failure(&self.operation, LedgerError::ShuttingDown))
    }

    /// Blocks for at most `timeout`; `None` if the operation has not finished.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<OperationResult> {
        match self.result.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(OperationResult::failure(
                &self.operation,
                LedgerError::ShuttingDown,
            )),
        }
    }

    /// Returns the result if it is already available.
    pub fn try_result(&self) -> Option<OperationResult> {
        match self.result.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(OperationResult::failure(
                &self.operation,
                LedgerError::ShuttingDown,
            )),
        }
    }
}

struct Job {
    operation: Operation,
    reply: Sender<OperationResult>,
}

/// State shared between the bank handle, its workers and its scheduler.
struct LedgerCore {
    config: LedgerConfig,
    registry: Registry,
    repository: Arc<dyn Repository>,
    cache: Arc<dyn Cache<AccountId, AccountSnapshot>>,
    clock: Arc<dyn Clock>,
    observers: Observers,
    draining: AtomicBool,
}

impl LedgerCore {
    fn dispatch(&self, operation: &Operation) -> OperationResult {
        let result = operation.execute(
            &self.registry,
            self.repository.as_ref(),
            self.cache.as_ref(),
        );
        self.notify_result(&result);
        result
    }

    /// Runs `job` on the calling worker. A panic fails only this job.
    fn run(&self, job: Job) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&job.operation)));
        let result = outcome.unwrap_or_else(|payload| {
            let reason = panic_reason(payload.as_ref());
            tracing::error!(operation = %job.operation, %reason, "operation panicked");
            // The panic may have left a mutation behind.
            for id in job.operation.accounts() {
                self.cache.invalidate(&id);
            }
            let result = OperationResult::failure(&job.operation, LedgerError::Internal(reason));
            self.notify_result(&result);
            result
        });
        // The submitter may have dropped its handle.
        let _ = job.reply.send(result);
    }

    /// Resolves `job` with `error` without running it.
    fn reject(&self, job: Job, error: LedgerError) {
        let result = OperationResult::failure(&job.operation, error);
        self.notify_result(&result);
        let _ = job.reply.send(result);
    }

    fn notify_result(&self, result: &OperationResult) {
        let message = result.message().to_string();
        let event = if result.is_success() {
            LedgerEvent::OperationCompleted { message }
        } else {
            LedgerEvent::OperationFailed { message }
        };
        self.observers.notify(&event);
    }

    fn run_interest_batch(&self) -> Result<usize, LedgerError> {
        // The registry lock is released before any account is touched.
        let accounts = self.registry.snapshot();
        let mut processed = 0;
        let mut first_error = None;

        for account in accounts {
            let mut data = account.lock();
            if data.kind().interest_rate().is_none() {
                continue;
            }
            if !self.registry.contains(account.id()) {
                continue;
            }
            processed += 1;
            if let Some(interest) = data.add_interest() {
                tracing::trace!(account = %account.id(), %interest, "interest credited");
                self.cache.invalidate(&account.id());
                if let Err(cause) = self.repository.save_account(&data.snapshot()) {
                    tracing::error!(account = %account.id(), %cause, "failed to persist interest");
                    first_error.get_or_insert(LedgerError::Persistence(cause));
                }
            }
        }

        tracing::info!(processed, "interest batch finished");
        self.observers
            .notify(&LedgerEvent::InterestApplied { accounts: processed });
        match first_error {
            Some(error) => Err(error),
            None => Ok(processed),
        }
    }
}

fn worker_loop(core: Arc<LedgerCore>, jobs: Receiver<Job>) {
    tracing::debug!("worker started");
    while let Ok(job) = jobs.recv() {
        if core.draining.load(Ordering::Acquire) {
            core.reject(job, LedgerError::ShuttingDown);
        } else {
            core.run(job);
        }
    }
    tracing::debug!("worker stopped");
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        (*reason).to_string()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Ledger orchestrator.
///
/// # Example
///
/// ```
/// use bank_ledger_rs::{AccountType, Bank, LedgerConfig, Operation};
/// use rust_decimal_macros::dec;
///
/// let bank = Bank::new(LedgerConfig::default().with_workers(2)).unwrap();
/// let id = bank
///     .create_account("Alice", AccountType::Current { overdraft_limit: dec!(0) }, dec!(0))
///     .unwrap();
///
/// let result = bank.submit(Operation::deposit(id, dec!(100))).wait();
/// assert!(result.is_success());
/// assert_eq!(bank.balance(id), Some(dec!(100)));
/// ```
pub struct Bank {
    core: Arc<LedgerCore>,
    jobs: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    schedule: Mutex<Option<InterestSchedule>>,
}

impl Bank {
    /// Creates a bank with an in-memory repository, a TTL cache and the
    /// system clock.
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache: Arc<dyn Cache<AccountId, AccountSnapshot>> =
            Arc::new(TtlCache::with_clock(Arc::clone(&clock)));
        Self::with_parts(config, Arc::new(InMemoryRepository::new()), cache, clock)
    }

    /// Creates a bank from explicit collaborators, loading every account the
    /// repository already holds.
    pub fn with_parts(
        config: LedgerConfig,
        repository: Arc<dyn Repository>,
        cache: Arc<dyn Cache<AccountId, AccountSnapshot>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        config.validate()?;

        let registry = Registry::new();
        for snapshot in repository.load_accounts()? {
            registry.restore(Account::from_snapshot(snapshot, Arc::clone(&clock)))?;
        }
        let restored = registry.len();

        let core = Arc::new(LedgerCore {
            config,
            registry,
            repository,
            cache,
            clock,
            observers: Observers::default(),
            draining: AtomicBool::new(false),
        });

        let (sender, receiver) = channel::bounded(core.config.queue_capacity);
        let mut workers = Vec::with_capacity(core.config.workers);
        for index in 0..core.config.workers {
            let core = Arc::clone(&core);
            let jobs = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("ledger-worker-{index}"))
                .spawn(move || worker_loop(core, jobs));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    drop(sender);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(LedgerError::Spawn(e.to_string()));
                }
            }
        }

        let bank = Self {
            core,
            jobs: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            schedule: Mutex::new(None),
        };
        if let Some(interval) = bank.core.config.interest_interval {
            let schedule = bank.start_interest_schedule(interval)?;
            *bank.schedule.lock() = Some(schedule);
        }

        tracing::info!(
            workers = bank.core.config.workers,
            queue_capacity = bank.core.config.queue_capacity,
            restored,
            "bank started"
        );
        Ok(bank)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.core.config
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) {
        self.core.observers.register(observer);
    }

    /// Opens an account under a fresh random identifier.
    ///
    /// A positive `initial_deposit` is recorded as the first transaction.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidArgument`] - blank name, negative initial deposit
    ///   or invalid variant parameters.
    /// - [`LedgerError::Persistence`] - the repository rejected the new account;
    ///   nothing is registered.
    pub fn create_account(
        &self,
        name: &str,
        account_type: AccountType,
        initial_deposit: Decimal,
    ) -> Result<AccountId, LedgerError> {
        if initial_deposit < Decimal::ZERO {
            return Err(LedgerError::invalid(format!(
                "initial deposit cannot be negative, got {initial_deposit}"
            )));
        }

        let clock = Arc::clone(&self.core.clock);
        let account = self.core.registry.insert_new(|id| {
            let account = Account::open(id, name, account_type, clock)?;
            if initial_deposit > Decimal::ZERO {
                account.deposit(initial_deposit)?;
            }
            Ok(account)
        })?;

        let snapshot = account.snapshot();
        if let Err(cause) = self.core.repository.save_account(&snapshot) {
            self.core.registry.remove(snapshot.id);
            tracing::error!(account = %snapshot.id, %cause, "failed to persist new account");
            return Err(cause.into());
        }

        tracing::info!(account = %snapshot.id, kind = %snapshot.kind, "account created");
        self.core.observers.notify(&LedgerEvent::AccountCreated {
            id: snapshot.id,
            name: snapshot.name,
            kind: snapshot.kind,
        });
        Ok(snapshot.id)
    }

    /// Removes an account. Returns whether it existed.
    ///
    /// Operations already queued for it fail with
    /// [`LedgerError::AccountNotFound`] when dispatched.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] if the repository delete fails; the
    /// account then stays open.
    pub fn close_account(&self, id: AccountId) -> Result<bool, LedgerError> {
        let Some(account) = self.core.registry.get(id) else {
            return Ok(false);
        };
        // Held until the account is unregistered so no in-flight mutation can
        // re-save it after the delete.
        let _guard = account.lock();
        self.core.repository.delete_account(id)?;
        if self.core.registry.remove(id).is_none() {
            // Closed concurrently while this call waited for the lock.
            return Ok(false);
        }
        self.core.cache.invalidate(&id);

        tracing::info!(account = %id, "account closed");
        self.core
            .observers
            .notify(&LedgerEvent::AccountClosed { id });
        Ok(true)
    }

    pub fn rename_account(&self, id: AccountId, name: &str) -> Result<(), LedgerError> {
        let account = self
            .core
            .registry
            .get(id)
            .ok_or(LedgerError::AccountNotFound(id))?;
        let mut data = account.lock();
        data.rename(name)?;
        self.core.cache.invalidate(&id);
        self.core.repository.save_account(&data.snapshot())?;
        Ok(())
    }

    /// Queues `operation` without blocking.
    pub fn submit(&self, operation: Operation) -> OperationHandle {
        let (reply, result) = channel::bounded(1);
        let handle = OperationHandle { operation, result };
        let job = Job { operation, reply };

        let rejected = match self.jobs.lock().as_ref() {
            None => Some((job, LedgerError::ShuttingDown)),
            Some(sender) => match sender.try_send(job) {
                Ok(()) => None,
                Err(TrySendError::Full(job)) => {
                    tracing::warn!(operation = %operation, "operation queue full; rejecting");
                    Some((job, LedgerError::QueueFull))
                }
                Err(TrySendError::Disconnected(job)) => Some((job, LedgerError::ShuttingDown)),
            },
        };
        // Observers run outside the queue lock.
        if let Some((job, error)) = rejected {
            self.core.reject(job, error);
        }
        handle
    }

    /// Submits `operation` and waits for its result.
    pub fn execute(&self, operation: Operation) -> OperationResult {
        self.submit(operation).wait()
    }

    /// Applies one month of interest to every savings and fixed-term account.
    ///
    /// Returns the number of interest-bearing accounts processed. Persistence
    /// failures do not stop the batch; the first one is returned afterwards.
    pub fn run_interest_batch(&self) -> Result<usize, LedgerError> {
        self.core.run_interest_batch()
    }

    /// Runs the interest batch every `interval` until the returned handle is
    /// stopped or dropped.
    pub fn start_interest_schedule(&self, interval: Duration) -> Result<InterestSchedule, LedgerError> {
        let core: Weak<LedgerCore> = Arc::downgrade(&self.core);
        InterestSchedule::start(interval, move || {
            if let Some(core) = core.upgrade() {
                if let Err(error) = core.run_interest_batch() {
                    tracing::error!(%error, "scheduled interest batch failed");
                }
            }
        })
    }

    /// Read-through lookup of an account snapshot.
    ///
    /// The cache is filled while the account lock is held. Mutations drop the
    /// entry under the same lock, so a completed operation is never followed
    /// by an older cached snapshot.
    pub fn account(&self, id: AccountId) -> Option<AccountSnapshot> {
        if let Some(snapshot) = self.core.cache.get(&id) {
            return Some(snapshot);
        }
        let account = self.core.registry.get(id)?;
        let data = account.lock();
        // Closed between the registry lookup and the lock.
        if !self.core.registry.contains(id) {
            return None;
        }
        let snapshot = data.snapshot();
        self.core
            .cache
            .put(id, snapshot.clone(), self.core.config.cache_ttl);
        Some(snapshot)
    }

    pub fn balance(&self, id: AccountId) -> Option<Decimal> {
        self.account(id).map(|snapshot| snapshot.balance)
    }

    pub fn transactions(&self, id: AccountId) -> Option<Vec<Transaction>> {
        self.account(id).map(|snapshot| snapshot.transactions)
    }

    /// Snapshots of every open account, ordered by identifier.
    pub fn accounts(&self) -> Vec<AccountSnapshot> {
        self.core
            .registry
            .snapshot()
            .iter()
            .map(|account| account.snapshot())
            .collect()
    }

    pub fn account_count(&self) -> usize {
        self.core.registry.len()
    }

    /// Sum of all balances, saturating at the bounds of [`Decimal`].
    pub fn total_balance(&self) -> Decimal {
        self.core
            .registry
            .snapshot()
            .iter()
            .fold(Decimal::ZERO, |total, account| {
                total.saturating_add(account.balance())
            })
    }

    /// Operations waiting for a worker.
    pub fn pending(&self) -> usize {
        self.jobs.lock().as_ref().map_or(0, |sender| sender.len())
    }

    pub fn is_running(&self) -> bool {
        self.jobs.lock().is_some()
    }

    /// Stops accepting operations, rejects those still queued, waits for the
    /// in-flight ones and joins the workers. Idempotent.
    pub fn shutdown(&self) {
        let sender = {
            let mut jobs = self.jobs.lock();
            // Set before the sender goes so no queued job slips through.
            self.core.draining.store(true, Ordering::Release);
            jobs.take()
        };
        let Some(sender) = sender else {
            return;
        };
        if let Some(mut schedule) = self.schedule.lock().take() {
            schedule.stop();
        }
        drop(sender);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("ledger worker panicked");
            }
        }
        tracing::info!("bank stopped");
    }
}

impl Drop for Bank {
    fn drop(&mut self) {
        self.shutdown();
    }
}
