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

//! TTL cache integration tests.

use bank_ledger_rs::{
    AccountId, AccountSnapshot, AccountType, Bank, Cache, InMemoryRepository, LedgerConfig,
    ManualClock, NoOpCache, Operation, SystemClock, TtlCache,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

fn cache() -> (Arc<ManualClock>, TtlCache<u32, String>) {
    let clock = Arc::new(ManualClock::default());
    let cache = TtlCache::with_clock(clock.clone());
    (clock, cache)
}

#[test]
fn entry_expires_after_ttl() {
    let (clock, cache) = cache();
    cache.put(1, "one".to_string(), Duration::from_secs(10));

    clock.advance(Duration::from_secs(5));
    assert_eq!(cache.get(&1), Some("one".to_string()));

    clock.advance(Duration::from_secs(6));
    assert_eq!(cache.get(&1), None);
    assert!(cache.is_empty(), "expired entry should be evicted on read");
}

#[test]
fn expiry_is_inclusive() {
    let (clock, cache) = cache();
    cache.put(1, "one".to_string(), Duration::from_secs(10));
    clock.advance(Duration::from_secs(10));
    assert_eq!(cache.get(&1), None);
}

#[test]
fn zero_ttl_never_expires() {
    let (clock, cache) = cache();
    cache.put(7, "seven".to_string(), Duration::ZERO);
    clock.advance(Duration::from_secs(365 * 24 * 3600));
    assert_eq!(cache.get(&7), Some("seven".to_string()));
}

#[test]
fn put_replaces_value_and_expiry() {
    let (clock, cache) = cache();
    cache.put(1, "old".to_string(), Duration::from_secs(1));
    cache.put(1, "new".to_string(), Duration::from_secs(60));
    clock.advance(Duration::from_secs(30));
    assert_eq!(cache.get(&1), Some("new".to_string()));
    assert_eq!(cache.len(), 1);
}

#[test]
fn invalidate_and_clear() {
    let (_clock, cache) = cache();
    cache.put(1, "one".to_string(), Duration::from_secs(60));
    cache.put(2, "two".to_string(), Duration::from_secs(60));

    cache.invalidate(&1);
    assert_eq!(cache.get(&1), None);
    assert_eq!(cache.get(&2), Some("two".to_string()));

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn noop_cache_stores_nothing() {
    let cache = NoOpCache;
    Cache::<u32, String>::put(&cache, 1, "one".to_string(), Duration::ZERO);
    assert_eq!(Cache::<u32, String>::get(&cache, &1), None);
}

#[test]
fn concurrent_access_is_consistent() {
    let (_clock, cache) = cache();
    let cache = Arc::new(cache);
    let mut handles = vec![];

    for t in 0..8u32 {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || {
            for i in 0..500u32 {
                let key = (t * 1000) + (i % 50);
                cache.put(key, format!("{t}-{i}"), Duration::from_secs(60));
                assert!(cache.get(&key).is_some_and(|v| v.starts_with(&format!("{t}-"))));
                if i % 7 == 0 {
                    cache.invalidate(&key);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(cache.len() <= 8 * 50);
}

#[test]
fn bank_lookups_go_through_cache() {
    let clock = Arc::new(ManualClock::default());
    let cache: Arc<TtlCache<AccountId, AccountSnapshot>> =
        Arc::new(TtlCache::with_clock(clock.clone()));
    let bank = Bank::with_parts(
        LedgerConfig::default()
            .with_workers(1)
            .with_cache_ttl(Duration::from_secs(30)),
        Arc::new(InMemoryRepository::new()),
        cache.clone(),
        clock.clone(),
    )
    .unwrap();
    let id = bank
        .create_account(
            "Cached",
            AccountType::Current {
                overdraft_limit: Decimal::ZERO,
            },
            dec!(10),
        )
        .unwrap();

    assert_eq!(bank.balance(id), Some(dec!(10)));
    assert_eq!(cache.len(), 1);

    // Completed operations drop the cached snapshot.
    assert!(bank.execute(Operation::deposit(id, dec!(5))).is_success());
    assert_eq!(cache.get(&id), None);
    assert_eq!(bank.balance(id), Some(dec!(15)));

    clock.advance(Duration::from_secs(31));
    assert_eq!(cache.get(&id), None);
    assert_eq!(bank.balance(AccountId(123_456_789)), None);
}

/// Cache whose `put` stalls, widening the gap between a read and its fill.
struct SlowPutCache {
    inner: TtlCache<AccountId, AccountSnapshot>,
    delay: Duration,
}

impl Cache<AccountId, AccountSnapshot> for SlowPutCache {
    fn get(&self, key: &AccountId) -> Option<AccountSnapshot> {
        self.inner.get(key)
    }

    fn put(&self, key: AccountId, value: AccountSnapshot, ttl: Duration) {
        thread::sleep(self.delay);
        self.inner.put(key, value, ttl);
    }

    fn invalidate(&self, key: &AccountId) {
        self.inner.invalidate(key)
    }

    fn clear(&self) {
        self.inner.clear()
    }
}

fn cached_bank(cache: Arc<dyn Cache<AccountId, AccountSnapshot>>) -> Bank {
    Bank::with_parts(
        LedgerConfig::default()
            .with_workers(4)
            .with_cache_ttl(Duration::ZERO),
        Arc::new(InMemoryRepository::new()),
        cache,
        Arc::new(SystemClock),
    )
    .unwrap()
}

fn open_current(bank: &Bank, initial: Decimal) -> AccountId {
    bank.create_account(
        "Cached",
        AccountType::Current {
            overdraft_limit: Decimal::ZERO,
        },
        initial,
    )
    .unwrap()
}

#[test]
fn slow_fill_never_outlives_completed_operation() {
    let bank = Arc::new(cached_bank(Arc::new(SlowPutCache {
        inner: TtlCache::new(),
        delay: Duration::from_millis(300),
    })));
    let id = open_current(&bank, dec!(10));

    let reader = {
        let bank = Arc::clone(&bank);
        thread::spawn(move || bank.balance(id))
    };
    // Let the reader miss the cache and start filling it.
    thread::sleep(Duration::from_millis(50));

    assert!(bank.execute(Operation::deposit(id, dec!(5))).is_success());
    assert_eq!(bank.balance(id), Some(dec!(15)));

    reader.join().unwrap();
    assert_eq!(bank.balance(id), Some(dec!(15)));
}

#[test]
fn reads_racing_operations_see_every_completed_change() {
    let cache: Arc<dyn Cache<AccountId, AccountSnapshot>> = Arc::new(TtlCache::new());
    let bank = Arc::new(cached_bank(cache));
    let a = open_current(&bank, dec!(1000));
    let b = open_current(&bank, Decimal::ZERO);

    let stop = Arc::new(AtomicBool::new(false));
    let mut readers = vec![];
    for _ in 0..4 {
        let bank = Arc::clone(&bank);
        let stop = Arc::clone(&stop);
        readers.push(thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let _ = bank.balance(a);
                let _ = bank.account(b);
            }
        }));
    }

    for i in 1..=100u32 {
        assert!(bank.execute(Operation::deposit(a, dec!(1))).is_success());
        assert_eq!(bank.balance(a), Some(dec!(1000) + Decimal::from(i)));

        assert!(bank.execute(Operation::transfer(a, b, dec!(1))).is_success());
        assert_eq!(bank.balance(a), Some(dec!(1000)));
        assert_eq!(bank.balance(b), Some(Decimal::from(i)));
    }

    stop.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(bank.balance(a), Some(dec!(1000)));
    assert_eq!(bank.balance(b), Some(dec!(100)));
    assert_eq!(bank.transactions(a).unwrap().len(), 201);
    assert_eq!(bank.total_balance(), dec!(1100));
}
