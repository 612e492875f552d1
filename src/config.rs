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

//! Bank configuration.

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Worker threads draining the operation queue.
    pub workers: usize,
    /// Operations that may wait in the queue before `submit` starts rejecting.
    pub queue_capacity: usize,
    /// Lifetime of cached account snapshots. Zero keeps them until invalidated.
    pub cache_ttl: Duration,
    /// Runs the interest batch on this period when set.
    pub interest_interval: Option<Duration>,
}

impl LedgerConfig {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    pub fn with_interest_interval(mut self, interval: Duration) -> Self {
        self.interest_interval = Some(interval);
        self
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.workers == 0 {
            return Err(LedgerError::invalid("at least one worker is required"));
        }
        if self.queue_capacity == 0 {
            return Err(LedgerError::invalid("queue capacity must be positive"));
        }
        if self.interest_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(LedgerError::invalid("interest interval must be positive"));
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            cache_ttl: Self::DEFAULT_CACHE_TTL,
            interest_interval: None,
        }
    }
}
