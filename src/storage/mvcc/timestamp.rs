// Copyright 2025 Stoolap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Global logical clock for MVCC
//!
//! Every transaction start, statement start and commit takes the next
//! timestamp. Timestamps are strictly increasing and unique for the life of
//! the manager, and they are the only thing visibility is decided by.

use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic timestamp source owned by one transaction manager
#[derive(Debug)]
pub struct GlobalClock {
    last: AtomicI64,
}

impl GlobalClock {
    /// Creates a clock whose first issued timestamp is `start + 1`
    pub fn new(start: i64) -> Self {
        Self {
            last: AtomicI64::new(start),
        }
    }

    /// Issues the next timestamp
    pub fn next(&self) -> i64 {
        self.last.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Last issued timestamp
    pub fn current(&self) -> i64 {
        self.last.load(Ordering::Acquire)
    }
}

impl Default for GlobalClock {
    fn default() -> Self {
        Self::new(0)
    }
}
