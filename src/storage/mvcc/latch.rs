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

//! Countable latch a session parks on while it waits for other sessions
//!
//! The transaction manager counts the latch up once per session it makes
//! the owner wait for, and counts it down as those sessions end their
//! transactions. The owner blocks in [`CountUpDownLatch::await_zero`] until
//! the count reaches zero, the wait times out, or someone interrupts it.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::{Error, Result};

#[derive(Debug, Default)]
struct LatchState {
    count: u32,
    interrupted: bool,
}

/// Counter with a blocking wait for zero
#[derive(Debug, Default)]
pub struct CountUpDownLatch {
    state: Mutex<LatchState>,
    zero: Condvar,
}

impl CountUpDownLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.state.lock().count
    }

    /// Increments the count. Going up from zero starts a new wait, so an
    /// interrupt aimed at an earlier one is discarded.
    pub fn count_up(&self) {
        let mut state = self.state.lock();
        if state.count == 0 {
            state.interrupted = false;
        }
        state.count += 1;
    }

    /// Decrements the count, waking waiters when it reaches zero
    pub fn count_down(&self) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_sub(1);
        if state.count == 0 {
            self.zero.notify_all();
        }
    }

    /// Sets the count and drops any pending interrupt, waking waiters when
    /// the count is zero
    pub fn set_count(&self, count: u32) {
        let mut state = self.state.lock();
        state.count = count;
        state.interrupted = false;
        if count == 0 {
            self.zero.notify_all();
        }
    }

    /// Blocks until the count is zero.
    ///
    /// Returns [`Error::Interrupted`] when [`interrupt`](Self::interrupt)
    /// was called during the wait, or a serialization failure when
    /// `timeout` elapses first.
    pub fn await_zero(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                state.interrupted = false;
                return Err(Error::Interrupted);
            }
            if state.count == 0 {
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self.zero.wait_until(&mut state, deadline).timed_out()
                        && state.count > 0
                        && !state.interrupted
                    {
                        return Err(Error::serialization_failure("lock wait timed out"));
                    }
                }
                None => self.zero.wait(&mut state),
            }
        }
    }

    /// Cancels a pending wait. Returns false when the count is already zero
    /// and there is nothing to cancel.
    pub fn interrupt(&self) -> bool {
        let mut state = self.state.lock();
        if state.count == 0 {
            return false;
        }
        state.interrupted = true;
        self.zero.notify_all();
        true
    }
}
