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

//! Wait-for graph between sessions
//!
//! An edge `waiter -> holder` exists while `waiter` is parked until
//! `holder` ends its transaction. A new edge that would close a cycle is
//! refused, so sessions never block each other forever.

use smallvec::SmallVec;

use super::session::SessionId;
use crate::common::FxMap;

type Sessions = SmallVec<[SessionId; 4]>;

#[derive(Debug, Default)]
pub struct WaitGraph {
    /// waiter -> sessions it waits for
    waits_for: FxMap<SessionId, Sessions>,
    /// holder -> sessions waiting for it
    waited_by: FxMap<SessionId, Sessions>,
}

impl WaitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when making `waiter` wait for `holder` would close a cycle
    pub fn would_deadlock(&self, waiter: SessionId, holder: SessionId) -> bool {
        if waiter == holder {
            return true;
        }
        let mut stack: Sessions = SmallVec::new();
        let mut visited: Sessions = SmallVec::new();
        stack.push(holder);
        while let Some(current) = stack.pop() {
            if current == waiter {
                return true;
            }
            if visited.contains(&current) {
                continue;
            }
            visited.push(current);
            if let Some(next) = self.waits_for.get(&current) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    /// Adds `waiter -> holder`. Returns false if the edge already existed.
    pub fn add_edge(&mut self, waiter: SessionId, holder: SessionId) -> bool {
        let holders = self.waits_for.entry(waiter).or_default();
        if holders.contains(&holder) {
            return false;
        }
        holders.push(holder);
        self.waited_by.entry(holder).or_default().push(waiter);
        true
    }

    /// Removes every edge into `holder` and returns the released waiters
    pub fn release(&mut self, holder: SessionId) -> Sessions {
        let waiters = self.waited_by.remove(&holder).unwrap_or_default();
        for waiter in &waiters {
            if let Some(holders) = self.waits_for.get_mut(waiter) {
                holders.retain(|h| *h != holder);
                if holders.is_empty() {
                    self.waits_for.remove(waiter);
                }
            }
        }
        waiters
    }

    /// Removes every edge out of `waiter`
    pub fn clear_waits(&mut self, waiter: SessionId) {
        let holders = self.waits_for.remove(&waiter).unwrap_or_default();
        for holder in &holders {
            if let Some(waiters) = self.waited_by.get_mut(holder) {
                waiters.retain(|w| *w != waiter);
                if waiters.is_empty() {
                    self.waited_by.remove(holder);
                }
            }
        }
    }

    pub fn waiters_of(&self, holder: SessionId) -> &[SessionId] {
        self.waited_by.get(&holder).map(|w| w.as_slice()).unwrap_or(&[])
    }

    pub fn holders_of(&self, waiter: SessionId) -> &[SessionId] {
        self.waits_for.get(&waiter).map(|h| h.as_slice()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.waits_for.is_empty()
    }

    pub fn clear(&mut self) {
        self.waits_for.clear();
        self.waited_by.clear();
    }
}
