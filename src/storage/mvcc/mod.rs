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

//! MVCC (Multi-Version Concurrency Control) transaction manager
//!
//! - [`TransactionManager`] - Sessions, conflicts, commit and rollback
//! - [`GlobalClock`] - Strictly increasing change timestamps
//! - [`RowAction`] - Per-row change log deciding visibility
//! - [`CountUpDownLatch`] / [`WaitGraph`] - Conflict waits and deadlock checks
//! - [`MemoryRowStore`] - In-memory rows driven by the manager
//!
//! # Transaction Lifecycle
//!
//! ```text
//! Begin -> Active -> [Prepared] -> Committed
//!                 \-> Rolled back
//! ```
//!
//! A conflicting row change rolls back the current statement and returns
//! `Redo` (wait, then retry the statement) or `Abort`.

pub mod commit_log;
pub mod latch;
pub mod manager;
pub mod row_action;
pub mod session;
pub mod statement;
pub mod store;
pub mod timestamp;
pub mod wait_graph;

pub use commit_log::{CommitLog, CommitRecord, MemoryCommitLog, NoopCommitLog};
pub use latch::CountUpDownLatch;
pub use manager::{ActionOutcome, ResetMode, TransactionManager};
pub use row_action::{
    ActionType, DeleteOutcome, MergeOutcome, ReadContext, ReadMode, RollbackType, RowAction,
    Visibility,
};
pub use session::{Session, SessionId, StatementProfile};
pub use statement::Attempt;
pub use store::{MemoryRowStore, RowStore};
pub use timestamp::GlobalClock;
pub use wait_graph::WaitGraph;
