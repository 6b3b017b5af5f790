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

//! Storage module
//!
//! - [`config`] - Planner and transaction manager settings
//! - [`mvcc`] - MVCC transaction manager, row actions and row stores

pub mod config;
pub mod mvcc;

// Re-export config types
pub use config::{Config, PlannerConfig, TransactionConfig};

// Re-export MVCC types
pub use mvcc::{
    ActionOutcome, Attempt, CommitLog, CommitRecord, MemoryCommitLog, MemoryRowStore,
    NoopCommitLog, ReadMode, ResetMode, RowAction, RowStore, Session, SessionId,
    StatementProfile, TransactionManager,
};
