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

//! Engine configuration
//!

use std::time::Duration;

use crate::core::IsolationLevel;

/// Configuration options for the range-variable resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Reorder the inner-join prefix by estimated index cost
    /// Default: true
    pub reorder_joins: bool,

    /// Plan an unindexed range variable as a union of index scans when a
    /// residual OR has an index for every disjunct
    /// Default: true
    pub or_split: bool,

    /// An OR with more disjuncts than this stays a residual filter
    /// Default: 32
    pub max_or_branches: usize,

    /// How many nested levels of OR splitting are attempted
    /// Default: 1
    pub max_or_depth: usize,

    /// Rewrite `col IN (subquery)` into a join against the materialized
    /// subquery, probing an index on the outer table. Experimental.
    /// Default: false
    pub in_as_join: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            reorder_joins: true,
            or_split: true,
            max_or_branches: 32,
            max_or_depth: 1,
            in_as_join: false,
        }
    }
}

impl PlannerConfig {
    /// Creates a new PlannerConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the written join order and never splits predicates.
    /// Useful to compare plans against the naive strategy.
    pub fn literal() -> Self {
        Self {
            reorder_joins: false,
            or_split: false,
            max_or_branches: 0,
            max_or_depth: 0,
            in_as_join: false,
        }
    }

    /// Builder method to enable/disable join reordering
    pub fn with_reorder_joins(mut self, enabled: bool) -> Self {
        self.reorder_joins = enabled;
        self
    }

    /// Builder method to enable/disable OR splitting
    pub fn with_or_split(mut self, enabled: bool) -> Self {
        self.or_split = enabled;
        self
    }

    /// Builder method to set the OR branch limit
    pub fn with_max_or_branches(mut self, branches: usize) -> Self {
        self.max_or_branches = branches;
        self
    }

    /// Builder method to set the nested OR depth guard
    pub fn with_max_or_depth(mut self, depth: usize) -> Self {
        self.max_or_depth = depth;
        self
    }

    /// Builder method to enable/disable the IN-as-join rewrite
    pub fn with_in_as_join(mut self, enabled: bool) -> Self {
        self.in_as_join = enabled;
        self
    }
}

/// Configuration options for the MVCC transaction manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Isolation level given to newly registered sessions
    /// Default: ReadCommitted
    pub default_isolation: IsolationLevel,

    /// Whether a conflict under REPEATABLE READ or SERIALIZABLE rolls back
    /// the whole transaction, not just the statement
    /// Default: true
    pub conflict_rollback: bool,

    /// Redo attempts the statement runner makes before giving up.
    /// None retries until the statement succeeds or aborts.
    /// Default: None
    pub max_redo_attempts: Option<u32>,

    /// Upper bound for a latch wait; None waits until woken or interrupted
    /// Default: None
    pub lock_wait_timeout: Option<Duration>,

    /// Value of the global clock before the first tick
    /// Default: 0
    pub initial_timestamp: i64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            default_isolation: IsolationLevel::ReadCommitted,
            conflict_rollback: true,
            max_redo_attempts: None,
            lock_wait_timeout: None,
            initial_timestamp: 0,
        }
    }
}

impl TransactionConfig {
    /// Creates a new TransactionConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot isolation for every session, conflicts abort the transaction
    pub fn strict() -> Self {
        Self {
            default_isolation: IsolationLevel::Serializable,
            conflict_rollback: true,
            ..Default::default()
        }
    }

    /// Builder method to set the default isolation level
    pub fn with_default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = level;
        self
    }

    /// Builder method to set conflict rollback behaviour
    pub fn with_conflict_rollback(mut self, enabled: bool) -> Self {
        self.conflict_rollback = enabled;
        self
    }

    /// Builder method to bound redo attempts
    pub fn with_max_redo_attempts(mut self, attempts: u32) -> Self {
        self.max_redo_attempts = Some(attempts);
        self
    }

    /// Builder method to bound latch waits
    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = Some(timeout);
        self
    }

    /// Builder method to seed the global clock
    pub fn with_initial_timestamp(mut self, timestamp: i64) -> Self {
        self.initial_timestamp = timestamp;
        self
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Resolver settings
    pub planner: PlannerConfig,

    /// Transaction manager settings
    pub transaction: TransactionConfig,
}

impl Config {
    /// Creates a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set planner config
    pub fn with_planner(mut self, config: PlannerConfig) -> Self {
        self.planner = config;
        self
    }

    /// Builder method to set transaction config
    pub fn with_transaction(mut self, config: TransactionConfig) -> Self {
        self.transaction = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planner_config_default() {
        let config = PlannerConfig::default();
        assert!(config.reorder_joins);
        assert!(config.or_split);
        assert!(!config.in_as_join);
        assert_eq!(config.max_or_branches, 32);
        assert_eq!(config.max_or_depth, 1);
    }

    #[test]
    fn test_planner_config_literal() {
        let config = PlannerConfig::literal();
        assert!(!config.reorder_joins);
        assert!(!config.or_split);
    }

    #[test]
    fn test_planner_config_builder() {
        let config = PlannerConfig::new()
            .with_reorder_joins(false)
            .with_in_as_join(true)
            .with_max_or_branches(4);
        assert!(!config.reorder_joins);
        assert!(config.in_as_join);
        assert_eq!(config.max_or_branches, 4);
    }

    #[test]
    fn test_transaction_config_default() {
        let config = TransactionConfig::default();
        assert_eq!(config.default_isolation, IsolationLevel::ReadCommitted);
        assert!(config.conflict_rollback);
        assert_eq!(config.max_redo_attempts, None);
        assert_eq!(config.lock_wait_timeout, None);
        assert_eq!(config.initial_timestamp, 0);
    }

    #[test]
    fn test_transaction_config_builder() {
        let config = TransactionConfig::strict()
            .with_max_redo_attempts(3)
            .with_lock_wait_timeout(Duration::from_millis(50))
            .with_initial_timestamp(99);
        assert_eq!(config.default_isolation, IsolationLevel::Serializable);
        assert_eq!(config.max_redo_attempts, Some(3));
        assert_eq!(config.lock_wait_timeout, Some(Duration::from_millis(50)));
        assert_eq!(config.initial_timestamp, 99);
    }

    #[test]
    fn test_config_composition() {
        let config = Config::new()
            .with_planner(PlannerConfig::literal())
            .with_transaction(TransactionConfig::strict());
        assert!(!config.planner.reorder_joins);
        assert!(config.transaction.default_isolation.is_snapshot());
    }
}
