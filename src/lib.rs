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

//! # mvplan - join planning and MVCC transactions for an embedded engine
//!
//! Two independent pieces of a relational engine's core:
//!
//! - **Range variable resolution** - turns the FROM list of a statement and
//!   its combined WHERE/ON predicate into an executable nested-loop plan:
//!   conjunct decomposition, outer-join downgrade, transitive equalities,
//!   greedy inner-join reordering, index selection with equality probes and
//!   range bounds, OR splitting with exclude guards, and an optional
//!   IN-subquery-to-join rewrite.
//! - **MVCC transaction management** - a global clock, per-row action logs
//!   deciding visibility by isolation level, write-write conflicts reported
//!   as `Proceed | Redo | Abort`, proactive deadlock refusal, countable
//!   latches for waits, savepoints, deferred merging of committed changes,
//!   and an exclusive catalog lock.
//!
//! ## Quick Start
//!
//! ```rust
//! use mvplan::{Expr, PlannerConfig, RangeVariable, RangeVariableResolver, TableMeta};
//!
//! let orders = TableMeta::new("orders", 3)
//!     .with_rows(10_000)
//!     .with_index("orders_pk", &[0], true)
//!     .into_oracle();
//! let vars = vec![RangeVariable::new(0, orders, "o")];
//! let filter = Expr::and(
//!     Expr::eq(Expr::col(0, 0), Expr::lit(5)),
//!     Expr::compare(mvplan::Operator::Gt, Expr::col(0, 1), Expr::lit(3)),
//! );
//!
//! let config = PlannerConfig::default();
//! let plan = RangeVariableResolver::new(&config)
//!     .resolve(vars, Some(filter), None)
//!     .unwrap();
//! assert_eq!(plan[0].join_conditions[0].index.as_ref().unwrap().name, "orders_pk");
//! ```
//!
//! ## Modules
//!
//! - [`planner`] - Expressions, cost oracle, range variables and the resolver
//! - [`executor`] - Reference nested-loop executor for resolved plans
//! - [`storage`] - Configuration and the [`storage::mvcc`] transaction manager
//! - [`core`] - Core types ([`Value`], [`Operator`], [`IsolationLevel`], [`Error`])
//! - [`common`] - Hash map aliases

pub mod common;
pub mod core;
pub mod executor;
pub mod planner;
pub mod storage;

// Re-export main types for convenience
pub use core::{Error, IsolationLevel, Operator, Result, Value};

// Re-export planner types
pub use planner::{
    ColumnRef, Expr, IndexCostOracle, IndexInfo, Quantifier, RangeId, RangeVariable,
    RangeVariableConditions, RangeVariableResolver, SortSpec, Subquery, TableMeta,
};

// Re-export executor types
pub use executor::{execute_plan, execute_unplanned, JoinedRow, Row, TableRows};

// Re-export config types
pub use storage::{Config, PlannerConfig, TransactionConfig};

// Re-export MVCC types
pub use storage::{
    ActionOutcome, Attempt, MemoryRowStore, ResetMode, RowStore, Session, SessionId,
    StatementProfile, TransactionManager,
};
