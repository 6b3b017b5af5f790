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

//! Query planning: range variables, predicates and access path selection
//!
//! - [`expression`]: predicate trees and three-valued evaluation
//! - [`range_variable`]: table references and their planned conditions
//! - [`cost`]: index metadata and the cost oracle
//! - [`resolver`]: the range variable resolver

pub mod cost;
pub mod decompose;
pub mod expression;
mod in_conditions;
mod index_conditions;
mod join_order;
pub mod range_variable;
pub mod resolver;

pub use cost::{IndexCostOracle, IndexInfo, IndexUse, TableMeta};
pub use decompose::{decompose_and, decompose_or, or_operands};
pub use expression::{ColumnRef, Expr, Quantifier, RangeId, RangeSet, RowLookup, Subquery};
pub use range_variable::{RangeVariable, RangeVariableConditions};
pub use resolver::{RangeVariableResolver, SortSpec};
