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

//! Index cost oracle
//!
//! The resolver never touches index structures. It asks a table's
//! [`IndexCostOracle`] which indexes could serve a set of columns and what a
//! search through them would cost, then records its choice in the plan.
//!
//! ## Cost Model Approximations
//!
//! The default costs are relative units, not wall-clock time:
//!
//! 1. A unique index probed on all of its columns costs `UNIQUE_PROBE_COST`.
//! 2. Every further equality column divides the expected rows by
//!    `EQUALITY_SELECTIVITY_DIVISOR`.
//! 3. A range probe keeps `1 / RANGE_SELECTIVITY_DIVISOR` of the rows.
//! 4. Nothing is ever cheaper than one row.
//!
//! Storage engines with real statistics override [`IndexCostOracle::search_cost`].

use std::fmt;
use std::sync::Arc;

use crate::core::Operator;

/// Cost of a probe that returns at most one row
pub const UNIQUE_PROBE_COST: f64 = 1.0;

/// Rows kept per equality column: rows / divisor^columns
pub const EQUALITY_SELECTIVITY_DIVISOR: f64 = 10.0;

/// Rows kept by one range bound: rows / divisor
pub const RANGE_SELECTIVITY_DIVISOR: f64 = 3.0;

/// Description of one index of a table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexInfo {
    /// Index id, unique within its table
    pub id: usize,
    /// Index name
    pub name: String,
    /// Indexed column ordinals, in key order
    pub columns: Vec<usize>,
    /// Whether the full key is unique
    pub unique: bool,
}

impl IndexInfo {
    pub fn new(id: usize, name: impl Into<String>, columns: Vec<usize>, unique: bool) -> Self {
        Self {
            id,
            name: name.into(),
            columns,
            unique,
        }
    }

    /// Number of declared key columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Candidate index together with the number of leading columns it can seek on
#[derive(Debug, Clone, PartialEq)]
pub struct IndexUse {
    pub index: Arc<IndexInfo>,
    pub column_count: usize,
}

/// Read-only cost queries against one table's indexes
pub trait IndexCostOracle: Send + Sync + fmt::Debug {
    /// Table name, used in plans and logs
    fn name(&self) -> &str;

    /// Number of columns in the table
    fn column_count(&self) -> usize;

    /// Estimated number of rows
    fn row_count(&self) -> u64;

    /// All indexes of the table
    fn indexes(&self) -> &[Arc<IndexInfo>];

    /// Indexes whose leading columns can be sought with predicates on `columns`.
    ///
    /// For `Operator::Eq` the leading-column match counts every key column
    /// (from the first) that appears in `columns`. For other operators only
    /// the first key column counts. Results are ordered by matched column
    /// count, largest first.
    fn index_for_columns(
        &self,
        columns: &[usize],
        op: Operator,
        include_non_unique: bool,
    ) -> Vec<IndexUse> {
        let mut uses: Vec<IndexUse> = self
            .indexes()
            .iter()
            .filter(|index| include_non_unique || index.unique)
            .filter_map(|index| {
                let matched = if op == Operator::Eq {
                    index
                        .columns
                        .iter()
                        .take_while(|c| columns.contains(c))
                        .count()
                } else {
                    usize::from(index.columns.first().is_some_and(|c| columns.contains(c)))
                };
                (matched > 0).then(|| IndexUse {
                    index: Arc::clone(index),
                    column_count: matched,
                })
            })
            .collect();
        uses.sort_by(|a, b| b.column_count.cmp(&a.column_count));
        uses
    }

    /// Estimated cost of a search on `leading` key columns with `op`
    fn search_cost(&self, index: &IndexInfo, leading: usize, op: Operator) -> f64 {
        let rows = self.row_count().max(1) as f64;
        if leading == 0 {
            return rows;
        }
        if op == Operator::Eq && index.unique && leading >= index.column_count() {
            return UNIQUE_PROBE_COST;
        }
        let cost = if op == Operator::Eq {
            rows / EQUALITY_SELECTIVITY_DIVISOR.powi(leading as i32)
        } else {
            rows / RANGE_SELECTIVITY_DIVISOR
        };
        cost.max(UNIQUE_PROBE_COST)
    }

    /// Index whose first key column is `column`, unique indexes preferred
    fn index_for_column(&self, column: usize) -> Option<Arc<IndexInfo>> {
        let mut found: Option<&Arc<IndexInfo>> = None;
        for index in self.indexes() {
            if index.columns.first() != Some(&column) {
                continue;
            }
            match found {
                Some(current) if current.unique || !index.unique => {}
                _ => found = Some(index),
            }
        }
        found.cloned()
    }
}

/// In-memory table metadata implementing the default cost model
#[derive(Debug, Clone)]
pub struct TableMeta {
    name: String,
    column_count: usize,
    row_count: u64,
    indexes: Vec<Arc<IndexInfo>>,
}

impl TableMeta {
    pub fn new(name: impl Into<String>, column_count: usize) -> Self {
        Self {
            name: name.into(),
            column_count,
            row_count: 1000,
            indexes: Vec::new(),
        }
    }

    /// Builder method to set the row estimate
    pub fn with_rows(mut self, rows: u64) -> Self {
        self.row_count = rows;
        self
    }

    /// Builder method to add an index
    pub fn with_index(mut self, name: impl Into<String>, columns: &[usize], unique: bool) -> Self {
        let id = self.indexes.len();
        self.indexes
            .push(Arc::new(IndexInfo::new(id, name, columns.to_vec(), unique)));
        self
    }

    /// Looks an index up by name
    pub fn index(&self, name: &str) -> Option<Arc<IndexInfo>> {
        self.indexes.iter().find(|i| i.name == name).cloned()
    }

    /// Wraps the metadata as a shareable oracle
    pub fn into_oracle(self) -> Arc<dyn IndexCostOracle> {
        Arc::new(self)
    }
}

impl IndexCostOracle for TableMeta {
    fn name(&self) -> &str {
        &self.name
    }

    fn column_count(&self) -> usize {
        self.column_count
    }

    fn row_count(&self) -> u64 {
        self.row_count
    }

    fn indexes(&self) -> &[Arc<IndexInfo>] {
        &self.indexes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableMeta {
        TableMeta::new("t", 3)
            .with_rows(10_000)
            .with_index("t_a", &[0], true)
            .with_index("t_ab", &[0, 1], false)
            .with_index("t_b", &[1], false)
    }

    #[test]
    fn test_index_for_columns_equality() {
        let t = table();
        let uses = t.index_for_columns(&[0, 1], Operator::Eq, true);
        assert_eq!(uses[0].index.name, "t_ab");
        assert_eq!(uses[0].column_count, 2);
        assert_eq!(uses.len(), 3);

        let uses = t.index_for_columns(&[1], Operator::Eq, true);
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].index.name, "t_b");

        let unique_only = t.index_for_columns(&[0, 1], Operator::Eq, false);
        assert_eq!(unique_only.len(), 1);
        assert_eq!(unique_only[0].index.name, "t_a");
    }

    #[test]
    fn test_index_for_columns_range() {
        let t = table();
        let uses = t.index_for_columns(&[0], Operator::Gt, true);
        assert!(uses.iter().all(|u| u.column_count == 1));
        assert_eq!(uses.len(), 2);
    }

    #[test]
    fn test_search_cost() {
        let t = table();
        let a = t.index("t_a").unwrap();
        let ab = t.index("t_ab").unwrap();
        assert_eq!(t.search_cost(&a, 1, Operator::Eq), UNIQUE_PROBE_COST);
        assert!(t.search_cost(&ab, 2, Operator::Eq) < t.search_cost(&ab, 1, Operator::Eq));
        assert_eq!(t.search_cost(&ab, 0, Operator::Eq), 10_000.0);
        assert!(t.search_cost(&ab, 1, Operator::Gt) > t.search_cost(&ab, 1, Operator::Eq));
    }

    #[test]
    fn test_index_for_column_prefers_unique() {
        let t = table();
        assert_eq!(t.index_for_column(0).unwrap().name, "t_a");
        assert_eq!(t.index_for_column(1).unwrap().name, "t_b");
        assert!(t.index_for_column(2).is_none());
    }
}
