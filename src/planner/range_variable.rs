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

//! Range variables and their resolved access conditions

use std::fmt;
use std::sync::Arc;

use super::cost::{IndexCostOracle, IndexInfo};
use super::expression::{Expr, RangeId, Subquery};
use crate::core::{Error, Operator, Result};

/// One table reference of a FROM clause / join graph
#[derive(Debug, Clone)]
pub struct RangeVariable {
    /// Stable identity used by column references
    pub id: RangeId,
    /// Table metadata and cost oracle
    pub table: Arc<dyn IndexCostOracle>,
    /// Alias used in plans
    pub alias: String,
    /// Null-extended when no row matches (LEFT or FULL join)
    pub is_left_join: bool,
    /// Preceding range variables are null-extended (RIGHT or FULL join)
    pub is_right_join: bool,
    /// May reference columns of preceding range variables in its source
    pub is_lateral: bool,
    /// Created by the resolver (IN rewrite), not written in the query
    pub is_generated: bool,
    /// ON condition as written; moved out by the resolver
    pub join_condition: Option<Expr>,
    /// Rows of a generated range variable
    pub subquery: Option<Arc<Subquery>>,
    /// Access plan evaluated while matching rows; one entry per OR branch
    pub join_conditions: Vec<RangeVariableConditions>,
    /// Filters of an outer range variable evaluated after null extension
    pub where_conditions: Vec<RangeVariableConditions>,
}

impl RangeVariable {
    /// Creates an inner range variable without an ON condition
    pub fn new(id: RangeId, table: Arc<dyn IndexCostOracle>, alias: impl Into<String>) -> Self {
        Self {
            id,
            table,
            alias: alias.into(),
            is_left_join: false,
            is_right_join: false,
            is_lateral: false,
            is_generated: false,
            join_condition: None,
            subquery: None,
            join_conditions: Vec::new(),
            where_conditions: Vec::new(),
        }
    }

    /// `INNER JOIN ... ON condition`
    pub fn inner_join(mut self, on: Expr) -> Self {
        self.join_condition = Some(on);
        self
    }

    /// `LEFT JOIN ... ON condition`
    pub fn left_join(mut self, on: Expr) -> Self {
        self.is_left_join = true;
        self.join_condition = Some(on);
        self
    }

    /// `RIGHT JOIN ... ON condition`
    pub fn right_join(mut self, on: Expr) -> Self {
        self.is_right_join = true;
        self.join_condition = Some(on);
        self
    }

    /// `FULL JOIN ... ON condition`
    pub fn full_join(mut self, on: Expr) -> Self {
        self.is_left_join = true;
        self.is_right_join = true;
        self.join_condition = Some(on);
        self
    }

    /// Marks the range variable as LATERAL
    pub fn lateral(mut self) -> Self {
        self.is_lateral = true;
        self
    }

    pub(crate) fn generated(
        id: RangeId,
        table: Arc<dyn IndexCostOracle>,
        subquery: Arc<Subquery>,
    ) -> Self {
        let mut var = Self::new(id, table, format!("{}#{}", subquery.name, id));
        var.is_generated = true;
        var.subquery = Some(subquery);
        var.join_conditions = vec![RangeVariableConditions::new(true)];
        var
    }

    /// True for LEFT, RIGHT and FULL joins
    pub fn is_outer(&self) -> bool {
        self.is_left_join || self.is_right_join
    }

    /// True when the first access branch seeks an index
    pub fn has_index(&self) -> bool {
        self.join_conditions.first().is_some_and(|c| c.has_index())
    }
}

impl fmt::Display for RangeVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = match (self.is_left_join, self.is_right_join) {
            (true, true) => "FULL ",
            (true, false) => "LEFT ",
            (false, true) => "RIGHT ",
            (false, false) => "",
        };
        write!(f, "{}{} {}", join, self.table.name(), self.alias)?;
        for (i, c) in self.join_conditions.iter().enumerate() {
            write!(f, "\n  branch {}: {}", i, c)?;
        }
        for c in &self.where_conditions {
            write!(f, "\n  where: {}", c)?;
        }
        Ok(())
    }
}

/// Resolved access plan for one range variable or one OR branch of it.
///
/// Equality probes in `index_cond` line up with the index key: probe `i`
/// constrains key column `i`, and there are never more probes than key
/// columns. An optional range scan continues on the next key column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeVariableConditions {
    /// Chosen index, None means full scan
    pub index: Option<Arc<IndexInfo>>,
    /// Equality probes, contiguous from the first key column
    pub index_cond: Vec<Expr>,
    /// Lower bound (`>`, `>=`, `IS NOT NULL`) on the key column after the probes
    pub range_start: Option<Expr>,
    /// Upper bound (`<`, `<=`) on the same key column
    pub index_end_condition: Option<Expr>,
    /// Conjunctive filter applied to every row the access path returns
    pub residual: Option<Expr>,
    /// Rows already produced by earlier OR branches
    pub exclude: Option<Expr>,
    /// Built from an ON clause (or a merged inner-join list)
    pub is_join: bool,
}

impl RangeVariableConditions {
    pub fn new(is_join: bool) -> Self {
        Self {
            is_join,
            ..Default::default()
        }
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Number of leading key columns bound by equality probes
    pub fn indexed_column_count(&self) -> usize {
        self.index_cond.len()
    }

    /// Key column scanned by the range bounds, if any
    pub fn range_column(&self) -> Option<usize> {
        if self.range_start.is_none() && self.index_end_condition.is_none() {
            return None;
        }
        self.index
            .as_ref()
            .and_then(|i| i.columns.get(self.index_cond.len()).copied())
    }

    /// ANDs a predicate into the residual filter
    pub fn add_residual(&mut self, expr: Expr) {
        self.residual = Some(Expr::and_opt(self.residual.take(), expr));
    }

    /// Every predicate the branch applies, excluding the exclude guard
    pub fn conditions(&self) -> impl Iterator<Item = &Expr> {
        self.index_cond
            .iter()
            .chain(self.range_start.iter())
            .chain(self.index_end_condition.iter())
            .chain(self.residual.iter())
    }

    /// Conjunction of [`conditions`](Self::conditions), TRUE when empty
    pub fn full_condition(&self) -> Expr {
        Expr::and_all(self.conditions().cloned()).unwrap_or(Expr::True)
    }

    /// Checks the probe layout against the index of range variable `range`
    pub fn validate(&self, range: RangeId) -> Result<()> {
        let Some(index) = &self.index else {
            if self.index_cond.is_empty()
                && self.range_start.is_none()
                && self.index_end_condition.is_none()
            {
                return Ok(());
            }
            return Err(Error::internal("index probes without an index"));
        };
        if self.index_cond.len() > index.column_count() {
            return Err(Error::internal(format!(
                "{} probes exceed the {} columns of index {}",
                self.index_cond.len(),
                index.column_count(),
                index.name
            )));
        }
        for (i, probe) in self.index_cond.iter().enumerate() {
            let bound = probe
                .simple_predicate_on(range)
                .filter(|p| matches!(p.op, Operator::Eq | Operator::IsNull))
                .map(|p| p.column);
            if bound != Some(index.columns[i]) {
                return Err(Error::internal(format!(
                    "probe {} ({}) does not bind column {} of index {}",
                    i, probe, index.columns[i], index.name
                )));
            }
        }
        let bounds = [
            (&self.range_start, Operator::is_lower_bound as fn(&Operator) -> bool),
            (&self.index_end_condition, Operator::is_upper_bound),
        ];
        for (bound, accepts) in bounds {
            let Some(bound) = bound else { continue };
            let scanned = bound
                .simple_predicate_on(range)
                .filter(|p| accepts(&p.op))
                .map(|p| p.column);
            if scanned.is_none() || scanned != self.range_column() {
                return Err(Error::internal(format!(
                    "range bound ({}) does not scan the column after the probes of index {}",
                    bound, index.name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for RangeVariableConditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index {
            Some(index) => write!(f, "index {}", index.name)?,
            None => write!(f, "full scan")?,
        }
        if !self.index_cond.is_empty() {
            write!(f, " probes [")?;
            for (i, probe) in self.index_cond.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", probe)?;
            }
            write!(f, "]")?;
        }
        if let Some(start) = &self.range_start {
            write!(f, " from {}", start)?;
        }
        if let Some(end) = &self.index_end_condition {
            write!(f, " to {}", end)?;
        }
        if let Some(residual) = &self.residual {
            write!(f, " filter {}", residual)?;
        }
        if let Some(exclude) = &self.exclude {
            write!(f, " exclude {}", exclude)?;
        }
        Ok(())
    }
}
