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

//! Row sources for the reference executor

use std::sync::Arc;

use smallvec::SmallVec;

use crate::common::FxMap;
use crate::core::{Error, Result, Value};
use crate::planner::{ColumnRef, RangeId, RangeVariable, RowLookup};

/// One stored row
pub type Row = Arc<[Value]>;

/// Rows of every table a plan reads, keyed by range variable id
#[derive(Debug, Clone, Default)]
pub struct TableRows {
    tables: FxMap<RangeId, Vec<Row>>,
}

impl TableRows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to add the rows of one range variable
    pub fn with_table(mut self, range: RangeId, rows: Vec<Vec<Value>>) -> Self {
        self.insert(range, rows);
        self
    }

    pub fn insert(&mut self, range: RangeId, rows: Vec<Vec<Value>>) {
        self.tables
            .insert(range, rows.into_iter().map(Row::from).collect());
    }

    /// Rows scanned for `var`: the table's rows, or the distinct subquery
    /// rows of a generated range variable
    pub(crate) fn source(&self, var: &RangeVariable) -> Result<Vec<Row>> {
        if let Some(subquery) = &var.subquery {
            return Ok(subquery
                .distinct_rows()
                .into_iter()
                .map(Row::from)
                .collect());
        }
        self.tables.get(&var.id).cloned().ok_or_else(|| {
            Error::invalid_argument(format!("no rows for range variable {}", var.alias))
        })
    }
}

/// A combination of rows, one slot per bound range variable.
///
/// A slot holding `None` is null-extended: every column reads as NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinedRow {
    slots: SmallVec<[(RangeId, Option<Row>); 4]>,
}

impl JoinedRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bind(&mut self, range: RangeId, row: Option<Row>) {
        match self.slots.iter_mut().find(|(r, _)| *r == range) {
            Some(slot) => slot.1 = row,
            None => self.slots.push((range, row)),
        }
    }

    pub(crate) fn unbind(&mut self, range: RangeId) {
        self.slots.retain(|(r, _)| *r != range);
    }

    /// The bound row of `range`; None when unbound or null-extended
    pub fn row(&self, range: RangeId) -> Option<&Row> {
        self.slots
            .iter()
            .find(|(r, _)| *r == range)
            .and_then(|(_, row)| row.as_ref())
    }

    /// True when `range` is bound to the null row
    pub fn is_null_extended(&self, range: RangeId) -> bool {
        self.slots.iter().any(|(r, row)| *r == range && row.is_none())
    }

    /// Values of `columns`, in order
    pub fn project(&self, columns: &[ColumnRef]) -> Vec<Value> {
        columns.iter().map(|c| self.column_value(c)).collect()
    }
}

impl RowLookup for JoinedRow {
    fn column_value(&self, column: &ColumnRef) -> Value {
        self.row(column.range)
            .and_then(|row| row.get(column.column).cloned())
            .unwrap_or(Value::Null)
    }
}
