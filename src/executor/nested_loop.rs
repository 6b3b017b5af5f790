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

//! Nested loop execution of resolved plans
//!
//! The reference executor exists to check plans, not to be fast. Index
//! probes and range bounds are evaluated as filters over a full scan, which
//! returns exactly the rows an index seek would.
//!
//! RIGHT and FULL joins are planned by the resolver but not executed here.

use tracing::trace;

use super::row_source::{JoinedRow, TableRows};
use crate::core::{Error, Result};
use crate::planner::{Expr, RangeVariable, RangeVariableConditions};

/// Runs a plan produced by the resolver
pub fn execute_plan(plan: &[RangeVariable], tables: &TableRows) -> Result<Vec<JoinedRow>> {
    reject_right_joins(plan)?;
    let mut out = Vec::new();
    let mut current = JoinedRow::new();
    join_planned(plan, tables, 0, &mut current, &mut out)?;
    trace!(rows = out.len(), "plan executed");
    Ok(out)
}

/// Runs range variables as written: ON conditions while matching, WHERE
/// after every join. Used to check that planning preserved results.
pub fn execute_unplanned(
    vars: &[RangeVariable],
    where_condition: Option<&Expr>,
    tables: &TableRows,
) -> Result<Vec<JoinedRow>> {
    reject_right_joins(vars)?;
    let mut joined = Vec::new();
    let mut current = JoinedRow::new();
    join_written(vars, tables, 0, &mut current, &mut joined)?;
    Ok(joined
        .into_iter()
        .filter(|row| where_condition.map_or(true, |w| w.test(row) == Some(true)))
        .collect())
}

fn reject_right_joins(vars: &[RangeVariable]) -> Result<()> {
    match vars.iter().find(|v| v.is_right_join) {
        Some(var) => Err(Error::not_supported(format!(
            "execution of RIGHT or FULL join on {}",
            var.alias
        ))),
        None => Ok(()),
    }
}

fn join_planned(
    plan: &[RangeVariable],
    tables: &TableRows,
    depth: usize,
    current: &mut JoinedRow,
    out: &mut Vec<JoinedRow>,
) -> Result<()> {
    let Some(var) = plan.get(depth) else {
        out.push(current.clone());
        return Ok(());
    };
    let rows = tables.source(var)?;
    let mut matched = false;
    for branch in &var.join_conditions {
        for row in &rows {
            current.bind(var.id, Some(row.clone()));
            if !branch_accepts(branch, current) {
                continue;
            }
            matched = true;
            if filters_accept(&var.where_conditions, current) {
                join_planned(plan, tables, depth + 1, current, out)?;
            }
        }
    }
    if !matched && var.is_left_join {
        current.bind(var.id, None);
        if filters_accept(&var.where_conditions, current) {
            join_planned(plan, tables, depth + 1, current, out)?;
        }
    }
    current.unbind(var.id);
    Ok(())
}

fn branch_accepts(branch: &RangeVariableConditions, row: &JoinedRow) -> bool {
    if branch
        .exclude
        .as_ref()
        .is_some_and(|e| e.test(row) == Some(true))
    {
        return false;
    }
    branch.conditions().all(|e| e.test(row) == Some(true))
}

fn filters_accept(filters: &[RangeVariableConditions], row: &JoinedRow) -> bool {
    filters
        .iter()
        .all(|f| f.conditions().all(|e| e.test(row) == Some(true)))
}

fn join_written(
    vars: &[RangeVariable],
    tables: &TableRows,
    depth: usize,
    current: &mut JoinedRow,
    out: &mut Vec<JoinedRow>,
) -> Result<()> {
    let Some(var) = vars.get(depth) else {
        out.push(current.clone());
        return Ok(());
    };
    let rows = tables.source(var)?;
    let mut matched = false;
    for row in &rows {
        current.bind(var.id, Some(row.clone()));
        let on = var
            .join_condition
            .as_ref()
            .map_or(Some(true), |on| on.test(current));
        if on == Some(true) {
            matched = true;
            join_written(vars, tables, depth + 1, current, out)?;
        }
    }
    if !matched && var.is_left_join {
        current.bind(var.id, None);
        join_written(vars, tables, depth + 1, current, out)?;
    }
    current.unbind(var.id);
    Ok(())
}
