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

//! IN-subquery rewrite
//!
//! `t.a IN (SELECT x FROM ...)` on an inner range variable that found no
//! index becomes a join: a generated range variable over the distinct
//! subquery rows is placed in front of `t`, and `t` probes an index on `a`
//! with `t.a = generated.0`. The IN predicate itself stays as a residual so
//! results are unchanged. Disabled unless `PlannerConfig::in_as_join` is set.

use std::sync::Arc;

use tracing::debug;

use super::cost::{IndexInfo, TableMeta};
use super::expression::{Expr, Quantifier, RangeId, Subquery};
use super::range_variable::{RangeVariable, RangeVariableConditions};
use super::resolver::Resolution;
use crate::core::Operator;

/// A rewrite chosen during assignment, applied after all positions are planned
#[derive(Debug)]
pub(super) struct InRewrite {
    position: usize,
    expr: Expr,
    columns: Vec<usize>,
    index: Arc<IndexInfo>,
    subquery: Arc<Subquery>,
}

impl Resolution<'_> {
    pub(super) fn in_rewrite_allowed(&self, position: usize) -> bool {
        self.config.in_as_join
            && position < self.shape.first_left
            && !self.shape.has_right()
            && !self.vars[position].is_generated
    }

    /// Removes the first IN predicate on the range variable's own columns
    pub(super) fn take_in_candidate(
        &self,
        position: usize,
        predicates: &mut Vec<Expr>,
    ) -> Option<(Expr, Vec<usize>)> {
        let range = self.vars[position].id;
        let (found, columns) = predicates
            .iter()
            .enumerate()
            .find_map(|(i, e)| in_columns(e, range).map(|c| (i, c)))?;
        Some((predicates.remove(found), columns))
    }

    /// Keeps the candidate for rewriting when the range variable ended up
    /// with a single unindexed branch, otherwise puts it back as a residual.
    pub(super) fn plan_in_rewrite(
        &mut self,
        position: usize,
        candidate: Option<(Expr, Vec<usize>)>,
        branches: &mut [RangeVariableConditions],
    ) {
        let Some((expr, columns)) = candidate else {
            return;
        };
        let index = match &*branches {
            [only] if !only.has_index() => self.in_index(position, &columns),
            _ => None,
        };
        let subquery = match &expr {
            Expr::Quantified { subquery, .. } => Some(Arc::clone(subquery)),
            _ => None,
        };
        match (index, subquery) {
            (Some(index), Some(subquery)) => self.in_rewrites.push(InRewrite {
                position,
                expr,
                columns,
                index,
                subquery,
            }),
            _ => {
                for branch in branches.iter_mut() {
                    branch.add_residual(expr.clone());
                }
            }
        }
    }

    /// Unique indexes first, then any, widest match, cheapest on a tie
    fn in_index(&self, position: usize, columns: &[usize]) -> Option<Arc<IndexInfo>> {
        let table = &self.vars[position].table;
        let mut uses = table.index_for_columns(columns, Operator::Eq, false);
        if uses.is_empty() {
            uses = table.index_for_columns(columns, Operator::Eq, true);
        }
        let widest = uses.first()?.column_count;
        uses.into_iter()
            .take_while(|u| u.column_count == widest)
            .map(|u| {
                let cost = table.search_cost(&u.index, u.column_count, Operator::Eq);
                (u.index, cost)
            })
            .reduce(|best, next| if next.1 < best.1 { next } else { best })
            .map(|(index, _)| index)
    }

    /// Inserts the generated range variables, last position first so earlier
    /// positions stay valid.
    pub(super) fn set_in_conditions_as_tables(&mut self) {
        let rewrites = std::mem::take(&mut self.in_rewrites);
        if rewrites.is_empty() {
            return;
        }
        for rewrite in rewrites.into_iter().rev() {
            let id = self.next_id;
            self.next_id += 1;
            let rows = rewrite.subquery.distinct_rows().len() as u64;
            let table = TableMeta::new(rewrite.subquery.name.clone(), rewrite.subquery.width)
                .with_rows(rows)
                .into_oracle();
            let generated = RangeVariable::generated(id, table, Arc::clone(&rewrite.subquery));

            let target = &mut self.vars[rewrite.position];
            let target_id = target.id;
            let mut probes = Vec::new();
            for key in &rewrite.index.columns {
                match rewrite.columns.iter().position(|c| c == key) {
                    Some(k) => probes.push(Expr::eq(Expr::col(target_id, *key), Expr::col(id, k))),
                    None => break,
                }
            }
            let probed = &rewrite.index.columns[..probes.len()];
            let Some(branch) = target.join_conditions.first_mut() else {
                continue;
            };
            for (k, column) in rewrite.columns.iter().enumerate() {
                if !probed.contains(column) {
                    branch.add_residual(Expr::eq(Expr::col(target_id, *column), Expr::col(id, k)));
                }
            }
            branch.add_residual(rewrite.expr);
            branch.index_cond = probes;
            branch.index = Some(Arc::clone(&rewrite.index));
            debug!(
                range = target_id,
                generated = id,
                index = %rewrite.index.name,
                rows,
                "IN predicate rewritten as join"
            );
            self.vars.insert(rewrite.position, generated);
        }
        self.reindex();
    }
}

/// Columns of `range` compared by a rewritable `= ANY (subquery)`, in
/// subquery column order
fn in_columns(expr: &Expr, range: RangeId) -> Option<Vec<usize>> {
    let Expr::Quantified {
        op: Operator::Eq,
        quantifier: Quantifier::Any,
        left,
        subquery,
    } = expr
    else {
        return None;
    };
    if subquery.correlated {
        return None;
    }
    let own = |e: &Expr| e.as_column().filter(|c| c.range == range).map(|c| c.column);
    let columns: Vec<usize> = match left.as_ref() {
        Expr::Row(items) => items.iter().map(own).collect::<Option<_>>()?,
        single => vec![own(single)?],
    };
    if columns.len() != subquery.width {
        return None;
    }
    for (i, column) in columns.iter().enumerate() {
        if columns[..i].contains(column) {
            return None;
        }
    }
    Some(columns)
}
