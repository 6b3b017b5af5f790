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

//! Access path selection for one range variable
//!
//! Predicates are sorted into equality candidates (`col = x`, `col IS NULL`),
//! range candidates (`<`, `<=`, `>`, `>=`, `IS NOT NULL`) and the rest. The
//! index covering the most equality columns wins, cheapest on a tie, and the
//! next key column may take one lower and one upper range bound. Without an
//! equality index the most used range column with an index of its own is
//! scanned. When nothing can be indexed, an OR among the residuals is split
//! into branches that each seek an index.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use super::cost::IndexInfo;
use super::decompose::{decompose_and, or_operands};
use super::expression::Expr;
use super::range_variable::RangeVariableConditions;
use super::resolver::Resolution;
use crate::core::{Error, Operator, Result};

/// Deepest expression an OR split will copy into its branches
const MAX_COPIED_DEPTH: usize = 128;

/// A predicate with its position in the input list
struct Candidate {
    ordinal: usize,
    column: usize,
    op: Operator,
    expr: Expr,
}

impl Resolution<'_> {
    /// Plans the predicates assigned to the range variable at `position`.
    ///
    /// Returns one branch, or several when an OR was split.
    pub(super) fn set_index_conditions(
        &self,
        position: usize,
        predicates: Vec<Expr>,
        is_join: bool,
        or_depth: usize,
    ) -> Result<Vec<RangeVariableConditions>> {
        let var = &self.vars[position];
        let mut equal: Vec<Candidate> = Vec::new();
        let mut other: Vec<Candidate> = Vec::new();
        let mut leftovers: Vec<(usize, Expr)> = Vec::new();

        for (ordinal, expr) in predicates.into_iter().enumerate() {
            match self.classify_indexable(&expr, position)? {
                Some((column, op))
                    if op == Operator::Eq || (op == Operator::IsNull && !var.is_left_join) =>
                {
                    equal.push(Candidate {
                        ordinal,
                        column,
                        op,
                        expr,
                    })
                }
                Some((column, op)) if op.is_lower_bound() || op.is_upper_bound() => {
                    other.push(Candidate {
                        ordinal,
                        column,
                        op,
                        expr,
                    })
                }
                _ => leftovers.push((ordinal, expr)),
            }
        }

        let mut conditions = RangeVariableConditions::new(is_join);
        let forced = if position == 0 {
            self.sort_index.clone()
        } else {
            None
        };
        if let Some(index) = forced {
            bind_equality_probes(&mut conditions, index, &mut equal, true);
        } else if !equal.is_empty() {
            let columns: SmallVec<[usize; 8]> = equal.iter().map(|c| c.column).collect();
            let mut best: Option<(Arc<IndexInfo>, usize, f64)> = None;
            for candidate in var.table.index_for_columns(&columns, Operator::Eq, true) {
                let cost =
                    var.table
                        .search_cost(&candidate.index, candidate.column_count, Operator::Eq);
                let better = match &best {
                    None => true,
                    Some((_, count, best_cost)) => {
                        candidate.column_count > *count
                            || (candidate.column_count == *count && cost < *best_cost)
                    }
                };
                if better {
                    best = Some((candidate.index, candidate.column_count, cost));
                }
            }
            if let Some((index, count, cost)) = best {
                trace!(range = var.id, index = %index.name, columns = count, cost, "equality index");
                bind_equality_probes(&mut conditions, index, &mut equal, false);
            }
        }

        if conditions.has_index() {
            bind_range_bounds(&mut conditions, &mut other);
        } else if !other.is_empty() {
            let mut usage: SmallVec<[(usize, usize); 8]> = SmallVec::new();
            for candidate in &other {
                match usage.iter_mut().find(|(c, _)| *c == candidate.column) {
                    Some((_, count)) => *count += 1,
                    None => usage.push((candidate.column, 1)),
                }
            }
            usage.sort_by(|a, b| b.1.cmp(&a.1));
            if let Some(index) = usage
                .iter()
                .find_map(|(column, _)| var.table.index_for_column(*column))
            {
                trace!(range = var.id, index = %index.name, "range index");
                conditions.index = Some(index);
                bind_range_bounds(&mut conditions, &mut other);
            }
        }

        leftovers.extend(equal.into_iter().map(|c| (c.ordinal, c.expr)));
        leftovers.extend(other.into_iter().map(|c| (c.ordinal, c.expr)));
        leftovers.sort_by_key(|(ordinal, _)| *ordinal);
        let leftovers: Vec<Expr> = leftovers.into_iter().map(|(_, e)| e).collect();

        if !conditions.has_index() && or_depth > 0 {
            if let Some(branches) = self.set_or_conditions(position, &leftovers, is_join, or_depth)? {
                return Ok(branches);
            }
        }
        conditions.residual = Expr::and_all(leftovers);
        Ok(vec![conditions])
    }

    /// `Some((column, op))` when the predicate can seek an index of the range
    /// variable at `position`, with the operator as seen from the column.
    fn classify_indexable(&self, expr: &Expr, position: usize) -> Result<Option<(usize, Operator)>> {
        if let Expr::Compare {
            op: op @ (Operator::IsNull | Operator::IsNotNull),
            ..
        } = expr
        {
            return Err(Error::internal(format!(
                "comparison {} carries the null check operator {}",
                expr, op
            )));
        }
        let Some(predicate) = expr.simple_predicate_on(self.vars[position].id) else {
            return Ok(None);
        };
        if predicate.op == Operator::Ne {
            return Ok(None);
        }
        if let Some(operand) = predicate.operand {
            if matches!(operand, Expr::Row(_)) {
                return Ok(None);
            }
            // the operand must be computable before this range variable is scanned
            if operand
                .ranges()
                .iter()
                .any(|r| self.position(*r) >= position)
            {
                return Ok(None);
            }
        }
        Ok(Some((predicate.column, predicate.op)))
    }

    /// Splits one residual OR into indexed branches.
    ///
    /// Every disjunct is planned together with the other residuals and all
    /// branches must reach an index, otherwise the split is abandoned.
    /// Branch `k` excludes rows already produced by branches `0..k`.
    /// ORs with more than `max_or_branches` operands are left alone, and so is
    /// any split that would copy a subtree deeper than `MAX_COPIED_DEPTH`.
    fn set_or_conditions(
        &self,
        position: usize,
        leftovers: &[Expr],
        is_join: bool,
        or_depth: usize,
    ) -> Result<Option<Vec<RangeVariableConditions>>> {
        let shallow: SmallVec<[bool; 8]> = leftovers
            .iter()
            .map(|e| e.depth() <= MAX_COPIED_DEPTH)
            .collect();
        for (i, expr) in leftovers.iter().enumerate() {
            if !matches!(expr, Expr::Or(..)) {
                continue;
            }
            let Some(disjuncts) = or_operands(expr, self.config.max_or_branches) else {
                trace!(range = self.vars[position].id, "OR too wide to split");
                continue;
            };
            if disjuncts.len() < 2 || disjuncts.iter().any(|d| d.depth() > MAX_COPIED_DEPTH) {
                continue;
            }
            if shallow.iter().enumerate().any(|(j, ok)| j != i && !ok) {
                continue;
            }
            let rest: Vec<&Expr> = leftovers
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, e)| e)
                .collect();

            let mut branches = Vec::with_capacity(disjuncts.len());
            let mut all_indexed = true;
            for disjunct in disjuncts {
                let mut predicates = decompose_and(disjunct.clone());
                predicates.extend(rest.iter().map(|e| (*e).clone()));
                let planned =
                    self.set_index_conditions(position, predicates, is_join, or_depth - 1)?;
                if planned.iter().any(|b| !b.has_index()) {
                    all_indexed = false;
                    break;
                }
                branches.extend(planned);
            }
            if !all_indexed {
                continue;
            }

            let mut produced: Option<Expr> = None;
            for branch in &mut branches {
                branch.exclude = produced.clone();
                produced = Some(Expr::or_opt(produced.take(), branch.full_condition()));
            }
            trace!(range = self.vars[position].id, branches = branches.len(), "OR split");
            return Ok(Some(branches));
        }
        Ok(None)
    }
}

/// Binds equality candidates to the leading columns of `index`, stopping at
/// the first key column without one.
fn bind_equality_probes(
    conditions: &mut RangeVariableConditions,
    index: Arc<IndexInfo>,
    equal: &mut Vec<Candidate>,
    forced: bool,
) {
    let mut probes = Vec::new();
    for column in &index.columns {
        match equal.iter().position(|c| c.column == *column) {
            Some(found) => probes.push(equal.remove(found).expr),
            None => break,
        }
    }
    if probes.is_empty() && !forced {
        return;
    }
    conditions.index = Some(index);
    conditions.index_cond = probes;
}

/// Takes one lower and one upper bound on the key column after the probes
fn bind_range_bounds(conditions: &mut RangeVariableConditions, other: &mut Vec<Candidate>) {
    let Some(column) = conditions
        .index
        .as_ref()
        .and_then(|i| i.columns.get(conditions.index_cond.len()).copied())
    else {
        return;
    };
    if let Some(found) = other
        .iter()
        .position(|c| c.column == column && c.op.is_lower_bound())
    {
        conditions.range_start = Some(other.remove(found).expr);
    }
    if let Some(found) = other
        .iter()
        .position(|c| c.column == column && c.op.is_upper_bound())
    {
        conditions.index_end_condition = Some(other.remove(found).expr);
    }
}

#[cfg(test)]
mod tests {
    use super::MAX_COPIED_DEPTH;
    use crate::planner::cost::TableMeta;
    use crate::planner::expression::Expr;
    use crate::planner::range_variable::RangeVariable;
    use crate::planner::resolver::RangeVariableResolver;
    use crate::storage::config::PlannerConfig;
    use crate::core::Operator;

    fn orders() -> RangeVariable {
        let table = TableMeta::new("orders", 4)
            .with_rows(50_000)
            .with_index("orders_cust_day", &[1, 2], false)
            .with_index("orders_cust", &[1], false)
            .with_index("orders_pk", &[0], true)
            .with_index("orders_total", &[3], false)
            .into_oracle();
        RangeVariable::new(0, table, "o")
    }

    fn plan_one(filter: Expr, config: &PlannerConfig) -> RangeVariable {
        let mut plan = RangeVariableResolver::new(config)
            .resolve(vec![orders()], Some(filter), None)
            .unwrap();
        plan.remove(0)
    }

    #[test]
    fn test_widest_equality_index_with_range_on_next_column() {
        let filter = Expr::and_all([
            Expr::eq(Expr::col(0, 1), Expr::lit(7)),
            Expr::compare(Operator::Gte, Expr::col(0, 2), Expr::lit(20)),
            Expr::compare(Operator::Gt, Expr::lit(30), Expr::col(0, 2)),
            Expr::compare(Operator::Ne, Expr::col(0, 3), Expr::lit(0)),
        ])
        .unwrap();
        let var = plan_one(filter, &PlannerConfig::default());
        let branch = &var.join_conditions[0];
        assert_eq!(branch.index.as_ref().unwrap().name, "orders_cust_day");
        assert_eq!(branch.index_cond.len(), 1);
        assert!(branch.range_start.is_some());
        assert!(branch.index_end_condition.is_some());
        assert_eq!(
            branch.residual,
            Some(Expr::compare(Operator::Ne, Expr::col(0, 3), Expr::lit(0)))
        );
    }

    #[test]
    fn test_full_key_beats_prefix() {
        let filter = Expr::and(
            Expr::eq(Expr::col(0, 2), Expr::lit(1)),
            Expr::eq(Expr::col(0, 1), Expr::lit(7)),
        );
        let var = plan_one(filter, &PlannerConfig::default());
        let branch = &var.join_conditions[0];
        assert_eq!(branch.index.as_ref().unwrap().name, "orders_cust_day");
        assert_eq!(branch.index_cond.len(), 2);
        assert!(branch.residual.is_none());
    }

    #[test]
    fn test_range_only_uses_most_referenced_column() {
        let filter = Expr::and_all([
            Expr::compare(Operator::Gt, Expr::col(0, 0), Expr::lit(5)),
            Expr::compare(Operator::Gt, Expr::col(0, 3), Expr::lit(100)),
            Expr::compare(Operator::Lt, Expr::col(0, 3), Expr::lit(200)),
        ])
        .unwrap();
        let var = plan_one(filter, &PlannerConfig::default());
        let branch = &var.join_conditions[0];
        assert_eq!(branch.index.as_ref().unwrap().name, "orders_total");
        assert!(branch.index_cond.is_empty());
        assert_eq!(branch.range_column(), Some(3));
        assert_eq!(
            branch.residual,
            Some(Expr::compare(Operator::Gt, Expr::col(0, 0), Expr::lit(5)))
        );
    }

    #[test]
    fn test_or_split_with_exclude_guards() {
        let filter = Expr::or(
            Expr::eq(Expr::col(0, 0), Expr::lit(1)),
            Expr::eq(Expr::col(0, 1), Expr::lit(2)),
        );
        let var = plan_one(filter.clone(), &PlannerConfig::default());
        assert_eq!(var.join_conditions.len(), 2);
        assert!(var.join_conditions.iter().all(|b| b.has_index()));
        assert!(var.join_conditions[0].exclude.is_none());
        assert_eq!(
            var.join_conditions[1].exclude,
            Some(Expr::eq(Expr::col(0, 0), Expr::lit(1)))
        );

        let var = plan_one(filter, &PlannerConfig::default().with_or_split(false));
        assert_eq!(var.join_conditions.len(), 1);
        assert!(!var.has_index());
    }

    #[test]
    fn test_or_split_abandoned_when_a_branch_has_no_index() {
        let filter = Expr::or(
            Expr::eq(Expr::col(0, 0), Expr::lit(1)),
            Expr::compare(Operator::Ne, Expr::col(0, 1), Expr::lit(2)),
        );
        let var = plan_one(filter.clone(), &PlannerConfig::default());
        assert_eq!(var.join_conditions.len(), 1);
        assert_eq!(var.join_conditions[0].residual, Some(filter));
    }

    #[test]
    fn test_or_split_skipped_when_it_would_copy_a_deep_residual() {
        let narrow = Expr::or(
            Expr::eq(Expr::col(0, 0), Expr::lit(1)),
            Expr::eq(Expr::col(0, 1), Expr::lit(2)),
        );
        let mut deep = Expr::eq(Expr::col(0, 3), Expr::lit(0));
        for i in 1..=MAX_COPIED_DEPTH as i64 {
            deep = Expr::or(deep, Expr::eq(Expr::col(0, 3), Expr::lit(i)));
        }
        assert!(deep.depth() > MAX_COPIED_DEPTH);

        let var = plan_one(Expr::and(narrow, deep), &PlannerConfig::default());
        assert_eq!(var.join_conditions.len(), 1);
        assert!(!var.has_index());
    }

    #[test]
    fn test_is_null_probe_only_for_inner_joins() {
        let filter = Expr::is_null(Expr::col(0, 0));
        let var = plan_one(filter, &PlannerConfig::default());
        assert!(var.has_index());
        assert_eq!(var.join_conditions[0].index_cond.len(), 1);
    }
}
