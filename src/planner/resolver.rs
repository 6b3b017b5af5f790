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

//! Range variable resolver
//!
//! Turns the range variables of one statement and its predicates into an
//! ordered, index-backed access plan:
//!
//! ```sql
//! SELECT * FROM t1 JOIN t2 ON t1.x = t2.y LEFT JOIN t3 ON t3.z = t2.y
//! WHERE t1.x = 10
//! ```
//!
//! ## Stages
//!
//! 1. **Classify** the join shape (first LEFT, first/last RIGHT, first LATERAL).
//!    A WHERE equality naming columns of a LEFT-joined range variable and of
//!    another range variable turns that LEFT join into an inner join.
//! 2. **Expand** column-equality chains of the inner-join prefix: `a = b` and
//!    `b = c` derive `a = c`, and `a = 10` derives `b = 10` and `c = 10`.
//! 3. **Reorder** the inner-join prefix by cheapest equality index
//!    (see [`join_order`](super::join_order)).
//! 4. **Assign** each predicate to the first position where every range
//!    variable it names is bound, never below the outer-join boundary, and
//!    pick an index per range variable (see
//!    [`index_conditions`](super::index_conditions)).
//! 5. **Rewrite** qualifying `IN (subquery)` predicates into generated range
//!    variables when enabled (see [`in_conditions`](super::in_conditions)).
//!
//! Per-predicate facts (`column = column`, `column = constant`) live in a
//! side table owned by one resolution, so the caller's predicate trees are
//! never annotated in place.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace};

use super::cost::IndexInfo;
use super::decompose::decompose_and;
use super::expression::{ColumnRef, Expr, RangeId, RangeSet};
use super::in_conditions::InRewrite;
use super::range_variable::{RangeVariable, RangeVariableConditions};
use crate::common::{FxMap, FxSet};
use crate::core::{Error, Operator, Result};
use crate::storage::config::PlannerConfig;

/// Sort requirement that pins the index of the driving range variable
#[derive(Debug, Clone)]
pub struct SortSpec {
    /// Index of the first range variable's table that delivers the order
    pub index: Arc<IndexInfo>,
}

impl SortSpec {
    pub fn new(index: Arc<IndexInfo>) -> Self {
        Self { index }
    }
}

/// Resolves range variables and predicates into an access plan
pub struct RangeVariableResolver<'a> {
    config: &'a PlannerConfig,
}

impl<'a> RangeVariableResolver<'a> {
    pub fn new(config: &'a PlannerConfig) -> Self {
        Self { config }
    }

    /// Plans one statement.
    ///
    /// `range_variables` are in written join order with their join flags and
    /// ON conditions set. The returned vector is the execution order, each
    /// entry carrying its [`RangeVariableConditions`]. Errors are always
    /// [`Error::InternalInvariantViolation`]: the input came from a compiler
    /// that already validated it.
    pub fn resolve(
        &self,
        range_variables: Vec<RangeVariable>,
        where_condition: Option<Expr>,
        sort: Option<&SortSpec>,
    ) -> Result<Vec<RangeVariable>> {
        let mut resolution = Resolution::new(self.config, range_variables, sort)?;
        resolution.collect_conditions(where_condition)?;
        resolution.downgrade_outer_joins();
        resolution.expand_conditions();
        resolution.reorder();
        resolution.assign_to_range_variables()?;
        resolution.set_in_conditions_as_tables();
        resolution.finish()
    }
}

/// Where a predicate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Source {
    /// ON condition of the range variable
    Join(RangeId),
    /// WHERE clause
    Where,
    /// Implied by an equality chain
    Derived,
}

/// Side-table entry for one decomposed predicate
#[derive(Debug, Clone)]
pub(super) struct ConditionInfo {
    pub expr: Expr,
    pub source: Source,
    pub ranges: RangeSet,
    /// `column = column` across two range variables
    pub column_equal: Option<(ColumnRef, ColumnRef)>,
    /// `column op constant` on a single range variable
    pub single_column: Option<(ColumnRef, Operator)>,
}

impl ConditionInfo {
    fn new(expr: Expr, source: Source) -> Self {
        let ranges = expr.ranges();
        let column_equal = match &expr {
            Expr::Compare {
                op: Operator::Eq,
                left,
                right,
            } => match (left.as_column(), right.as_column()) {
                (Some(l), Some(r)) if l.range != r.range => Some((l, r)),
                _ => None,
            },
            _ => None,
        };
        let single_column = match ranges.as_slice() {
            [range] => expr
                .simple_predicate_on(*range)
                .filter(|p| p.operand.map_or(true, Expr::is_constant))
                .map(|p| (ColumnRef::new(*range, p.column), p.op)),
            _ => None,
        };
        Self {
            expr,
            source,
            ranges,
            column_equal,
            single_column,
        }
    }

    /// `column = constant`
    pub fn is_single_column_equal(&self) -> bool {
        matches!(self.single_column, Some((_, Operator::Eq)))
    }
}

/// Outer-join layout of the current order
#[derive(Debug, Clone, Copy)]
pub(super) struct JoinShape {
    pub first_left: usize,
    pub first_right: usize,
    pub last_right: Option<usize>,
    pub first_lateral: usize,
}

impl JoinShape {
    fn of(vars: &[RangeVariable]) -> Self {
        let n = vars.len();
        Self {
            first_left: vars.iter().position(|v| v.is_left_join).unwrap_or(n),
            first_right: vars.iter().position(|v| v.is_right_join).unwrap_or(n),
            last_right: vars.iter().rposition(|v| v.is_right_join),
            first_lateral: vars.iter().position(|v| v.is_lateral).unwrap_or(n),
        }
    }

    /// End of the inner-join prefix
    pub fn boundary(&self) -> usize {
        self.first_left.min(self.first_right).min(self.first_lateral)
    }

    pub fn has_right(&self) -> bool {
        self.last_right.is_some()
    }
}

/// State of one resolver run
pub(super) struct Resolution<'a> {
    pub config: &'a PlannerConfig,
    pub vars: Vec<RangeVariable>,
    pub conditions: Vec<ConditionInfo>,
    pub sort_index: Option<Arc<IndexInfo>>,
    pub shape: JoinShape,
    pub in_rewrites: Vec<InRewrite>,
    pub next_id: RangeId,
    positions: FxMap<RangeId, usize>,
}

impl<'a> Resolution<'a> {
    fn new(
        config: &'a PlannerConfig,
        vars: Vec<RangeVariable>,
        sort: Option<&SortSpec>,
    ) -> Result<Self> {
        if vars.is_empty() {
            return Err(Error::internal("no range variables to resolve"));
        }
        let mut positions = FxMap::default();
        for (position, var) in vars.iter().enumerate() {
            if positions.insert(var.id, position).is_some() {
                return Err(Error::internal(format!(
                    "range variable id {} used twice",
                    var.id
                )));
            }
        }
        let sort_index = match sort {
            Some(sort) => {
                let driving = &vars[0];
                if !driving.table.indexes().iter().any(|i| **i == *sort.index) {
                    return Err(Error::internal(format!(
                        "sort index {} does not belong to {}",
                        sort.index.name,
                        driving.table.name()
                    )));
                }
                Some(Arc::clone(&sort.index))
            }
            None => None,
        };
        let next_id = vars.iter().map(|v| v.id).max().map_or(0, |m| m + 1);
        Ok(Self {
            config,
            shape: JoinShape::of(&vars),
            vars,
            conditions: Vec::new(),
            sort_index,
            in_rewrites: Vec::new(),
            next_id,
            positions,
        })
    }

    /// Current position of a range variable. Ids were validated on entry.
    pub fn position(&self, id: RangeId) -> usize {
        self.positions.get(&id).copied().unwrap_or(usize::MAX)
    }

    pub fn reindex(&mut self) {
        self.positions.clear();
        for (position, var) in self.vars.iter().enumerate() {
            self.positions.insert(var.id, position);
        }
        self.shape = JoinShape::of(&self.vars);
    }

    fn collect_conditions(&mut self, where_condition: Option<Expr>) -> Result<()> {
        let mut conditions = Vec::new();
        for var in &mut self.vars {
            if let Some(on) = var.join_condition.take() {
                conditions.extend(
                    decompose_and(on)
                        .into_iter()
                        .map(|e| ConditionInfo::new(e, Source::Join(var.id))),
                );
            }
        }
        if let Some(where_condition) = where_condition {
            conditions.extend(
                decompose_and(where_condition)
                    .into_iter()
                    .map(|e| ConditionInfo::new(e, Source::Where)),
            );
        }
        for condition in &conditions {
            if let Some(unknown) = condition
                .ranges
                .iter()
                .find(|r| !self.positions.contains_key(r))
            {
                return Err(Error::internal(format!(
                    "predicate {} references unknown range variable {}",
                    condition.expr, unknown
                )));
            }
        }
        self.conditions = conditions;
        Ok(())
    }

    /// A null-extended row can never satisfy a WHERE `l.a = r.b`, so the
    /// LEFT join of either side behaves as an inner join.
    fn downgrade_outer_joins(&mut self) {
        let mut changed = false;
        for condition in &self.conditions {
            if condition.source != Source::Where {
                continue;
            }
            let Some((left, right)) = condition.column_equal else {
                continue;
            };
            for range in [left.range, right.range] {
                let position = self.position(range);
                let var = &mut self.vars[position];
                if var.is_left_join && !var.is_right_join {
                    debug!(range, alias = %var.alias, "left join downgraded to inner join");
                    var.is_left_join = false;
                    changed = true;
                }
            }
        }
        if changed {
            self.shape = JoinShape::of(&self.vars);
        }
    }

    /// Closes column-equality chains of the inner-join prefix and spreads
    /// `column = constant` across each chain.
    fn expand_conditions(&mut self) {
        if self.shape.has_right() {
            return;
        }
        let boundary = self.shape.boundary();
        // ON conditions of outer range variables never imply anything globally
        let eligible = |c: &ConditionInfo| {
            let inner_source = match c.source {
                Source::Join(id) => self.position(id) < boundary,
                Source::Where | Source::Derived => true,
            };
            inner_source && c.ranges.iter().all(|r| self.position(*r) < boundary)
        };

        let mut classes = EquivalenceClasses::default();
        let mut known_pairs: FxSet<(ColumnRef, ColumnRef)> = FxSet::default();
        for condition in &self.conditions {
            if let Some((l, r)) = condition.column_equal {
                known_pairs.insert(ordered(l, r));
                if eligible(condition) {
                    classes.union(l, r);
                }
            }
        }
        if classes.is_empty() {
            return;
        }

        let mut derived = Vec::new();
        for members in classes.groups() {
            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    if a.range != b.range && known_pairs.insert(ordered(*a, *b)) {
                        derived.push(Expr::eq(Expr::Column(*a), Expr::Column(*b)));
                    }
                }
            }
        }

        let mut known_values: Vec<(ColumnRef, Expr)> = Vec::new();
        let mut seeds: Vec<(ColumnRef, Expr)> = Vec::new();
        for condition in &self.conditions {
            if !condition.is_single_column_equal() {
                continue;
            }
            let Some((column, _)) = condition.single_column else {
                continue;
            };
            let Some(operand) = condition
                .expr
                .simple_predicate_on(column.range)
                .and_then(|p| p.operand)
            else {
                continue;
            };
            known_values.push((column, operand.clone()));
            if eligible(condition) {
                seeds.push((column, operand.clone()));
            }
        }
        for (column, value) in seeds {
            for member in classes.members_of(column) {
                if member == column
                    || known_values
                        .iter()
                        .any(|(c, v)| *c == member && *v == value)
                {
                    continue;
                }
                known_values.push((member, value.clone()));
                derived.push(Expr::eq(Expr::Column(member), value.clone()));
            }
        }

        if !derived.is_empty() {
            debug!(count = derived.len(), "derived equality predicates");
        }
        for expr in derived {
            trace!(predicate = %expr, "derived");
            self.conditions
                .push(ConditionInfo::new(expr, Source::Derived));
        }
    }

    /// Distributes predicates over positions and plans each range variable
    fn assign_to_range_variables(&mut self) -> Result<()> {
        let n = self.vars.len();
        let mut join_lists: Vec<Vec<Expr>> = vec![Vec::new(); n];
        let mut where_lists: Vec<Vec<Expr>> = vec![Vec::new(); n];
        let where_floor = self.shape.last_right.unwrap_or(0);

        for condition in std::mem::take(&mut self.conditions) {
            let highest = condition.ranges.iter().map(|r| self.position(*r)).max();
            match condition.source {
                Source::Join(id) => {
                    let own = self.position(id);
                    if self.vars[own].is_outer() {
                        if highest.is_some_and(|h| h > own) {
                            return Err(Error::internal(format!(
                                "ON condition {} of {} references a later range variable",
                                condition.expr, self.vars[own].alias
                            )));
                        }
                        join_lists[own].push(condition.expr);
                    } else {
                        let floor = (0..own)
                            .rev()
                            .find(|q| self.vars[*q].is_outer())
                            .map_or(0, |q| q + 1);
                        join_lists[highest.unwrap_or(0).max(floor)].push(condition.expr);
                    }
                }
                Source::Where | Source::Derived => {
                    where_lists[highest.unwrap_or(0).max(where_floor)].push(condition.expr);
                }
            }
        }

        let or_depth = if self.config.or_split {
            self.config.max_or_depth
        } else {
            0
        };
        for position in 0..n {
            let on = std::mem::take(&mut join_lists[position]);
            let filters = std::mem::take(&mut where_lists[position]);
            let var = &self.vars[position];

            if var.is_outer() {
                let join_conditions = if var.is_right_join {
                    vec![residual_only(on, true)]
                } else {
                    self.set_index_conditions(position, on, true, or_depth)?
                };
                let where_conditions = if filters.is_empty() {
                    Vec::new()
                } else {
                    vec![residual_only(filters, false)]
                };
                let var = &mut self.vars[position];
                var.join_conditions = join_conditions;
                var.where_conditions = where_conditions;
            } else {
                let mut predicates = on;
                predicates.extend(filters);
                let candidate = if self.in_rewrite_allowed(position) {
                    self.take_in_candidate(position, &mut predicates)
                } else {
                    None
                };
                let mut branches = self.set_index_conditions(position, predicates, true, or_depth)?;
                self.plan_in_rewrite(position, candidate, &mut branches);
                let var = &mut self.vars[position];
                var.join_conditions = branches;
                var.where_conditions = Vec::new();
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<RangeVariable>> {
        for var in &self.vars {
            for conditions in var.join_conditions.iter().chain(&var.where_conditions) {
                conditions.validate(var.id)?;
            }
            if var.join_conditions.len() > 1 {
                debug!(range = var.id, branches = var.join_conditions.len(), "OR split");
            }
            for (branch, conditions) in var.join_conditions.iter().enumerate() {
                debug!(range = var.id, table = var.table.name(), branch, plan = %conditions, "access path");
            }
        }
        Ok(self.vars)
    }
}

/// Conditions that filter without an access path
fn residual_only(predicates: Vec<Expr>, is_join: bool) -> RangeVariableConditions {
    let mut conditions = RangeVariableConditions::new(is_join);
    conditions.residual = Expr::and_all(predicates);
    conditions
}

fn ordered(a: ColumnRef, b: ColumnRef) -> (ColumnRef, ColumnRef) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Union-find over columns joined by equality
#[derive(Default)]
struct EquivalenceClasses {
    parent: FxMap<ColumnRef, ColumnRef>,
    order: Vec<ColumnRef>,
}

impl EquivalenceClasses {
    fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    fn find(&mut self, column: ColumnRef) -> ColumnRef {
        if !self.parent.contains_key(&column) {
            self.parent.insert(column, column);
            self.order.push(column);
            return column;
        }
        let mut root = column;
        while let Some(&next) = self.parent.get(&root) {
            if next == root {
                break;
            }
            root = next;
        }
        let mut current = column;
        while current != root {
            let next = self.parent.get(&current).copied().unwrap_or(root);
            self.parent.insert(current, root);
            current = next;
        }
        root
    }

    fn union(&mut self, a: ColumnRef, b: ColumnRef) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(rb, ra);
        }
    }

    /// Classes with at least two members, members in first-seen order
    fn groups(&mut self) -> Vec<SmallVec<[ColumnRef; 4]>> {
        let mut by_root: FxMap<ColumnRef, usize> = FxMap::default();
        let mut groups: Vec<SmallVec<[ColumnRef; 4]>> = Vec::new();
        for column in self.order.clone() {
            let root = self.find(column);
            let slot = *by_root.entry(root).or_insert_with(|| {
                groups.push(SmallVec::new());
                groups.len() - 1
            });
            groups[slot].push(column);
        }
        groups.retain(|g| g.len() > 1);
        groups
    }

    fn members_of(&mut self, column: ColumnRef) -> SmallVec<[ColumnRef; 4]> {
        if !self.parent.contains_key(&column) {
            return SmallVec::new();
        }
        let root = self.find(column);
        let mut members = SmallVec::new();
        for other in self.order.clone() {
            if self.find(other) == root {
                members.push(other);
            }
        }
        members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::cost::{IndexCostOracle, TableMeta};

    fn table(name: &str) -> Arc<dyn IndexCostOracle> {
        TableMeta::new(name, 3)
            .with_rows(1000)
            .with_index(&format!("{}_c0", name), &[0], false)
            .into_oracle()
    }

    fn resolve(vars: Vec<RangeVariable>, filter: Option<Expr>) -> Result<Vec<RangeVariable>> {
        let config = PlannerConfig::default();
        RangeVariableResolver::new(&config).resolve(vars, filter, None)
    }

    #[test]
    fn test_empty_input_is_internal_error() {
        let err = resolve(Vec::new(), None).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let vars = vec![
            RangeVariable::new(0, table("a"), "a"),
            RangeVariable::new(0, table("b"), "b"),
        ];
        assert!(resolve(vars, None).unwrap_err().is_internal());
    }

    #[test]
    fn test_unknown_range_rejected() {
        let vars = vec![RangeVariable::new(0, table("a"), "a")];
        let filter = Expr::eq(Expr::col(5, 0), Expr::lit(1));
        assert!(resolve(vars, Some(filter)).unwrap_err().is_internal());
    }

    #[test]
    fn test_null_check_operator_in_comparison_rejected() {
        let vars = vec![RangeVariable::new(0, table("a"), "a")];
        let filter = Expr::compare(Operator::IsNull, Expr::col(0, 0), Expr::null());
        assert!(resolve(vars, Some(filter)).unwrap_err().is_internal());
    }

    #[test]
    fn test_where_equality_downgrades_left_join() {
        let vars = vec![
            RangeVariable::new(0, table("a"), "a"),
            RangeVariable::new(1, table("b"), "b")
                .left_join(Expr::eq(Expr::col(0, 1), Expr::col(1, 1))),
        ];
        let filter = Expr::eq(Expr::col(0, 2), Expr::col(1, 2));
        let plan = resolve(vars, Some(filter)).unwrap();
        assert!(plan.iter().all(|v| !v.is_left_join));
    }

    #[test]
    fn test_where_constant_keeps_left_join() {
        let vars = vec![
            RangeVariable::new(0, table("a"), "a"),
            RangeVariable::new(1, table("b"), "b")
                .left_join(Expr::eq(Expr::col(0, 1), Expr::col(1, 1))),
        ];
        let filter = Expr::is_null(Expr::col(1, 2));
        let plan = resolve(vars, Some(filter.clone())).unwrap();
        assert!(plan[1].is_left_join);
        assert_eq!(plan[1].where_conditions.len(), 1);
        assert_eq!(plan[1].where_conditions[0].residual, Some(filter));
    }

    #[test]
    fn test_full_join_never_downgraded() {
        let vars = vec![
            RangeVariable::new(0, table("a"), "a"),
            RangeVariable::new(1, table("b"), "b")
                .full_join(Expr::eq(Expr::col(0, 1), Expr::col(1, 1))),
        ];
        let filter = Expr::eq(Expr::col(0, 2), Expr::col(1, 2));
        let plan = resolve(vars, Some(filter)).unwrap();
        assert!(plan[1].is_left_join && plan[1].is_right_join);
        assert!(!plan[1].has_index());
    }

    #[test]
    fn test_transitive_chain_derives_missing_pair() {
        let vars = vec![
            RangeVariable::new(0, table("a"), "a"),
            RangeVariable::new(1, table("b"), "b"),
            RangeVariable::new(2, table("c"), "c"),
        ];
        let filter = Expr::and(
            Expr::eq(Expr::col(0, 0), Expr::col(1, 0)),
            Expr::eq(Expr::col(1, 0), Expr::col(2, 0)),
        );
        let config = PlannerConfig::default().with_reorder_joins(false);
        let plan = RangeVariableResolver::new(&config)
            .resolve(vars, Some(filter), None)
            .unwrap();
        let derived = Expr::eq(Expr::col(0, 0), Expr::col(2, 0));
        let mentions = plan[2]
            .join_conditions
            .iter()
            .flat_map(|c| c.conditions())
            .any(|e| *e == derived);
        assert!(mentions, "a.c0 = c.c0 should be planned on c");
    }

    #[test]
    fn test_equivalence_classes() {
        let mut classes = EquivalenceClasses::default();
        let (a, b, c, d) = (
            ColumnRef::new(0, 0),
            ColumnRef::new(1, 0),
            ColumnRef::new(2, 0),
            ColumnRef::new(3, 1),
        );
        classes.union(a, b);
        classes.union(c, b);
        classes.find(d);
        let groups = classes.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].as_slice(), &[a, b, c]);
        assert_eq!(classes.members_of(d).as_slice(), &[d]);
        assert!(classes.members_of(ColumnRef::new(9, 9)).is_empty());
    }

    #[test]
    fn test_on_condition_of_outer_join_stays_on_join() {
        let on = Expr::and(
            Expr::eq(Expr::col(0, 1), Expr::col(1, 0)),
            Expr::eq(Expr::col(0, 2), Expr::lit(7)),
        );
        let vars = vec![
            RangeVariable::new(0, table("a"), "a"),
            RangeVariable::new(1, table("b"), "b").left_join(on),
        ];
        let plan = resolve(vars, None).unwrap();
        assert!(plan[0].join_conditions[0].full_condition() == Expr::True);
        let b = &plan[1].join_conditions[0];
        assert!(b.has_index());
        assert_eq!(
            b.residual,
            Some(Expr::eq(Expr::col(0, 2), Expr::lit(7)))
        );
    }
}
