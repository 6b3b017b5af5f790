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

//! Range Variable Resolver Tests
//!
//! Plans are checked structurally and by running them with the reference
//! executor against the same query run as written.

use std::sync::Arc;

use mvplan::planner::decompose_and;
use mvplan::{
    execute_plan, execute_unplanned, ColumnRef, Expr, IndexCostOracle, JoinedRow, Operator,
    PlannerConfig, RangeVariable, RangeVariableConditions, RangeVariableResolver, Subquery, TableMeta,
    TableRows, Value,
};

fn int_rows(rows: &[&[i64]]) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|r| r.iter().map(|v| Value::from(*v)).collect())
        .collect()
}

/// Every (a, b) with a and b in 0..5
fn grid() -> Vec<Vec<Value>> {
    let mut rows = Vec::new();
    for a in 0..5i64 {
        for b in 0..5i64 {
            rows.push(vec![Value::from(a), Value::from(b)]);
        }
    }
    rows
}

fn resolve(
    config: &PlannerConfig,
    vars: Vec<RangeVariable>,
    filter: Option<Expr>,
) -> Vec<RangeVariable> {
    RangeVariableResolver::new(config)
        .resolve(vars, filter, None)
        .expect("plan")
}

fn projected(rows: &[JoinedRow], columns: &[ColumnRef]) -> Vec<Vec<Value>> {
    let mut out: Vec<Vec<Value>> = rows.iter().map(|r| r.project(columns)).collect();
    out.sort();
    out
}

/// Runs the plan and the written query and compares the results
fn assert_same_rows(
    written: &[RangeVariable],
    plan: &[RangeVariable],
    filter: Option<&Expr>,
    tables: &TableRows,
    columns: &[ColumnRef],
) -> usize {
    let planned = execute_plan(plan, tables).expect("planned run");
    let expected = execute_unplanned(written, filter, tables).expect("written run");
    assert_eq!(projected(&planned, columns), projected(&expected, columns));
    planned.len()
}

/// Every predicate a branch applies, split into conjuncts
fn predicates(branch: &RangeVariableConditions) -> Vec<Expr> {
    branch
        .conditions()
        .flat_map(|e| decompose_and(e.clone()))
        .collect()
}

fn check_seek_layout(plan: &[RangeVariable]) {
    for var in plan {
        for branch in var.join_conditions.iter().chain(&var.where_conditions) {
            let Some(index) = &branch.index else {
                assert!(branch.index_cond.is_empty());
                continue;
            };
            assert!(branch.index_cond.len() <= index.columns.len());
            for (i, seek) in branch.index_cond.iter().enumerate() {
                let bound = seek.simple_predicate_on(var.id).map(|p| p.column);
                assert_eq!(bound, Some(index.columns[i]), "seek column {} on {}", i, var.alias);
            }
        }
    }
}

#[test]
fn test_unique_index_with_residual() {
    // SELECT * FROM t WHERE a = 5 AND b > 3
    let t = TableMeta::new("t", 2)
        .with_rows(1_000)
        .with_index("t_a", &[0], true)
        .into_oracle();
    let filter = Expr::and(
        Expr::eq(Expr::col(0, 0), Expr::lit(5)),
        Expr::compare(Operator::Gt, Expr::col(0, 1), Expr::lit(3)),
    );
    let plan = resolve(
        &PlannerConfig::default(),
        vec![RangeVariable::new(0, t, "t")],
        Some(filter),
    );

    assert_eq!(plan.len(), 1);
    let branch = &plan[0].join_conditions[0];
    let index = branch.index.as_ref().expect("index chosen");
    assert_eq!(index.name, "t_a");
    assert!(index.unique);
    assert_eq!(
        branch.index_cond,
        vec![Expr::eq(Expr::col(0, 0), Expr::lit(5))]
    );
    assert_eq!(
        branch.residual,
        Some(Expr::compare(Operator::Gt, Expr::col(0, 1), Expr::lit(3)))
    );
}

#[test]
fn test_join_equality_propagates_constant() {
    // SELECT * FROM t1 JOIN t2 ON t1.x = t2.y WHERE t1.x = 10
    let t1 = TableMeta::new("t1", 1)
        .with_rows(500)
        .with_index("t1_x", &[0], false)
        .into_oracle();
    let t2 = TableMeta::new("t2", 2)
        .with_rows(500)
        .with_index("t2_y", &[1], false)
        .into_oracle();
    let written = vec![
        RangeVariable::new(0, t1, "t1"),
        RangeVariable::new(1, t2, "t2").inner_join(Expr::eq(Expr::col(0, 0), Expr::col(1, 1))),
    ];
    let filter = Expr::eq(Expr::col(0, 0), Expr::lit(10));
    let plan = resolve(&PlannerConfig::default(), written.clone(), Some(filter.clone()));

    for var in &plan {
        let branch = &var.join_conditions[0];
        assert!(branch.has_index(), "{} should seek an index", var.alias);
        assert_eq!(branch.index_cond.len(), 1);
    }
    let t2 = plan.iter().find(|v| v.alias == "t2").expect("t2 planned");
    let derived = Expr::eq(Expr::col(1, 1), Expr::lit(10));
    assert!(predicates(&t2.join_conditions[0]).contains(&derived));

    let tables = TableRows::new()
        .with_table(0, int_rows(&[&[10], &[11], &[10]]))
        .with_table(1, int_rows(&[&[1, 10], &[2, 11], &[3, 10], &[4, 12]]));
    let columns = [ColumnRef::new(0, 0), ColumnRef::new(1, 0)];
    let count = assert_same_rows(&written, &plan, Some(&filter), &tables, &columns);
    assert_eq!(count, 4);
}

#[test]
fn test_or_of_composite_keys_splits() {
    // WHERE (a = 1 AND b = 2) OR (a = 3 AND b = 4)
    let t = TableMeta::new("t", 2)
        .with_rows(10_000)
        .with_index("t_ab", &[0, 1], false)
        .into_oracle();
    let first = Expr::and(
        Expr::eq(Expr::col(0, 0), Expr::lit(1)),
        Expr::eq(Expr::col(0, 1), Expr::lit(2)),
    );
    let second = Expr::and(
        Expr::eq(Expr::col(0, 0), Expr::lit(3)),
        Expr::eq(Expr::col(0, 1), Expr::lit(4)),
    );
    let filter = Expr::or(first.clone(), second);
    let written = vec![RangeVariable::new(0, t, "t")];
    let plan = resolve(&PlannerConfig::default(), written.clone(), Some(filter.clone()));

    let branches = &plan[0].join_conditions;
    assert_eq!(branches.len(), 2);
    for branch in branches {
        assert_eq!(branch.index.as_ref().map(|i| i.name.as_str()), Some("t_ab"));
        assert_eq!(branch.index_cond.len(), 2);
    }
    assert!(branches[0].exclude.is_none());
    assert_eq!(branches[1].exclude, Some(branches[0].full_condition()));
    assert_eq!(branches[0].full_condition(), first);
    check_seek_layout(&plan);

    let tables = TableRows::new().with_table(0, grid());
    let columns = [ColumnRef::new(0, 0), ColumnRef::new(0, 1)];
    assert_eq!(assert_same_rows(&written, &plan, Some(&filter), &tables, &columns), 2);
}

#[test]
fn test_overlapping_or_branches_return_each_row_once() {
    let t = TableMeta::new("t", 2)
        .with_rows(10_000)
        .with_index("t_a", &[0], false)
        .with_index("t_b", &[1], false)
        .into_oracle();
    // a = 1 OR b = 1 overlaps on (1, 1)
    let filter = Expr::or(
        Expr::eq(Expr::col(0, 0), Expr::lit(1)),
        Expr::eq(Expr::col(0, 1), Expr::lit(1)),
    );
    let written = vec![RangeVariable::new(0, t, "t")];
    let plan = resolve(&PlannerConfig::default(), written.clone(), Some(filter.clone()));
    assert_eq!(plan[0].join_conditions.len(), 2);

    let tables = TableRows::new().with_table(0, grid());
    let columns = [ColumnRef::new(0, 0), ColumnRef::new(0, 1)];
    let count = assert_same_rows(&written, &plan, Some(&filter), &tables, &columns);
    assert_eq!(count, 9);

    let planned = execute_plan(&plan, &tables).unwrap();
    let mut rows = projected(&planned, &columns);
    rows.dedup();
    assert_eq!(rows.len(), planned.len());
}

/// `a = 0 OR a = 1 OR ... OR a = n - 1`, nested to the left
fn or_of_equalities(n: i64) -> Expr {
    let mut chain = Expr::eq(Expr::col(0, 0), Expr::lit(0));
    for i in 1..n {
        chain = Expr::or(chain, Expr::eq(Expr::col(0, 0), Expr::lit(i)));
    }
    chain
}

fn indexed_on_a() -> Arc<dyn IndexCostOracle> {
    TableMeta::new("t", 2)
        .with_rows(10_000)
        .with_index("t_a", &[0], false)
        .into_oracle()
}

#[test]
fn test_very_wide_or_stays_a_residual() {
    let written = vec![RangeVariable::new(0, indexed_on_a(), "t")];
    let plan = resolve(
        &PlannerConfig::default(),
        written.clone(),
        Some(or_of_equalities(5_000)),
    );

    let branches = &plan[0].join_conditions;
    assert_eq!(branches.len(), 1);
    assert!(!branches[0].has_index());
    assert!(branches[0].exclude.is_none());
    assert_eq!(branches[0].residual.as_ref().map(Expr::depth), Some(5_001));

    let tables = TableRows::new().with_table(
        0,
        int_rows(&[&[3, 0], &[4_999, 1], &[5_000, 2], &[-1, 3]]),
    );
    let columns = [ColumnRef::new(0, 0)];
    let filter = or_of_equalities(5_000);
    let count = assert_same_rows(&written, &plan, Some(&filter), &tables, &columns);
    assert_eq!(count, 2);
}

#[test]
fn test_or_branch_cap_is_inclusive() {
    let config = PlannerConfig::default().with_max_or_branches(4);
    let written = vec![RangeVariable::new(0, indexed_on_a(), "t")];
    let tables = TableRows::new().with_table(0, grid());
    let columns = [ColumnRef::new(0, 0), ColumnRef::new(0, 1)];

    let at_cap = resolve(&config, written.clone(), Some(or_of_equalities(4)));
    assert_eq!(at_cap[0].join_conditions.len(), 4);
    assert!(at_cap[0].join_conditions.iter().all(|b| b.has_index()));
    check_seek_layout(&at_cap);
    let filter = or_of_equalities(4);
    assert_eq!(
        assert_same_rows(&written, &at_cap, Some(&filter), &tables, &columns),
        20
    );

    let over_cap = resolve(&config, written.clone(), Some(or_of_equalities(5)));
    assert_eq!(over_cap[0].join_conditions.len(), 1);
    assert!(!over_cap[0].join_conditions[0].has_index());
    let filter = or_of_equalities(5);
    assert_eq!(
        assert_same_rows(&written, &over_cap, Some(&filter), &tables, &columns),
        25
    );
}

#[test]
fn test_seek_layout_follows_index_columns() {
    let t = TableMeta::new("t", 4)
        .with_rows(10_000)
        .with_index("t_cba", &[2, 1, 0], false)
        .with_index("t_d", &[3], false)
        .into_oracle();
    let filter = Expr::and_all([
        Expr::eq(Expr::col(0, 0), Expr::lit(1)),
        Expr::eq(Expr::lit(2), Expr::col(0, 1)),
        Expr::eq(Expr::col(0, 2), Expr::lit(3)),
        Expr::compare(Operator::Lt, Expr::col(0, 3), Expr::lit(9)),
    ])
    .unwrap();
    let plan = resolve(
        &PlannerConfig::default(),
        vec![RangeVariable::new(0, t, "t")],
        Some(filter),
    );
    let branch = &plan[0].join_conditions[0];
    assert_eq!(branch.index.as_ref().unwrap().name, "t_cba");
    assert_eq!(branch.index_cond.len(), 3);
    check_seek_layout(&plan);
}

#[test]
fn test_no_predicate_lost_or_duplicated() {
    let a = TableMeta::new("a", 2)
        .with_rows(100)
        .with_index("a_c0", &[0], true)
        .into_oracle();
    let b = TableMeta::new("b", 2)
        .with_rows(1_000)
        .with_index("b_c0", &[0], false)
        .into_oracle();
    let c = TableMeta::new("c", 2).with_rows(50).into_oracle();
    let written = vec![
        RangeVariable::new(0, a, "a"),
        RangeVariable::new(1, b, "b").inner_join(Expr::eq(Expr::col(0, 0), Expr::col(1, 0))),
        RangeVariable::new(2, c, "c").left_join(Expr::and(
            Expr::eq(Expr::col(1, 1), Expr::col(2, 0)),
            Expr::compare(Operator::Gt, Expr::col(2, 1), Expr::lit(1)),
        )),
    ];
    let filter = Expr::and_all([
        Expr::compare(Operator::Lte, Expr::col(0, 0), Expr::lit(3)),
        Expr::or(
            Expr::eq(Expr::col(1, 1), Expr::lit(2)),
            Expr::is_null(Expr::col(2, 1)),
        ),
    ])
    .unwrap();
    let plan = resolve(&PlannerConfig::default(), written.clone(), Some(filter.clone()));
    check_seek_layout(&plan);

    let tables = TableRows::new()
        .with_table(0, grid())
        .with_table(1, grid())
        .with_table(2, int_rows(&[&[0, 2], &[1, 0], &[2, 3], &[2, 4], &[4, 1]]));
    let columns = [
        ColumnRef::new(0, 0),
        ColumnRef::new(0, 1),
        ColumnRef::new(1, 0),
        ColumnRef::new(1, 1),
        ColumnRef::new(2, 0),
        ColumnRef::new(2, 1),
    ];
    let count = assert_same_rows(&written, &plan, Some(&filter), &tables, &columns);
    assert!(count > 0);
}

#[test]
fn test_reorder_is_a_permutation_behind_outer_joins() {
    let big = TableMeta::new("big", 2)
        .with_rows(1_000_000)
        .with_index("big_c1", &[1], false)
        .into_oracle();
    let mid = TableMeta::new("mid", 2)
        .with_rows(10_000)
        .with_index("mid_c0", &[0], false)
        .into_oracle();
    let small = TableMeta::new("small", 2)
        .with_rows(10)
        .with_index("small_pk", &[0], true)
        .into_oracle();
    let tail = TableMeta::new("tail", 2).with_rows(10).into_oracle();
    let written = vec![
        RangeVariable::new(0, big, "big"),
        RangeVariable::new(1, mid, "mid"),
        RangeVariable::new(2, small, "small"),
        RangeVariable::new(3, tail, "tail").left_join(Expr::eq(Expr::col(2, 1), Expr::col(3, 0))),
    ];
    let filter = Expr::and_all([
        Expr::eq(Expr::col(0, 1), Expr::col(1, 1)),
        Expr::eq(Expr::col(1, 0), Expr::col(2, 1)),
        Expr::eq(Expr::col(2, 0), Expr::lit(2)),
    ])
    .unwrap();
    let plan = resolve(&PlannerConfig::default(), written.clone(), Some(filter.clone()));

    let mut ids: Vec<usize> = plan.iter().map(|v| v.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    for var in &plan {
        let original = written.iter().find(|w| w.id == var.id).unwrap();
        assert_eq!(var.is_left_join, original.is_left_join);
        assert_eq!(var.is_right_join, original.is_right_join);
        assert_eq!(var.table.name(), original.table.name());
    }
    assert_eq!(plan[0].alias, "small");
    assert_eq!(plan[3].alias, "tail");
    check_seek_layout(&plan);

    let tables = TableRows::new()
        .with_table(0, grid())
        .with_table(1, grid())
        .with_table(2, grid())
        .with_table(3, int_rows(&[&[0, 7], &[3, 8]]));
    let columns = [
        ColumnRef::new(0, 0),
        ColumnRef::new(1, 0),
        ColumnRef::new(2, 0),
        ColumnRef::new(2, 1),
        ColumnRef::new(3, 1),
    ];
    assert_same_rows(&written, &plan, Some(&filter), &tables, &columns);
}

#[test]
fn test_in_subquery_rewrite_keeps_results() {
    let t = TableMeta::new("t", 2)
        .with_rows(10_000)
        .with_index("t_b", &[1], false)
        .into_oracle();
    let subquery = Arc::new(Subquery::new(
        "picked",
        1,
        int_rows(&[&[1], &[3], &[3], &[9]]),
    ));
    let filter = Expr::in_subquery(Expr::col(0, 1), subquery);
    let written = vec![RangeVariable::new(0, t, "t")];
    let config = PlannerConfig::default().with_in_as_join(true);
    let plan = resolve(&config, written.clone(), Some(filter.clone()));

    assert_eq!(plan.len(), 2);
    assert!(plan[0].is_generated);
    assert_eq!(plan[0].table.row_count(), 3);
    assert_eq!(
        plan[1].join_conditions[0].index.as_ref().map(|i| i.name.as_str()),
        Some("t_b")
    );

    let tables = TableRows::new().with_table(0, grid());
    let columns = [ColumnRef::new(0, 0), ColumnRef::new(0, 1)];
    let count = assert_same_rows(&written, &plan, Some(&filter), &tables, &columns);
    assert_eq!(count, 10);

    let plain = resolve(&PlannerConfig::default(), written.clone(), Some(filter.clone()));
    assert_eq!(plain.len(), 1);
    assert_same_rows(&written, &plain, Some(&filter), &tables, &columns);
}

#[test]
fn test_literal_config_keeps_written_plan_shape() {
    let a = TableMeta::new("a", 2)
        .with_rows(1_000_000)
        .with_index("a_c0", &[0], false)
        .into_oracle();
    let b = TableMeta::new("b", 2)
        .with_rows(10)
        .with_index("b_c0", &[0], true)
        .into_oracle();
    let written = vec![RangeVariable::new(0, a, "a"), RangeVariable::new(1, b, "b")];
    let filter = Expr::and(
        Expr::eq(Expr::col(0, 0), Expr::col(1, 1)),
        Expr::or(
            Expr::eq(Expr::col(1, 0), Expr::lit(1)),
            Expr::eq(Expr::col(1, 0), Expr::lit(2)),
        ),
    );
    let plan = resolve(&PlannerConfig::literal(), written.clone(), Some(filter.clone()));
    assert_eq!(plan[0].alias, "a");
    assert_eq!(plan[1].join_conditions.len(), 1);

    let tables = TableRows::new().with_table(0, grid()).with_table(1, grid());
    let columns = [ColumnRef::new(0, 0), ColumnRef::new(1, 0)];
    assert_same_rows(&written, &plan, Some(&filter), &tables, &columns);
}
