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

//! Predicate trees consumed by the resolver
//!
//! Column references name a range variable by its stable [`RangeId`], not by
//! its position in the join, so reordering never rewrites the tree.
//!
//! # Expression Types
//!
//! - [`Expr::Compare`] - Binary comparison, also between row constructors
//! - [`Expr::And`], [`Expr::Or`], [`Expr::Not`] - Logical operators
//! - [`Expr::IsNull`] - NULL check (`IS NOT NULL` is `Not(IsNull)`)
//! - [`Expr::Quantified`] - `op ANY|ALL (subquery)`, `IN` is `= ANY`

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::core::{Operator, Value};

/// Stable identity of a range variable within one statement
pub type RangeId = usize;

/// Set of range variables referenced by a predicate, sorted and unique
pub type RangeSet = SmallVec<[RangeId; 4]>;

/// A column of a range variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    /// Range variable owning the column
    pub range: RangeId,
    /// Column ordinal within the range variable's table
    pub column: usize,
}

impl ColumnRef {
    pub fn new(range: RangeId, column: usize) -> Self {
        Self { range, column }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}.c{}", self.range, self.column)
    }
}

/// Quantifier of a subquery comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    Any,
    All,
}

/// Materialized result of a subquery used by a quantified comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    /// Name used in plans and logs
    pub name: String,
    /// Number of columns in each row
    pub width: usize,
    /// Result rows
    pub rows: Vec<Vec<Value>>,
    /// True when the subquery references columns of the outer query
    pub correlated: bool,
}

impl Subquery {
    pub fn new(name: impl Into<String>, width: usize, rows: Vec<Vec<Value>>) -> Self {
        Self {
            name: name.into(),
            width,
            rows,
            correlated: false,
        }
    }

    /// Marks the subquery as correlated
    pub fn correlated(mut self) -> Self {
        self.correlated = true;
        self
    }

    /// Rows with duplicates removed, first occurrence order kept
    pub fn distinct_rows(&self) -> Vec<Vec<Value>> {
        let mut seen = std::collections::HashSet::with_capacity(self.rows.len());
        self.rows
            .iter()
            .filter(|row| seen.insert(row.as_slice()))
            .cloned()
            .collect()
    }
}

/// A predicate of the form `column op operand`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplePredicate<'a> {
    /// Column ordinal on the inspected range variable
    pub column: usize,
    /// Operator with the column on the left
    pub op: Operator,
    /// Other side of the comparison, None for null checks
    pub operand: Option<&'a Expr>,
}

/// Source of column values while evaluating a predicate
pub trait RowLookup {
    /// Value of the column, NULL when the range variable is unbound or
    /// null-extended
    fn column_value(&self, column: &ColumnRef) -> Value;
}

/// Predicate / scalar expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant TRUE
    True,
    /// Constant FALSE
    False,
    /// Literal value
    Literal(Value),
    /// Column reference
    Column(ColumnRef),
    /// Binary comparison; `op` is never a null check
    Compare {
        op: Operator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `expr IS NULL`
    IsNull(Box<Expr>),
    /// Logical negation
    Not(Box<Expr>),
    /// Logical conjunction
    And(Box<Expr>, Box<Expr>),
    /// Logical disjunction
    Or(Box<Expr>, Box<Expr>),
    /// Row constructor `(a, b, ...)`
    Row(Vec<Expr>),
    /// `left op ANY|ALL (subquery)`
    Quantified {
        op: Operator,
        quantifier: Quantifier,
        left: Box<Expr>,
        subquery: Arc<Subquery>,
    },
}

impl Expr {
    // =========================================================================
    // Construction
    // =========================================================================

    pub fn col(range: RangeId, column: usize) -> Self {
        Expr::Column(ColumnRef::new(range, column))
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn null() -> Self {
        Expr::Literal(Value::Null)
    }

    pub fn compare(op: Operator, left: Expr, right: Expr) -> Self {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::compare(Operator::Eq, left, right)
    }

    pub fn is_null(expr: Expr) -> Self {
        Expr::IsNull(Box::new(expr))
    }

    pub fn is_not_null(expr: Expr) -> Self {
        Expr::Not(Box::new(Expr::IsNull(Box::new(expr))))
    }

    pub fn negate(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::Or(Box::new(left), Box::new(right))
    }

    /// `left IN (subquery)`
    pub fn in_subquery(left: Expr, subquery: Arc<Subquery>) -> Self {
        Expr::Quantified {
            op: Operator::Eq,
            quantifier: Quantifier::Any,
            left: Box::new(left),
            subquery,
        }
    }

    /// Left-deep conjunction of all expressions, None when empty
    pub fn and_all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// ANDs `right` onto an optional expression
    pub fn and_opt(left: Option<Expr>, right: Expr) -> Expr {
        match left {
            Some(left) => Expr::and(left, right),
            None => right,
        }
    }

    /// ORs `right` onto an optional expression
    pub fn or_opt(left: Option<Expr>, right: Expr) -> Expr {
        match left {
            Some(left) => Expr::or(left, right),
            None => right,
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// The column, if this node is a bare column reference
    pub fn as_column(&self) -> Option<ColumnRef> {
        match self {
            Expr::Column(c) => Some(*c),
            _ => None,
        }
    }

    /// Range variables referenced anywhere below this node
    pub fn ranges(&self) -> RangeSet {
        let mut out = RangeSet::new();
        self.for_each_column(|c| {
            if let Err(pos) = out.binary_search(&c.range) {
                out.insert(pos, c.range);
            }
        });
        out
    }

    /// True when the expression references no columns and no correlated
    /// subquery, so its value does not depend on the current row
    pub fn is_constant(&self) -> bool {
        let mut constant = true;
        let mut stack: SmallVec<[&Expr; 8]> = SmallVec::new();
        stack.push(self);
        while let Some(e) = stack.pop() {
            match e {
                Expr::Column(_) => constant = false,
                Expr::Quantified { subquery, left, .. } => {
                    if subquery.correlated {
                        constant = false;
                    }
                    stack.push(left);
                }
                other => other.push_children(&mut stack),
            }
        }
        constant
    }

    /// Visits every column reference, iteratively
    pub fn for_each_column(&self, mut f: impl FnMut(&ColumnRef)) {
        let mut stack: SmallVec<[&Expr; 8]> = SmallVec::new();
        stack.push(self);
        while let Some(e) = stack.pop() {
            match e {
                Expr::Column(c) => f(c),
                other => other.push_children(&mut stack),
            }
        }
    }

    /// Height of the tree, a lone leaf counts as 1
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack: SmallVec<[(&Expr, usize); 8]> = SmallVec::new();
        stack.push((self, 1));
        while let Some((e, level)) = stack.pop() {
            deepest = deepest.max(level);
            let mut children: SmallVec<[&Expr; 8]> = SmallVec::new();
            e.push_children(&mut children);
            stack.extend(children.into_iter().map(|c| (c, level + 1)));
        }
        deepest
    }

    /// Operands of a run of the same connective (AND or OR) rooted here
    fn chain_operands(&self) -> SmallVec<[&Expr; 8]> {
        let kind = std::mem::discriminant(self);
        let mut out = SmallVec::new();
        let mut stack: SmallVec<[&Expr; 8]> = SmallVec::new();
        stack.push(self);
        while let Some(e) = stack.pop() {
            match e {
                Expr::And(left, right) | Expr::Or(left, right)
                    if std::mem::discriminant(e) == kind =>
                {
                    stack.push(right);
                    stack.push(left);
                }
                other => out.push(other),
            }
        }
        out
    }

    /// Moves the node out, leaving TRUE behind
    pub(crate) fn take(&mut self) -> Expr {
        std::mem::replace(self, Expr::True)
    }

    fn is_leaf(&self) -> bool {
        matches!(
            self,
            Expr::True | Expr::False | Expr::Literal(_) | Expr::Column(_)
        )
    }

    /// Detaches the non-leaf children of this node onto `stack`
    fn detach_children(&mut self, stack: &mut Vec<Expr>) {
        let mut detach = |child: &mut Expr| {
            if !child.is_leaf() {
                stack.push(child.take());
            }
        };
        match self {
            Expr::True | Expr::False | Expr::Literal(_) | Expr::Column(_) => {}
            Expr::Compare { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                detach(&mut **left);
                detach(&mut **right);
            }
            Expr::IsNull(e) | Expr::Not(e) => detach(&mut **e),
            Expr::Quantified { left, .. } => detach(&mut **left),
            Expr::Row(items) => items.iter_mut().for_each(detach),
        }
    }

    fn push_children<'a>(&'a self, stack: &mut SmallVec<[&'a Expr; 8]>) {
        match self {
            Expr::True | Expr::False | Expr::Literal(_) | Expr::Column(_) => {}
            Expr::Compare { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                stack.push(right);
                stack.push(left);
            }
            Expr::IsNull(e) | Expr::Not(e) => stack.push(e),
            Expr::Row(items) => stack.extend(items.iter().rev()),
            Expr::Quantified { left, .. } => stack.push(left),
        }
    }

    /// Views the node as `column op operand` on a column of `range`.
    ///
    /// Comparisons with the column on the right are mirrored, so `5 < a`
    /// reads as `a > 5`. `IS NULL` and `IS NOT NULL` have no operand.
    pub fn simple_predicate_on(&self, range: RangeId) -> Option<SimplePredicate<'_>> {
        let own = |e: &Expr| e.as_column().filter(|c| c.range == range);
        match self {
            Expr::Compare { op, left, right } => {
                if let Some(c) = own(left) {
                    Some(SimplePredicate {
                        column: c.column,
                        op: *op,
                        operand: Some(right),
                    })
                } else {
                    own(right).map(|c| SimplePredicate {
                        column: c.column,
                        op: op.swap(),
                        operand: Some(left),
                    })
                }
            }
            Expr::IsNull(inner) => own(inner).map(|c| SimplePredicate {
                column: c.column,
                op: Operator::IsNull,
                operand: None,
            }),
            Expr::Not(inner) => match inner.as_ref() {
                Expr::IsNull(col) => own(col).map(|c| SimplePredicate {
                    column: c.column,
                    op: Operator::IsNotNull,
                    operand: None,
                }),
                _ => None,
            },
            _ => None,
        }
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Three-valued truth of the expression; None is UNKNOWN
    pub fn test(&self, row: &dyn RowLookup) -> Option<bool> {
        match self {
            Expr::True => Some(true),
            Expr::False => Some(false),
            Expr::Literal(v) => v.as_boolean(),
            Expr::Column(c) => row.column_value(c).as_boolean(),
            Expr::Compare { op, left, right } => compare_exprs(*op, left, right, row),
            Expr::IsNull(e) => Some(match e.as_ref() {
                Expr::Row(items) => items.iter().all(|i| i.value(row).is_null()),
                other => other.value(row).is_null(),
            }),
            Expr::Not(e) => e.test(row).map(|b| !b),
            Expr::And(..) => fold_any(
                self.chain_operands()
                    .into_iter()
                    .map(|e| e.test(row).map(|b| !b)),
            )
            .map(|b| !b),
            Expr::Or(..) => fold_any(self.chain_operands().into_iter().map(|e| e.test(row))),
            Expr::Row(_) => None,
            Expr::Quantified {
                op,
                quantifier,
                left,
                subquery,
            } => {
                let lhs = row_values(left, row);
                let outcomes = subquery
                    .rows
                    .iter()
                    .map(|r| compare_tuples(*op, &lhs, r));
                match quantifier {
                    Quantifier::Any => fold_any(outcomes),
                    Quantifier::All => fold_any(outcomes.map(|o| o.map(|b| !b))).map(|b| !b),
                }
            }
        }
    }

    /// Scalar value of the expression; predicates yield booleans or NULL
    pub fn value(&self, row: &dyn RowLookup) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Column(c) => row.column_value(c),
            other => match other.test(row) {
                Some(b) => Value::Boolean(b),
                None => Value::Null,
            },
        }
    }
}

fn row_values(expr: &Expr, row: &dyn RowLookup) -> Vec<Value> {
    match expr {
        Expr::Row(items) => items.iter().map(|i| i.value(row)).collect(),
        other => vec![other.value(row)],
    }
}

fn fold_any(outcomes: impl Iterator<Item = Option<bool>>) -> Option<bool> {
    let mut unknown = false;
    for outcome in outcomes {
        match outcome {
            Some(true) => return Some(true),
            None => unknown = true,
            Some(false) => {}
        }
    }
    if unknown {
        None
    } else {
        Some(false)
    }
}

fn compare_values(op: Operator, left: &Value, right: &Value) -> Option<bool> {
    use std::cmp::Ordering::*;
    let ord = left.compare(right)?;
    Some(match op {
        Operator::Eq => ord == Equal,
        Operator::Ne => ord != Equal,
        Operator::Gt => ord == Greater,
        Operator::Gte => ord != Less,
        Operator::Lt => ord == Less,
        Operator::Lte => ord != Greater,
        Operator::IsNull | Operator::IsNotNull => return None,
    })
}

/// Row comparison supports `=` and `!=` only
fn compare_tuples(op: Operator, left: &[Value], right: &[Value]) -> Option<bool> {
    if left.len() != right.len() {
        return None;
    }
    if left.len() == 1 {
        return compare_values(op, &left[0], &right[0]);
    }
    let equal = fold_any(
        left.iter()
            .zip(right)
            .map(|(l, r)| compare_values(Operator::Eq, l, r).map(|b| !b)),
    )
    .map(|b| !b);
    match op {
        Operator::Eq => equal,
        Operator::Ne => equal.map(|b| !b),
        _ => None,
    }
}

fn compare_exprs(op: Operator, left: &Expr, right: &Expr, row: &dyn RowLookup) -> Option<bool> {
    match (left, right) {
        (Expr::Row(_), _) | (_, Expr::Row(_)) => {
            compare_tuples(op, &row_values(left, row), &row_values(right, row))
        }
        _ => compare_values(op, &left.value(row), &right.value(row)),
    }
}

// Long AND/OR chains are built left-deep, so the derived drop glue would
// recurse once per operand.
impl Drop for Expr {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.detach_children(&mut pending);
        while let Some(mut e) = pending.pop() {
            e.detach_children(&mut pending);
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::True => write!(f, "TRUE"),
            Expr::False => write!(f, "FALSE"),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Compare { op, left, right } => write!(f, "{} {} {}", left, op, right),
            Expr::IsNull(e) => write!(f, "{} IS NULL", e),
            Expr::Not(e) => match e.as_ref() {
                Expr::IsNull(inner) => write!(f, "{} IS NOT NULL", inner),
                other => write!(f, "NOT ({})", other),
            },
            Expr::And(l, r) => write!(f, "({} AND {})", l, r),
            Expr::Or(l, r) => write!(f, "({} OR {})", l, r),
            Expr::Row(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Expr::Quantified {
                op,
                quantifier,
                left,
                subquery,
            } => {
                let q = match quantifier {
                    Quantifier::Any => "ANY",
                    Quantifier::All => "ALL",
                };
                write!(f, "{} {} {} ({})", left, op, q, subquery.name)
            }
        }
    }
}
