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

//! Condition decomposer
//!
//! Flattens AND / OR trees into lists of operands. Both walks use an explicit
//! stack, so arbitrarily deep trees produced from user SQL cannot exhaust
//! the call stack. Operands are moved out of the input tree, not copied.

use smallvec::SmallVec;

use super::expression::Expr;
use crate::core::Operator;

/// Splits top-level AND nodes into a flat list, left to right.
///
/// `TRUE` operands are dropped and a row equality `(a, b) = (c, d)` is
/// split into `a = c` and `b = d`.
pub fn decompose_and(expr: Expr) -> Vec<Expr> {
    let mut out = Vec::new();
    let mut stack: SmallVec<[Expr; 8]> = SmallVec::new();
    stack.push(expr);

    while let Some(mut e) = stack.pop() {
        match &mut e {
            Expr::True => {}
            Expr::And(left, right) => {
                stack.push(right.take());
                stack.push(left.take());
            }
            Expr::Compare {
                op: Operator::Eq,
                left,
                right,
            } => match (&mut **left, &mut **right) {
                (Expr::Row(lhs), Expr::Row(rhs)) if lhs.len() == rhs.len() => {
                    let pairs = std::mem::take(lhs).into_iter().zip(std::mem::take(rhs));
                    // reversed so components come out in column order
                    for (l, r) in pairs.rev() {
                        stack.push(Expr::eq(l, r));
                    }
                }
                _ => out.push(e),
            },
            _ => out.push(e),
        }
    }
    out
}

/// Splits top-level OR nodes into a flat list, left to right.
/// `FALSE` operands are dropped.
pub fn decompose_or(expr: Expr) -> Vec<Expr> {
    let mut out = Vec::new();
    let mut stack: SmallVec<[Expr; 8]> = SmallVec::new();
    stack.push(expr);

    while let Some(mut e) = stack.pop() {
        match &mut e {
            Expr::False => {}
            Expr::Or(left, right) => {
                stack.push(right.take());
                stack.push(left.take());
            }
            _ => out.push(e),
        }
    }
    out
}

/// Borrowing form of [`decompose_or`] that gives up once more than `limit`
/// operands are found, without walking the rest of the chain.
pub fn or_operands(expr: &Expr, limit: usize) -> Option<Vec<&Expr>> {
    let mut out = Vec::new();
    let mut stack: SmallVec<[&Expr; 8]> = SmallVec::new();
    stack.push(expr);

    while let Some(e) = stack.pop() {
        match e {
            Expr::False => {}
            Expr::Or(left, right) => {
                stack.push(right);
                stack.push(left);
            }
            other => {
                if out.len() == limit {
                    return None;
                }
                out.push(other);
            }
        }
    }
    Some(out)
}
