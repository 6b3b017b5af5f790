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

//! Greedy inner-join reordering
//!
//! Only the inner-join prefix (everything before the first LEFT join) is
//! permuted. The driving range variable is the one whose `column = constant`
//! predicates reach the cheapest equality index. Each following slot takes
//! the first unplaced range variable joined by a column equality to one
//! already placed, falling back to one with any single-column predicate.
//! When neither exists the written order is kept.

use smallvec::SmallVec;
use tracing::debug;

use super::expression::RangeId;
use super::resolver::Resolution;
use crate::common::{FxMap, FxSet};
use crate::core::Operator;

impl Resolution<'_> {
    pub(super) fn reorder(&mut self) {
        let n = self.vars.len();
        let prefix = self.shape.first_left;
        if !self.config.reorder_joins
            || n == 1
            || prefix < 2
            || self.shape.first_lateral < n
            || self.shape.has_right()
            || self.sort_index.is_some()
        {
            return;
        }

        let in_prefix = |id: RangeId| self.position(id) < prefix;
        let mut joins: Vec<(usize, usize)> = Vec::new();
        let mut equal_columns: FxMap<RangeId, SmallVec<[usize; 4]>> = FxMap::default();
        let mut starts: FxSet<RangeId> = FxSet::default();
        for condition in &self.conditions {
            if let Some((l, r)) = condition.column_equal {
                if in_prefix(l.range) && in_prefix(r.range) {
                    joins.push((self.position(l.range), self.position(r.range)));
                }
            }
            if let Some((column, op)) = condition.single_column {
                if !in_prefix(column.range) {
                    continue;
                }
                starts.insert(column.range);
                if op == Operator::Eq {
                    equal_columns
                        .entry(column.range)
                        .or_default()
                        .push(column.column);
                }
            }
        }
        if equal_columns.is_empty() {
            return;
        }

        let mut first = None;
        let mut best_cost = f64::MAX;
        for position in 0..prefix {
            let var = &self.vars[position];
            let Some(columns) = equal_columns.get(&var.id) else {
                continue;
            };
            let cost = var
                .table
                .index_for_columns(columns, Operator::Eq, true)
                .iter()
                .map(|u| var.table.search_cost(&u.index, u.column_count, Operator::Eq))
                .fold(f64::MAX, f64::min);
            if cost < best_cost {
                best_cost = cost;
                first = Some(position);
            }
        }
        let Some(first) = first else {
            return;
        };

        let mut order = Vec::with_capacity(n);
        let mut placed = vec![false; prefix];
        order.push(first);
        placed[first] = true;
        while order.len() < prefix {
            let joined = (0..prefix).find(|&q| {
                !placed[q]
                    && joins
                        .iter()
                        .any(|&(a, b)| (a == q && placed[b]) || (b == q && placed[a]))
            });
            let next = joined
                .or_else(|| (0..prefix).find(|&q| !placed[q] && starts.contains(&self.vars[q].id)));
            let Some(next) = next else {
                debug!("join graph is disconnected, keeping written order");
                return;
            };
            placed[next] = true;
            order.push(next);
        }
        order.extend(prefix..n);
        if order.iter().enumerate().all(|(i, q)| i == *q) {
            return;
        }

        let mut slots: Vec<_> = std::mem::take(&mut self.vars).into_iter().map(Some).collect();
        self.vars = order.iter().filter_map(|&q| slots[q].take()).collect();
        self.reindex();
        debug!(
            order = ?self.vars.iter().map(|v| v.alias.as_str()).collect::<Vec<_>>(),
            cost = best_cost,
            "inner joins reordered"
        );
    }
}
