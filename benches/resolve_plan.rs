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

//! Resolver benchmark: plan a star join with an OR filter
//!
//! Run with: cargo bench --bench resolve_plan

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use mvplan::{Expr, PlannerConfig, RangeVariable, RangeVariableResolver, TableMeta};

/// Fact table joined to `dims` dimension tables on their unique keys
fn star_join(dims: usize) -> (Vec<RangeVariable>, Expr) {
    let fact = TableMeta::new("fact", dims + 1)
        .with_rows(1_000_000)
        .with_index("fact_pk", &[0], true)
        .into_oracle();
    let mut vars = vec![RangeVariable::new(0, fact, "f")];
    let mut filter = Expr::eq(Expr::col(0, 0), Expr::lit(1i64));
    for d in 1..=dims {
        let dim = TableMeta::new(format!("dim{}", d), 2)
            .with_rows(100 * d as u64)
            .with_index(format!("dim{}_pk", d), &[0], true)
            .into_oracle();
        vars.push(RangeVariable::new(d, dim, format!("d{}", d)));
        filter = Expr::and(filter, Expr::eq(Expr::col(0, d), Expr::col(d, 0)));
    }
    let branches = Expr::or(
        Expr::eq(Expr::col(1, 1), Expr::lit(3i64)),
        Expr::eq(Expr::col(1, 0), Expr::lit(4i64)),
    );
    (vars, Expr::and(filter, branches))
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_plan");
    for (name, config) in [
        ("default", PlannerConfig::default()),
        ("literal", PlannerConfig::literal()),
    ] {
        for dims in [2usize, 4, 8] {
            let (vars, filter) = star_join(dims);
            group.bench_with_input(BenchmarkId::new(name, dims), &dims, |b, _| {
                let resolver = RangeVariableResolver::new(&config);
                b.iter(|| {
                    let plan = resolver
                        .resolve(vars.clone(), Some(filter.clone()), None)
                        .unwrap();
                    black_box(plan)
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_resolve);
criterion_main!(benches);
