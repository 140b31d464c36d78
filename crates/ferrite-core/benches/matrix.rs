//! Assembly and solve micro-benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ferrite_core::{MatrixPattern, Nodes, RealMatrix};
use nalgebra::DVector;

/// A resistor ladder: n nodes chained with 1 kΩ, each with 10 kΩ to
/// ground, driven by a current source at the head.
fn ladder(n: usize) -> (RealMatrix, Vec<ferrite_core::ElementHandle>) {
    let mut nodes = Nodes::new();
    let ids: Vec<_> = (0..n).map(|i| nodes.map(&format!("n{i}"))).collect();
    let mut pattern = MatrixPattern::new(nodes.unknowns());

    let mut handles = Vec::new();
    for w in ids.windows(2) {
        handles.push(pattern.element(w[0], w[0]));
        handles.push(pattern.element(w[1], w[1]));
        handles.push(pattern.element(w[0], w[1]));
        handles.push(pattern.element(w[1], w[0]));
    }
    for &id in &ids {
        handles.push(pattern.element(id, id));
    }
    let rhs = pattern.rhs(ids[0]);

    let mut m = RealMatrix::from_pattern(&pattern);
    let g = 1e-3;
    let mut it = handles.iter();
    for _ in ids.windows(2) {
        m.add(*it.next().unwrap(), g);
        m.add(*it.next().unwrap(), g);
        m.add(*it.next().unwrap(), -g);
        m.add(*it.next().unwrap(), -g);
    }
    for _ in &ids {
        m.add(*it.next().unwrap(), 1e-4);
    }
    m.add_rhs(rhs, 1e-3);
    (m, handles)
}

fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembly");
    for n in [16, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let (mut m, handles) = ladder(n);
            b.iter(|| {
                m.clear();
                for &h in &handles {
                    m.add(h, 1e-3);
                }
            });
        });
    }
    group.finish();
}

fn bench_factor_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("factor_solve");
    for n in [16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let (mut m, _) = ladder(n);
            let mut x = DVector::zeros(0);
            b.iter(|| {
                m.factor().unwrap();
                m.solve_into(&mut x);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_assembly, bench_factor_solve);
criterion_main!(benches);
