// ─────────────────────────────────────────────────────────────────────
// SCPN Tomography — Solver Backend Benchmark
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────

use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use tomo_core::inversion::{compute_inversions, GeometryMatrix, InversionProblem};
use tomo_types::config::{AugTikhoConfig, Operator, SolverKind};

fn synthetic_problem(nchan: usize, nbs: usize, nt: usize, solver: SolverKind) -> InversionProblem {
    let mut rng = StdRng::seed_from_u64(1234);
    // Sparse-ish geometry: most chords see a handful of basis functions.
    let matrix = Array2::from_shape_fn((nchan, nbs), |_| {
        if rng.gen_range(0.0..1.0) < 0.3 {
            rng.gen_range(0.1..1.0)
        } else {
            0.0
        }
    });
    let x_true = Array1::from_shape_fn(nbs, |j| {
        1.0 + (j as f64 / nbs as f64 * std::f64::consts::PI).sin()
    });
    let clean = matrix.dot(&x_true);
    let mut data = Array2::zeros((nt, nchan));
    for mut row in data.rows_mut() {
        row.assign(&clean);
    }
    let sigma = Array2::from_elem((1, nchan), 0.05 * clean.mean().unwrap_or(1.0).max(1e-6));
    InversionProblem {
        matrix: GeometryMatrix::Dense(matrix),
        data,
        sigma,
        operator: Operator::D0N2,
        operator_components: vec![Array2::eye(nbs)],
        solver,
        crop: None,
        parallel: false,
    }
}

fn bench_backends(c: &mut Criterion) {
    let mut group = c.benchmark_group("inversion_backends");
    group.sample_size(10);

    let cfg = AugTikhoConfig {
        maxiter: Some(500),
        ..Default::default()
    };
    for solver in [
        SolverKind::Dense,
        SolverKind::DenseCholesky,
        SolverKind::Sparse,
        SolverKind::SparseCholesky,
    ] {
        for (nchan, nbs) in [(50usize, 20usize), (120usize, 80usize)] {
            let problem = synthetic_problem(nchan, nbs, 5, solver);
            group.bench_function(format!("{solver}_{nchan}x{nbs}"), |b| {
                b.iter(|| {
                    let out = compute_inversions(&problem, &cfg)
                        .expect("benchmark inversion should converge");
                    black_box(out.chi2n);
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_backends);
criterion_main!(benches);
