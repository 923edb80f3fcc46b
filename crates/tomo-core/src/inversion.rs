// ─────────────────────────────────────────────────────────────────────
// SCPN Tomography — Inversion Orchestrator
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! End-to-end inversion: input validation, operator and backend
//! selection, the time loop, and assembly of the results (including the
//! scatter back onto the full grid when a crop mask is set).

use faer::sparse::SparseColMat;
use ndarray::{Array1, Array2, Array3, Axis};
use serde::Serialize;
use tomo_math::sparse;
use tomo_types::config::{AugTikhoConfig, Operator, SolverKind};
use tomo_types::error::{TomoError, TomoResult};

use crate::augtikho::{
    DenseCholesky, DenseDirect, FixedPointShape, SolveStrategy, SparseCholesky, SparseDirect,
};
use crate::crop::CropMask;
use crate::operator::build_regularization;
use crate::system::{DenseSystem, InversionSystem, SparseSystem};
use crate::timeloop::{run_time_loop, run_time_loop_par, HyperEstimate, RawInversion};

/// Default fractional measurement error when the caller has no error
/// model: a constant 5% of the mean signal on every channel.
pub const DEFAULT_SIGMA_FRACTION: f64 = 0.05;

/// Geometry matrix in either storage form. Backends convert as needed,
/// so a sparse matrix can be inverted densely and vice versa.
pub enum GeometryMatrix {
    Dense(Array2<f64>),
    Sparse(SparseColMat<usize, f64>),
}

impl GeometryMatrix {
    pub fn nrows(&self) -> usize {
        match self {
            GeometryMatrix::Dense(m) => m.nrows(),
            GeometryMatrix::Sparse(m) => m.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            GeometryMatrix::Dense(m) => m.ncols(),
            GeometryMatrix::Sparse(m) => m.ncols(),
        }
    }

    /// Mean over all entries, zeros included.
    pub fn mean(&self) -> f64 {
        let n = (self.nrows() * self.ncols()) as f64;
        match self {
            GeometryMatrix::Dense(m) => m.sum() / n,
            GeometryMatrix::Sparse(m) => m.val().iter().sum::<f64>() / n,
        }
    }

    fn to_dense_matrix(&self) -> Array2<f64> {
        match self {
            GeometryMatrix::Dense(m) => m.clone(),
            GeometryMatrix::Sparse(m) => sparse::to_dense(m.as_ref()),
        }
    }

    fn to_sparse_matrix(&self) -> TomoResult<SparseColMat<usize, f64>> {
        match self {
            GeometryMatrix::Dense(m) => sparse::from_dense(m),
            GeometryMatrix::Sparse(m) => Ok(m.clone()),
        }
    }
}

/// Everything the engine needs for one inversion run.
pub struct InversionProblem {
    /// Geometry matrix, `nchan x nbs`.
    pub matrix: GeometryMatrix,
    /// Measured signals, `nt x nchan`.
    pub data: Array2<f64>,
    /// Measurement errors, `1 x nchan` (constant) or `nt x nchan`
    /// (time-resolved); strictly positive and finite.
    pub sigma: Array2<f64>,
    /// Regularization operator name.
    pub operator: Operator,
    /// Precomputed operator components, each `nbs x nbs`.
    pub operator_components: Vec<Array2<f64>>,
    /// Linear-solver backend.
    pub solver: SolverKind,
    /// Crop mask for scattering solutions back onto the full grid.
    pub crop: Option<CropMask>,
    /// Solve time steps on the rayon pool. Requires `chain` off and a
    /// time-constant sigma.
    pub parallel: bool,
}

/// Provenance attached to every inversion result.
#[derive(Debug, Clone, Serialize)]
pub struct InversionMeta {
    pub operator: Operator,
    pub solver: SolverKind,
    pub chain: bool,
    pub parallel: bool,
    pub conv_crit: f64,
    pub maxiter: Option<usize>,
}

/// Assembled inversion results.
#[derive(Debug)]
pub struct InversionOutput {
    /// Solutions on the cropped basis, `nt x nbs`.
    pub sol: Array2<f64>,
    /// Solutions scattered onto the full grid, present when a crop mask
    /// was given.
    pub sol_full: Option<Array3<f64>>,
    pub mu: Array1<f64>,
    pub chi2n: Array1<f64>,
    pub regularity: Array1<f64>,
    pub niter: Vec<usize>,
    pub hyper: Vec<HyperEstimate>,
    pub meta: InversionMeta,
}

/// Constant per-channel sigma as a fraction of the mean signal.
pub fn default_sigma(data: &Array2<f64>, fraction: f64) -> Array2<f64> {
    let sigma = fraction * data.mean().unwrap_or(1.0);
    Array2::from_elem((1, data.ncols()), sigma)
}

fn validate_problem(problem: &InversionProblem, cfg: &AugTikhoConfig) -> TomoResult<()> {
    let nchan = problem.matrix.nrows();
    let nbs = problem.matrix.ncols();
    let nt = problem.data.nrows();

    if nt == 0 {
        return Err(TomoError::ShapeMismatch(
            "data must contain at least one time step".to_string(),
        ));
    }
    if problem.data.ncols() != nchan {
        return Err(TomoError::ShapeMismatch(format!(
            "data has {} channels but the geometry matrix has {nchan} rows",
            problem.data.ncols()
        )));
    }
    if problem.sigma.ncols() != nchan {
        return Err(TomoError::ShapeMismatch(format!(
            "sigma has {} channels but the geometry matrix has {nchan} rows",
            problem.sigma.ncols()
        )));
    }
    if problem.sigma.nrows() != 1 && problem.sigma.nrows() != nt {
        return Err(TomoError::ShapeMismatch(format!(
            "sigma must have 1 or {nt} rows, got {}",
            problem.sigma.nrows()
        )));
    }
    if problem.sigma.iter().any(|s| !s.is_finite() || *s <= 0.0) {
        return Err(TomoError::ShapeMismatch(
            "sigma entries must be strictly positive and finite".to_string(),
        ));
    }
    for (k, comp) in problem.operator_components.iter().enumerate() {
        if comp.dim() != (nbs, nbs) {
            return Err(TomoError::ShapeMismatch(format!(
                "operator component {k} is {}x{}, expected {nbs}x{nbs}",
                comp.nrows(),
                comp.ncols()
            )));
        }
    }
    if let Some(crop) = &problem.crop {
        if crop.n_inside() != nbs {
            return Err(TomoError::ShapeMismatch(format!(
                "crop mask retains {} cells but the geometry matrix has {nbs} columns",
                crop.n_inside()
            )));
        }
    }
    if problem.parallel && cfg.chain {
        return Err(TomoError::ConfigError(
            "parallel time loop cannot chain solutions across steps".to_string(),
        ));
    }
    if problem.parallel && problem.sigma.nrows() > 1 {
        return Err(TomoError::ConfigError(
            "parallel time loop requires time-constant sigma".to_string(),
        ));
    }
    Ok(())
}

fn run_pipeline<S, K, F>(
    sys: &mut S,
    make_strategy: F,
    parallel: bool,
    data_n: &Array2<f64>,
    step_weights: Option<&Array2<f64>>,
    sol_init: &Array1<f64>,
    cfg: &AugTikhoConfig,
    shape: &FixedPointShape,
) -> TomoResult<RawInversion>
where
    S: InversionSystem + Sync,
    K: SolveStrategy<S>,
    F: Fn() -> K + Sync,
{
    if parallel {
        run_time_loop_par(sys, make_strategy, data_n, sol_init, cfg, shape)
    } else {
        let mut strategy = make_strategy();
        run_time_loop(sys, &mut strategy, data_n, step_weights, sol_init, cfg, shape)
    }
}

/// Run the full inversion over all time steps.
pub fn compute_inversions(
    problem: &InversionProblem,
    cfg: &AugTikhoConfig,
) -> TomoResult<InversionOutput> {
    cfg.validate()?;
    validate_problem(problem, cfg)?;

    let nchan = problem.matrix.nrows();
    let nbs = problem.matrix.ncols();
    let nt = problem.data.nrows();

    let r = build_regularization(problem.operator, &problem.operator_components)?;
    let data_n = &problem.data / &problem.sigma;

    // Initial weights use the time-averaged sigma; time-resolved runs
    // reweight per step.
    let sigma_mean = problem.sigma.mean_axis(Axis(0)).ok_or_else(|| {
        TomoError::ShapeMismatch("sigma must not be empty".to_string())
    })?;
    let weights0 = sigma_mean.mapv(|s| 1.0 / s);
    let step_weights = if problem.sigma.nrows() > 1 {
        Some(problem.sigma.mapv(|s| 1.0 / s))
    } else {
        None
    };

    let data0_mean = problem.data.row(0).mean().unwrap_or(0.0);
    let matrix_mean = problem.matrix.mean();
    let sol_init = Array1::from_elem(nbs, data0_mean / matrix_mean);

    let shape = FixedPointShape::new(cfg, nbs, nchan);
    log::info!(
        "inversion start: nt = {nt}, nchan = {nchan}, nbs = {nbs}, \
         operator = {}, solver = {}",
        problem.operator,
        problem.solver
    );

    let raw = match problem.solver {
        SolverKind::Dense => {
            let mut sys = DenseSystem::new(problem.matrix.to_dense_matrix(), r, weights0.view())?;
            run_pipeline(
                &mut sys,
                DenseDirect::new,
                problem.parallel,
                &data_n,
                step_weights.as_ref(),
                &sol_init,
                cfg,
                &shape,
            )?
        }
        SolverKind::DenseCholesky => {
            let mut sys = DenseSystem::new(problem.matrix.to_dense_matrix(), r, weights0.view())?;
            run_pipeline(
                &mut sys,
                DenseCholesky::new,
                problem.parallel,
                &data_n,
                step_weights.as_ref(),
                &sol_init,
                cfg,
                &shape,
            )?
        }
        SolverKind::Sparse => {
            let mut sys = SparseSystem::new(
                problem.matrix.to_sparse_matrix()?,
                sparse::from_dense(&r)?,
                weights0.view(),
            )?;
            run_pipeline(
                &mut sys,
                SparseDirect::new,
                problem.parallel,
                &data_n,
                step_weights.as_ref(),
                &sol_init,
                cfg,
                &shape,
            )?
        }
        SolverKind::SparseCholesky => {
            let mut sys = SparseSystem::new(
                problem.matrix.to_sparse_matrix()?,
                sparse::from_dense(&r)?,
                weights0.view(),
            )?;
            run_pipeline(
                &mut sys,
                SparseCholesky::new,
                problem.parallel,
                &data_n,
                step_weights.as_ref(),
                &sol_init,
                cfg,
                &shape,
            )?
        }
    };

    let sol_full = match &problem.crop {
        Some(crop) => Some(crop.scatter_series(raw.sol.view())?),
        None => None,
    };

    Ok(InversionOutput {
        sol: raw.sol,
        sol_full,
        mu: raw.mu,
        chi2n: raw.chi2n,
        regularity: raw.regularity,
        niter: raw.niter,
        hyper: raw.hyper,
        meta: InversionMeta {
            operator: problem.operator,
            solver: problem.solver,
            chain: cfg.chain,
            parallel: problem.parallel,
            conv_crit: cfg.conv_crit,
            maxiter: cfg.maxiter,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    /// 50 channels, 20 basis functions, smooth positive phantom, 1%
    /// Gaussian noise.
    fn synthetic_problem(
        seed: u64,
        nt: usize,
        solver: SolverKind,
    ) -> (InversionProblem, Array1<f64>) {
        let nchan = 50;
        let nbs = 20;
        let mut rng = StdRng::seed_from_u64(seed);
        let matrix = Array2::from_shape_fn((nchan, nbs), |_| rng.gen_range(0.0..1.0));
        let x_true = Array1::from_shape_fn(nbs, |j| {
            1.0 + (j as f64 / nbs as f64 * std::f64::consts::PI).sin()
        });
        let clean = matrix.dot(&x_true);
        let noise_std = 0.01 * clean.mean().unwrap_or(1.0);
        let noise = Normal::new(0.0, noise_std).unwrap();
        let mut data = Array2::zeros((nt, nchan));
        for mut row in data.rows_mut() {
            for (k, v) in row.iter_mut().enumerate() {
                *v = clean[k] + noise.sample(&mut rng);
            }
        }
        let sigma = Array2::from_elem((1, nchan), noise_std);
        let problem = InversionProblem {
            matrix: GeometryMatrix::Dense(matrix),
            data,
            sigma,
            operator: Operator::D0N2,
            operator_components: vec![Array2::eye(nbs)],
            solver,
            crop: None,
            parallel: false,
        };
        (problem, x_true)
    }

    fn rel_error(sol: &Array1<f64>, x_true: &Array1<f64>) -> f64 {
        let num: f64 = sol
            .iter()
            .zip(x_true.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        let den: f64 = x_true.iter().map(|v| v * v).sum();
        (num / den).sqrt()
    }

    #[test]
    fn test_recovers_phantom_within_tolerance() {
        let (problem, x_true) = synthetic_problem(42, 3, SolverKind::DenseCholesky);
        let cfg = AugTikhoConfig {
            maxiter: Some(500),
            ..Default::default()
        };
        let out = compute_inversions(&problem, &cfg).unwrap();
        assert_eq!(out.sol.dim(), (3, 20));
        for ii in 0..3 {
            let err = rel_error(&out.sol.row(ii).to_owned(), &x_true);
            assert!(err < 0.2, "step {ii} relative error too large: {err}");
            assert!(out.niter[ii] >= 2);
            assert!(out.mu[ii] > 0.0 && out.mu[ii].is_finite());
            assert!(out.chi2n[ii] < 10.0, "chi2n implausible: {}", out.chi2n[ii]);
            assert!(out.hyper[ii].tau > 0.0 && out.hyper[ii].lamb > 0.0);
        }
    }

    #[test]
    fn test_all_backends_agree_end_to_end() {
        let mut reference: Option<Array2<f64>> = None;
        for solver in [
            SolverKind::Dense,
            SolverKind::DenseCholesky,
            SolverKind::Sparse,
            SolverKind::SparseCholesky,
        ] {
            let (problem, _) = synthetic_problem(7, 2, solver);
            let cfg = AugTikhoConfig {
                maxiter: Some(500),
                ..Default::default()
            };
            let out = compute_inversions(&problem, &cfg).unwrap();
            match &reference {
                None => reference = Some(out.sol),
                Some(reference) => {
                    for (v1, v2) in reference.iter().zip(out.sol.iter()) {
                        assert!(
                            (v1 - v2).abs() < 1e-4,
                            "{solver} deviates from reference: {v1} vs {v2}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let (mut problem, _) = synthetic_problem(11, 4, SolverKind::DenseCholesky);
        let cfg = AugTikhoConfig {
            maxiter: Some(500),
            ..Default::default()
        };
        let sequential = compute_inversions(&problem, &cfg).unwrap();
        problem.parallel = true;
        let parallel = compute_inversions(&problem, &cfg).unwrap();
        // mu warm starts differ across steps, so compare within solver
        // tolerance rather than bitwise.
        for (v1, v2) in sequential.sol.iter().zip(parallel.sol.iter()) {
            assert!(
                (v1 - v2).abs() < 1e-3,
                "parallel deviates from sequential: {v1} vs {v2}"
            );
        }
    }

    #[test]
    fn test_parallel_with_chaining_rejected() {
        let (mut problem, _) = synthetic_problem(3, 2, SolverKind::DenseCholesky);
        problem.parallel = true;
        let cfg = AugTikhoConfig {
            chain: true,
            ..Default::default()
        };
        let err = compute_inversions(&problem, &cfg).unwrap_err();
        assert!(matches!(err, TomoError::ConfigError(_)));
    }

    #[test]
    fn test_time_resolved_sigma_reweights_each_step() {
        let (mut problem, x_true) = synthetic_problem(19, 2, SolverKind::DenseCholesky);
        let nchan = problem.data.ncols();
        let base = problem.sigma[[0, 0]];
        // Double the errors on the second step; both steps must still
        // invert to the same phantom.
        let mut sigma = Array2::from_elem((2, nchan), base);
        sigma.row_mut(1).fill(2.0 * base);
        problem.sigma = sigma;
        let cfg = AugTikhoConfig {
            maxiter: Some(500),
            ..Default::default()
        };
        let out = compute_inversions(&problem, &cfg).unwrap();
        for ii in 0..2 {
            let err = rel_error(&out.sol.row(ii).to_owned(), &x_true);
            assert!(err < 0.2, "step {ii} relative error too large: {err}");
        }
    }

    #[test]
    fn test_crop_scatters_solution_onto_grid() {
        let (mut problem, _) = synthetic_problem(5, 1, SolverKind::DenseCholesky);
        // 5x4 grid with exactly 20 retained cells.
        let mask = Array2::from_elem((5, 4), true);
        problem.crop = Some(crate::crop::CropMask::new(mask));
        let cfg = AugTikhoConfig {
            maxiter: Some(500),
            ..Default::default()
        };
        let out = compute_inversions(&problem, &cfg).unwrap();
        let full = out.sol_full.expect("crop mask set but no full grid returned");
        assert_eq!(full.dim(), (1, 5, 4));
        // Column-major order: cell (k mod 5, k div 5) holds sol[k].
        assert_eq!(full[[0, 0, 0]], out.sol[[0, 0]]);
        assert_eq!(full[[0, 1, 0]], out.sol[[0, 1]]);
        assert_eq!(full[[0, 0, 1]], out.sol[[0, 5]]);
    }

    #[test]
    fn test_shape_mismatches_rejected() {
        let (problem, _) = synthetic_problem(2, 1, SolverKind::DenseCholesky);
        let cfg = AugTikhoConfig::default();

        let mut bad = problem;
        bad.sigma = Array2::from_elem((1, 7), 0.1);
        assert!(matches!(
            compute_inversions(&bad, &cfg),
            Err(TomoError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_nonpositive_sigma_rejected() {
        let (mut problem, _) = synthetic_problem(2, 1, SolverKind::DenseCholesky);
        problem.sigma[[0, 3]] = 0.0;
        let cfg = AugTikhoConfig::default();
        assert!(matches!(
            compute_inversions(&problem, &cfg),
            Err(TomoError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_default_sigma_is_flat_fraction_of_mean() {
        let data = Array2::from_elem((2, 4), 10.0);
        let sigma = default_sigma(&data, DEFAULT_SIGMA_FRACTION);
        assert_eq!(sigma.dim(), (1, 4));
        for v in sigma.iter() {
            assert!((v - 0.5).abs() < 1e-12, "expected 0.5, got {v}");
        }
    }

    #[test]
    fn test_meta_serializes() {
        let (problem, _) = synthetic_problem(1, 1, SolverKind::Sparse);
        let cfg = AugTikhoConfig {
            maxiter: Some(500),
            ..Default::default()
        };
        let out = compute_inversions(&problem, &cfg).unwrap();
        let json = serde_json::to_string(&out.meta).unwrap();
        assert!(json.contains("\"sparse\""), "meta json: {json}");
        assert!(json.contains("D0N2"), "meta json: {json}");
    }
}
