// ─────────────────────────────────────────────────────────────────────
// SCPN Tomography — Augmented Tikhonov Fixed Point
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Self-tuning Tikhonov regularization: the regularization parameter is
//! treated as a random variable with a Gamma hyperprior and updated in a
//! fixed point alongside the solution, so no L-curve scan is needed.
//!
//! Per iteration: solve `(TTn + mu·R)·sol = Tyn`, update the
//! regularization weight `lamb` and noise precision `tau` from the
//! current residual and regularity, and recompute `mu = lamb/tau` with a
//! damped multiplicative correction.

use ndarray::{Array1, ArrayView1};
use tomo_math::{dense, sparse};
use tomo_types::config::AugTikhoConfig;
use tomo_types::error::{TomoError, TomoResult};

use crate::system::{DenseSystem, InversionSystem, SparseSystem};

/// Starting value of the regularization parameter for a cold time step.
pub const INITIAL_MU: f64 = 1.0;

/// Basis-count surrogate used in the prior shape when `nbs_fixed` is
/// set, keeping the update scale independent of the actual grid crop.
const SURROGATE_NBS: f64 = 1200.0;

/// Relative floor applied to squared solution entries in the
/// solution-change convergence metric.
const SOL2_FLOOR: f64 = 1e-3;

// ── Solver strategies ────────────────────────────────────────────────

/// One linear solve of the regularized normal equations. Implementors
/// may cache factorization analysis across calls; the sparsity pattern
/// of the system is constant within a run.
pub trait SolveStrategy<S: InversionSystem>: Send {
    fn solve(&mut self, sys: &S, mu: f64, rhs: &Array1<f64>) -> TomoResult<Array1<f64>>;
}

/// Dense SPD solve; a failed Cholesky factorization is fatal.
#[derive(Default)]
pub struct DenseDirect;

impl DenseDirect {
    pub fn new() -> Self {
        DenseDirect
    }
}

impl SolveStrategy<DenseSystem> for DenseDirect {
    fn solve(&mut self, sys: &DenseSystem, mu: f64, rhs: &Array1<f64>) -> TomoResult<Array1<f64>> {
        let a = sys.ttn() + &(sys.r() * mu);
        dense::solve_spd(&a, rhs)
    }
}

/// Dense Cholesky with a symmetric-indefinite fallback for systems that
/// lose positive definiteness to rounding.
#[derive(Default)]
pub struct DenseCholesky;

impl DenseCholesky {
    pub fn new() -> Self {
        DenseCholesky
    }
}

impl SolveStrategy<DenseSystem> for DenseCholesky {
    fn solve(&mut self, sys: &DenseSystem, mu: f64, rhs: &Array1<f64>) -> TomoResult<Array1<f64>> {
        let a = sys.ttn() + &(sys.r() * mu);
        dense::solve_spd_or_sym(&a, rhs)
    }
}

/// Sparse LU, with the symbolic analysis computed on the first call and
/// reused for every following solve.
#[derive(Default)]
pub struct SparseDirect {
    solver: sparse::SparseLuSolver,
}

impl SparseDirect {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SolveStrategy<SparseSystem> for SparseDirect {
    fn solve(&mut self, sys: &SparseSystem, mu: f64, rhs: &Array1<f64>) -> TomoResult<Array1<f64>> {
        let a = sparse::add_scaled(sys.ttn(), sys.r(), mu)?;
        self.solver.solve(&a, rhs)
    }
}

/// Sparse Cholesky with symbolic reuse, falling back to sparse LU when
/// the numeric factorization fails.
#[derive(Default)]
pub struct SparseCholesky {
    solver: sparse::SparseLltSolver,
}

impl SparseCholesky {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SolveStrategy<SparseSystem> for SparseCholesky {
    fn solve(&mut self, sys: &SparseSystem, mu: f64, rhs: &Array1<f64>) -> TomoResult<Array1<f64>> {
        let a = sparse::add_scaled(sys.ttn(), sys.r(), mu)?;
        self.solver.solve(&a, rhs)
    }
}

// ── Fixed point ──────────────────────────────────────────────────────

/// Effective Gamma-prior shapes after absorbing the problem dimensions.
#[derive(Debug, Clone, Copy)]
pub struct FixedPointShape {
    pub a0bis: f64,
    pub a1bis: f64,
}

impl FixedPointShape {
    pub fn new(cfg: &AugTikhoConfig, nbs: usize, nchan: usize) -> Self {
        let a0bis = if cfg.nbs_fixed {
            cfg.a0 - 1.0 + SURROGATE_NBS / 2.0
        } else {
            cfg.a0 - 1.0 + nbs as f64 / 2.0
        };
        let a1bis = cfg.a1 - 1.0 + nchan as f64 / 2.0;
        FixedPointShape { a0bis, a1bis }
    }
}

/// Converged state of one time step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub sol: Array1<f64>,
    /// Final regularization parameter.
    pub mu: f64,
    /// Normalized chi-square of the fit.
    pub chi2n: f64,
    /// Regularization energy `solᵀ·R·sol`.
    pub regularity: f64,
    /// Fixed-point iterations spent.
    pub niter: usize,
    /// Noise-precision estimate.
    pub tau: f64,
    /// Regularization-weight estimate.
    pub lamb: f64,
}

fn with_context(err: TomoError, time_step: usize, iteration: usize) -> TomoError {
    match err {
        TomoError::LinAlg(message) => TomoError::SingularSystem {
            time_step,
            iteration,
            message,
        },
        other => other,
    }
}

fn ensure_finite(
    name: &'static str,
    value: f64,
    time_step: usize,
    iteration: usize,
) -> TomoResult<()> {
    if !value.is_finite() {
        return Err(TomoError::NonFiniteHyperparameter {
            time_step,
            iteration,
            name,
            value,
        });
    }
    Ok(())
}

/// Run the fixed point for one time step.
///
/// `yn` is the normalized data row, `tyn` its projection `Tnᵀ·yn`,
/// `sol_warm` the warm-start solution, `mu_init` the starting
/// regularization parameter. Always performs at least two iterations so
/// the convergence metric compares two genuine updates.
#[allow(clippy::too_many_arguments)]
pub fn aug_tikho_step<S, K>(
    sys: &S,
    strategy: &mut K,
    yn: ArrayView1<'_, f64>,
    tyn: &Array1<f64>,
    sol_warm: &Array1<f64>,
    mu_init: f64,
    cfg: &AugTikhoConfig,
    shape: &FixedPointShape,
    time_step: usize,
) -> TomoResult<StepOutput>
where
    S: InversionSystem,
    K: SolveStrategy<S>,
{
    let nchan = sys.nchan() as f64;
    let nbs = sys.nbs() as f64;

    let mut sol = sol_warm.clone();
    let mut mu0 = mu_init;
    let mut niter = 0usize;
    let mut chi2n = 0.0;
    let mut regularity = 0.0;
    let mut tau = 0.0;
    let mut lamb = 0.0;
    let mut conv;

    loop {
        let iteration = niter + 1;
        let sol_new = strategy
            .solve(sys, mu0, tyn)
            .map_err(|err| with_context(err, time_step, iteration))?;
        if sol_new.iter().any(|v| !v.is_finite()) {
            return Err(TomoError::SingularSystem {
                time_step,
                iteration,
                message: "solver returned a non-finite solution".to_string(),
            });
        }

        let fwd = sys.forward(&sol_new);
        let res2: f64 = fwd
            .iter()
            .zip(yn.iter())
            .map(|(f, y)| {
                let d = f - y;
                d * d
            })
            .sum();
        chi2n = res2 / nchan;
        regularity = sys.reg_energy(&sol_new);

        lamb = shape.a0bis / (0.5 * regularity + cfg.b0);
        tau = shape.a1bis / (0.5 * res2 + cfg.b1);
        let mu_next = (lamb / tau) * (2.0 * shape.a1bis / res2).powf(cfg.d);
        ensure_finite("lamb", lamb, time_step, iteration)?;
        ensure_finite("tau", tau, time_step, iteration)?;
        ensure_finite("mu", mu_next, time_step, iteration)?;

        conv = if cfg.conv_reg {
            ((mu_next - mu0) / mu_next).abs()
        } else {
            let sol2max = sol_new.iter().map(|v| v * v).fold(0.0, f64::max);
            let floor = SOL2_FLOOR * sol2max;
            let change: f64 = sol_new
                .iter()
                .zip(sol.iter())
                .map(|(s, s0)| {
                    let d = s - s0;
                    d * d / (s * s).max(floor)
                })
                .sum();
            (change / nbs).sqrt()
        };
        ensure_finite("conv", conv, time_step, iteration)?;

        log::debug!(
            "time step {time_step}, iteration {iteration}: mu = {mu_next:.6e}, \
             chi2n = {chi2n:.6e}, conv = {conv:.3e}"
        );

        sol = sol_new;
        mu0 = mu_next;
        niter = iteration;

        if niter >= 2 && conv <= cfg.conv_crit {
            break;
        }
        if let Some(cap) = cfg.maxiter {
            if niter >= cap {
                return Err(TomoError::ConvergenceFailure {
                    time_step,
                    iterations: niter,
                    conv,
                    conv_crit: cfg.conv_crit,
                });
            }
        }
    }

    Ok(StepOutput {
        sol,
        mu: mu0,
        chi2n,
        regularity,
        niter,
        tau,
        lamb,
    })
}
