// ─────────────────────────────────────────────────────────────────────
// SCPN Tomography — Time Loop Driver
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Drives the fixed point over all time steps.
//!
//! The sequential driver carries the regularization parameter from one
//! step to the next, and optionally the solution (`chain`). The
//! parallel driver solves steps independently on the rayon pool; it
//! requires chaining off and time-constant measurement errors, and each
//! step restarts from the cold `mu`.

use ndarray::{Array1, Array2};
use rayon::prelude::*;
use tomo_types::config::AugTikhoConfig;
use tomo_types::error::TomoResult;

use crate::augtikho::{aug_tikho_step, FixedPointShape, SolveStrategy, StepOutput, INITIAL_MU};
use crate::system::InversionSystem;

/// Per-step estimates of the noise precision and regularization weight.
#[derive(Debug, Clone, Copy)]
pub struct HyperEstimate {
    pub tau: f64,
    pub lamb: f64,
}

/// Time-resolved inversion results on the cropped basis.
#[derive(Debug, Clone)]
pub struct RawInversion {
    /// Solutions, one row per time step.
    pub sol: Array2<f64>,
    /// Final regularization parameter per step.
    pub mu: Array1<f64>,
    /// Normalized chi-square per step.
    pub chi2n: Array1<f64>,
    /// Regularization energy per step.
    pub regularity: Array1<f64>,
    /// Fixed-point iterations per step.
    pub niter: Vec<usize>,
    /// Hyperparameter estimates per step.
    pub hyper: Vec<HyperEstimate>,
}

impl RawInversion {
    fn with_capacity(nt: usize, nbs: usize) -> Self {
        RawInversion {
            sol: Array2::zeros((nt, nbs)),
            mu: Array1::zeros(nt),
            chi2n: Array1::zeros(nt),
            regularity: Array1::zeros(nt),
            niter: Vec::with_capacity(nt),
            hyper: Vec::with_capacity(nt),
        }
    }

    fn record(&mut self, ii: usize, out: &StepOutput) {
        self.sol.row_mut(ii).assign(&out.sol);
        self.mu[ii] = out.mu;
        self.chi2n[ii] = out.chi2n;
        self.regularity[ii] = out.regularity;
        self.niter.push(out.niter);
        self.hyper.push(HyperEstimate {
            tau: out.tau,
            lamb: out.lamb,
        });
    }
}

/// Sequential time loop.
///
/// `step_weights` holds one row of `1/sigma` per time step when the
/// measurement errors are time-resolved; `None` keeps the weights the
/// system was built with.
pub fn run_time_loop<S, K>(
    sys: &mut S,
    strategy: &mut K,
    data_n: &Array2<f64>,
    step_weights: Option<&Array2<f64>>,
    sol_init: &Array1<f64>,
    cfg: &AugTikhoConfig,
    shape: &FixedPointShape,
) -> TomoResult<RawInversion>
where
    S: InversionSystem,
    K: SolveStrategy<S>,
{
    let nt = data_n.nrows();
    let mut raw = RawInversion::with_capacity(nt, sys.nbs());
    let mut sol_warm = sol_init.clone();
    let mut mu0 = INITIAL_MU;

    for ii in 0..nt {
        if let Some(weights) = step_weights {
            sys.reweight(weights.row(ii))?;
        }
        let yn = data_n.row(ii);
        let tyn = sys.project(yn);
        let out = aug_tikho_step(sys, strategy, yn, &tyn, &sol_warm, mu0, cfg, shape, ii)?;
        log::info!(
            "time step {}/{nt}: mu = {:.4e}, chi2n = {:.4e}, niter = {}",
            ii + 1,
            out.mu,
            out.chi2n,
            out.niter
        );
        mu0 = out.mu;
        if cfg.chain {
            sol_warm.assign(&out.sol);
        }
        raw.record(ii, &out);
    }
    Ok(raw)
}

/// Parallel time loop over independent steps.
///
/// Every step starts cold (`INITIAL_MU`, global initial guess); callers
/// must have rejected `chain` and time-resolved sigma beforehand.
pub fn run_time_loop_par<S, K, F>(
    sys: &S,
    make_strategy: F,
    data_n: &Array2<f64>,
    sol_init: &Array1<f64>,
    cfg: &AugTikhoConfig,
    shape: &FixedPointShape,
) -> TomoResult<RawInversion>
where
    S: InversionSystem + Sync,
    K: SolveStrategy<S>,
    F: Fn() -> K + Sync,
{
    let nt = data_n.nrows();
    let outputs: Vec<StepOutput> = (0..nt)
        .into_par_iter()
        .map(|ii| {
            let mut strategy = make_strategy();
            let yn = data_n.row(ii);
            let tyn = sys.project(yn);
            aug_tikho_step(sys, &mut strategy, yn, &tyn, sol_init, INITIAL_MU, cfg, shape, ii)
        })
        .collect::<TomoResult<Vec<_>>>()?;

    let mut raw = RawInversion::with_capacity(nt, sys.nbs());
    for (ii, out) in outputs.iter().enumerate() {
        raw.record(ii, out);
    }
    Ok(raw)
}
