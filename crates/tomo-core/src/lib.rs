// ─────────────────────────────────────────────────────────────────────
// SCPN Tomography — Tomo Core
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Bayesian-regularized tomographic inversion.
//!
//! The entry point is [`inversion::compute_inversions`]: it validates the
//! problem, selects the regularization operator and solver backend, runs
//! the augmented-Tikhonov fixed point over all time steps, and scatters
//! the basis solutions back onto the full grid when a crop mask is set.

pub mod augtikho;
pub mod crop;
pub mod inversion;
pub mod operator;
pub mod system;
pub mod timeloop;
