// ─────────────────────────────────────────────────────────────────────
// SCPN Tomography — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{TomoError, TomoResult};

/// Regularization operator applied to the basis-function coefficients.
///
/// `D1N2` and `D2N2` currently select the same component sum; the
/// distinction is kept in the name so callers written against either
/// keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    /// Zeroth-order squared norm (single component).
    D0N2,
    /// First-order squared gradient norm (sum of two directional components).
    D1N2,
    /// Second-order squared curvature norm.
    // TODO: distinguish D2N2 once a dedicated second-derivative component
    // is wired through the operator matrices.
    D2N2,
}

impl Operator {
    /// Number of operator-matrix components this operator consumes.
    pub fn n_components(&self) -> usize {
        match self {
            Operator::D0N2 => 1,
            Operator::D1N2 | Operator::D2N2 => 2,
        }
    }
}

impl FromStr for Operator {
    type Err = TomoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "D0N2" => Ok(Operator::D0N2),
            "D1N2" => Ok(Operator::D1N2),
            "D2N2" => Ok(Operator::D2N2),
            other => Err(TomoError::UnknownOperator(other.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::D0N2 => "D0N2",
            Operator::D1N2 => "D1N2",
            Operator::D2N2 => "D2N2",
        };
        write!(f, "{name}")
    }
}

/// Linear-solver backend for the regularized normal equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
    /// Dense SPD solve; a failed factorization is fatal.
    Dense,
    /// Dense Cholesky with a symmetric-indefinite fallback.
    DenseCholesky,
    /// Sparse LU with symbolic-analysis reuse across time steps.
    Sparse,
    /// Sparse Cholesky with symbolic reuse, falling back to sparse LU
    /// when the numeric factorization fails.
    SparseCholesky,
}

impl SolverKind {
    pub fn is_sparse(&self) -> bool {
        matches!(self, SolverKind::Sparse | SolverKind::SparseCholesky)
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolverKind::Dense => "dense",
            SolverKind::DenseCholesky => "dense-cholesky",
            SolverKind::Sparse => "sparse",
            SolverKind::SparseCholesky => "sparse-cholesky",
        };
        write!(f, "{name}")
    }
}

impl FromStr for SolverKind {
    type Err = TomoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dense" => Ok(SolverKind::Dense),
            "dense-cholesky" => Ok(SolverKind::DenseCholesky),
            "sparse" => Ok(SolverKind::Sparse),
            "sparse-cholesky" => Ok(SolverKind::SparseCholesky),
            other => Err(TomoError::ConfigError(format!(
                "unknown solver backend: {other}"
            ))),
        }
    }
}

/// Hyperparameters of the augmented-Tikhonov fixed point.
///
/// `a0`/`b0` shape the Gamma prior on the regularization weight, `a1`/`b1`
/// the Gamma prior on the noise precision; `d` damps the multiplicative
/// update of the regularization parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugTikhoConfig {
    /// Regularization-weight prior shape (default: 10.0)
    #[serde(default = "default_a0")]
    pub a0: f64,
    /// Regularization-weight prior rate (default: 1e-6)
    #[serde(default = "default_b0")]
    pub b0: f64,
    /// Noise-precision prior shape (default: 2.0)
    #[serde(default = "default_a1")]
    pub a1: f64,
    /// Noise-precision prior rate (default: 1e-2)
    #[serde(default = "default_b1")]
    pub b1: f64,
    /// Damping exponent on the regularization update (default: 0.95)
    #[serde(default = "default_d")]
    pub d: f64,
    /// Convergence criterion on the fixed point (default: 1e-4)
    #[serde(default = "default_conv_crit")]
    pub conv_crit: f64,
    /// Use a fixed basis-count surrogate of 1200 in the prior shape
    /// instead of the actual number of basis functions (default: true)
    #[serde(default = "default_nbs_fixed")]
    pub nbs_fixed: bool,
    /// Track convergence on the regularization parameter rather than on
    /// the solution change (default: true)
    #[serde(default = "default_conv_reg")]
    pub conv_reg: bool,
    /// Warm-start each time step from the previous step's solution
    /// (default: false)
    #[serde(default)]
    pub chain: bool,
    /// Iteration cap per time step; `None` lets the fixed point run until
    /// convergence, matching the historical behavior (default: None)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxiter: Option<usize>,
}

fn default_a0() -> f64 {
    10.0
}
fn default_b0() -> f64 {
    1e-6
}
fn default_a1() -> f64 {
    2.0
}
fn default_b1() -> f64 {
    1e-2
}
fn default_d() -> f64 {
    0.95
}
fn default_conv_crit() -> f64 {
    1e-4
}
fn default_nbs_fixed() -> bool {
    true
}
fn default_conv_reg() -> bool {
    true
}

impl Default for AugTikhoConfig {
    fn default() -> Self {
        AugTikhoConfig {
            a0: default_a0(),
            b0: default_b0(),
            a1: default_a1(),
            b1: default_b1(),
            d: default_d(),
            conv_crit: default_conv_crit(),
            nbs_fixed: default_nbs_fixed(),
            conv_reg: default_conv_reg(),
            chain: false,
            maxiter: None,
        }
    }
}

impl AugTikhoConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file(path: &str) -> TomoResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject hyperparameters that would make the fixed point meaningless.
    pub fn validate(&self) -> TomoResult<()> {
        let positive = [
            ("a0", self.a0),
            ("b0", self.b0),
            ("a1", self.a1),
            ("b1", self.b1),
            ("d", self.d),
            ("conv_crit", self.conv_crit),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(TomoError::ConfigError(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if self.maxiter == Some(0) || self.maxiter == Some(1) {
            return Err(TomoError::ConfigError(format!(
                "maxiter must allow at least 2 iterations, got {:?}",
                self.maxiter
            )));
        }
        Ok(())
    }
}
