// ─────────────────────────────────────────────────────────────────────
// SCPN Tomography — Inversion Systems
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Weighted linear systems for the inversion: the geometry matrix `M`
//! scaled by the inverse measurement errors, its Gram matrix, and the
//! regularization quadratic form.
//!
//! `Tn = diag(1/sigma)·M`, `TTn = Tnᵀ·Tn`; both are rebuilt whenever the
//! measurement errors change between time steps.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use tomo_math::sparse::{self, WeightedGram};
use tomo_types::error::{TomoError, TomoResult};

use faer::sparse::{SparseColMat, SparseColMatRef};

/// Operations the fixed point needs from a weighted system, independent
/// of the dense or sparse representation.
pub trait InversionSystem {
    fn nchan(&self) -> usize;
    fn nbs(&self) -> usize;
    /// Rebuild `Tn` and `TTn` with new row weights (`1/sigma`).
    fn reweight(&mut self, weights: ArrayView1<'_, f64>) -> TomoResult<()>;
    /// `Tyn = Tnᵀ·yn` for a normalized data row.
    fn project(&self, yn: ArrayView1<'_, f64>) -> Array1<f64>;
    /// `Tn·sol`, the predicted normalized signals.
    fn forward(&self, sol: &Array1<f64>) -> Array1<f64>;
    /// `solᵀ·R·sol`, the regularization energy.
    fn reg_energy(&self, sol: &Array1<f64>) -> f64;
}

fn check_shapes(nchan: usize, nbs: usize, r_dim: (usize, usize), weights: usize) -> TomoResult<()> {
    if r_dim != (nbs, nbs) {
        return Err(TomoError::ShapeMismatch(format!(
            "regularization matrix is {}x{}, expected {nbs}x{nbs}",
            r_dim.0, r_dim.1
        )));
    }
    if weights != nchan {
        return Err(TomoError::ShapeMismatch(format!(
            "weight vector of length {weights} does not match {nchan} channels"
        )));
    }
    Ok(())
}

// ── Dense representation ─────────────────────────────────────────────

#[derive(Debug)]
pub struct DenseSystem {
    matrix: Array2<f64>,
    tn: Array2<f64>,
    ttn: Array2<f64>,
    r: Array2<f64>,
}

impl DenseSystem {
    pub fn new(
        matrix: Array2<f64>,
        r: Array2<f64>,
        weights: ArrayView1<'_, f64>,
    ) -> TomoResult<Self> {
        check_shapes(matrix.nrows(), matrix.ncols(), r.dim(), weights.len())?;
        let mut sys = DenseSystem {
            tn: Array2::zeros(matrix.dim()),
            ttn: Array2::zeros((matrix.ncols(), matrix.ncols())),
            matrix,
            r,
        };
        sys.reweight(weights)?;
        Ok(sys)
    }

    pub fn ttn(&self) -> &Array2<f64> {
        &self.ttn
    }

    pub fn r(&self) -> &Array2<f64> {
        &self.r
    }
}

impl InversionSystem for DenseSystem {
    fn nchan(&self) -> usize {
        self.matrix.nrows()
    }

    fn nbs(&self) -> usize {
        self.matrix.ncols()
    }

    fn reweight(&mut self, weights: ArrayView1<'_, f64>) -> TomoResult<()> {
        if weights.len() != self.nchan() {
            return Err(TomoError::ShapeMismatch(format!(
                "weight vector of length {} does not match {} channels",
                weights.len(),
                self.nchan()
            )));
        }
        self.tn = &self.matrix * &weights.insert_axis(Axis(1));
        self.ttn = self.tn.t().dot(&self.tn);
        Ok(())
    }

    fn project(&self, yn: ArrayView1<'_, f64>) -> Array1<f64> {
        self.tn.t().dot(&yn)
    }

    fn forward(&self, sol: &Array1<f64>) -> Array1<f64> {
        self.tn.dot(sol)
    }

    fn reg_energy(&self, sol: &Array1<f64>) -> f64 {
        sol.dot(&self.r.dot(sol))
    }
}

// ── Sparse representation ────────────────────────────────────────────

pub struct SparseSystem {
    gram: WeightedGram,
    r: SparseColMat<usize, f64>,
}

impl SparseSystem {
    pub fn new(
        matrix: SparseColMat<usize, f64>,
        r: SparseColMat<usize, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> TomoResult<Self> {
        check_shapes(
            matrix.nrows(),
            matrix.ncols(),
            (r.nrows(), r.ncols()),
            weights.len(),
        )?;
        let mut gram = WeightedGram::new(matrix)?;
        gram.reweight(weights)?;
        Ok(SparseSystem { gram, r })
    }

    pub fn ttn(&self) -> SparseColMatRef<'_, usize, f64> {
        self.gram.ttn()
    }

    pub fn r(&self) -> SparseColMatRef<'_, usize, f64> {
        self.r.as_ref()
    }
}

impl InversionSystem for SparseSystem {
    fn nchan(&self) -> usize {
        self.gram.nrows()
    }

    fn nbs(&self) -> usize {
        self.gram.ncols()
    }

    fn reweight(&mut self, weights: ArrayView1<'_, f64>) -> TomoResult<()> {
        self.gram.reweight(weights)
    }

    fn project(&self, yn: ArrayView1<'_, f64>) -> Array1<f64> {
        sparse::tr_matvec(self.gram.tn(), yn)
    }

    fn forward(&self, sol: &Array1<f64>) -> Array1<f64> {
        sparse::matvec(self.gram.tn(), sol.view())
    }

    fn reg_energy(&self, sol: &Array1<f64>) -> f64 {
        sparse::quad_form(self.r.as_ref(), sol.view())
    }
}
