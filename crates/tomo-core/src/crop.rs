// ─────────────────────────────────────────────────────────────────────
// SCPN Tomography — Crop Mask
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Scatter/gather between cropped basis vectors and the full (R, Z)
//! grid.
//!
//! Basis functions outside the vacuum vessel are dropped from the
//! inversion; this module maps the reduced coefficient vector back onto
//! the full grid. The mapping enumerates grid cells in column-major
//! order: flat index `k` corresponds to cell `(k mod nr, k div nr)`.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};
use tomo_types::error::{TomoError, TomoResult};

/// Boolean mask over the `(nr, nz)` grid selecting the retained basis
/// functions.
#[derive(Debug, Clone)]
pub struct CropMask {
    mask: Array2<bool>,
    n_inside: usize,
}

impl CropMask {
    pub fn new(mask: Array2<bool>) -> Self {
        let n_inside = mask.iter().filter(|&&m| m).count();
        CropMask { mask, n_inside }
    }

    /// Number of retained basis functions.
    pub fn n_inside(&self) -> usize {
        self.n_inside
    }

    /// Grid shape `(nr, nz)`.
    pub fn grid_shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    /// Scatter a cropped coefficient vector onto the full grid; cells
    /// outside the mask are zero.
    pub fn scatter(&self, sol: ArrayView1<'_, f64>) -> TomoResult<Array2<f64>> {
        if sol.len() != self.n_inside {
            return Err(TomoError::ShapeMismatch(format!(
                "cropped vector of length {} does not match {} cells inside the mask",
                sol.len(),
                self.n_inside
            )));
        }
        let (nr, nz) = self.mask.dim();
        let mut full = Array2::<f64>::zeros((nr, nz));
        let mut j = 0;
        for k in 0..nr * nz {
            let ir = k % nr;
            let iz = k / nr;
            if self.mask[[ir, iz]] {
                full[[ir, iz]] = sol[j];
                j += 1;
            }
        }
        Ok(full)
    }

    /// Scatter a full time series of cropped solutions, one grid per
    /// time step.
    pub fn scatter_series(&self, sol: ArrayView2<'_, f64>) -> TomoResult<Array3<f64>> {
        let (nr, nz) = self.mask.dim();
        let nt = sol.nrows();
        let mut full = Array3::<f64>::zeros((nt, nr, nz));
        for (ii, row) in sol.rows().into_iter().enumerate() {
            let grid = self.scatter(row)?;
            full.index_axis_mut(ndarray::Axis(0), ii).assign(&grid);
        }
        Ok(full)
    }

    /// Collect the masked cells of a full grid back into a cropped
    /// vector, in the same column-major order as `scatter`.
    pub fn gather(&self, full: ArrayView2<'_, f64>) -> TomoResult<Array1<f64>> {
        if full.dim() != self.mask.dim() {
            return Err(TomoError::ShapeMismatch(format!(
                "grid of shape {:?} does not match mask of shape {:?}",
                full.dim(),
                self.mask.dim()
            )));
        }
        let (nr, nz) = self.mask.dim();
        let mut out = Array1::<f64>::zeros(self.n_inside);
        let mut j = 0;
        for k in 0..nr * nz {
            let ir = k % nr;
            let iz = k / nr;
            if self.mask[[ir, iz]] {
                out[j] = full[[ir, iz]];
                j += 1;
            }
        }
        Ok(out)
    }
}
