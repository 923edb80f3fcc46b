// ─────────────────────────────────────────────────────────────────────
// SCPN Tomography — Dense Factorizations
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Dense symmetric solves on top of faer: LLᵀ for positive-definite
//! systems, Bunch-Kaufman (LBLᵀ) as the indefinite fallback.

use faer::linalg::solvers::{Lblt, Llt, Solve};
use faer::{Mat, Side};
use ndarray::{Array1, Array2};
use tomo_types::error::{TomoError, TomoResult};

/// Copy an ndarray matrix into a faer matrix.
pub fn to_faer(a: &Array2<f64>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Pack a vector as a single-column faer matrix.
pub fn rhs_col(b: &Array1<f64>) -> Mat<f64> {
    Mat::from_fn(b.len(), 1, |i, _| b[i])
}

/// Unpack the single column of a faer matrix into a vector.
pub fn col_to_array(m: &Mat<f64>) -> Array1<f64> {
    Array1::from_shape_fn(m.nrows(), |i| m[(i, 0)])
}

fn check_square(a: &Array2<f64>, b: &Array1<f64>) -> TomoResult<()> {
    if a.nrows() != a.ncols() || a.nrows() != b.len() {
        return Err(TomoError::ShapeMismatch(format!(
            "dense solve expects square system, got matrix {}x{} and rhs of length {}",
            a.nrows(),
            a.ncols(),
            b.len()
        )));
    }
    Ok(())
}

/// Solve a symmetric positive-definite system via LLᵀ.
///
/// A failed factorization (non-positive pivot) is reported as a
/// `LinAlg` error; callers decide whether that is fatal.
pub fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> TomoResult<Array1<f64>> {
    check_square(a, b)?;
    let a_faer = to_faer(a);
    let llt = Llt::new(a_faer.as_ref(), Side::Lower).map_err(|err| {
        TomoError::LinAlg(format!("dense Cholesky factorization failed: {err:?}"))
    })?;
    let sol = llt.solve(rhs_col(b).as_ref());
    Ok(col_to_array(&sol))
}

/// Solve a symmetric system via LLᵀ, falling back to LBLᵀ when the
/// matrix is not positive definite.
///
/// LBLᵀ always produces a factorization; an exactly singular pivot
/// surfaces as non-finite entries in the returned solution, which the
/// caller must check.
pub fn solve_spd_or_sym(a: &Array2<f64>, b: &Array1<f64>) -> TomoResult<Array1<f64>> {
    check_square(a, b)?;
    let a_faer = to_faer(a);
    let rhs = rhs_col(b);
    let sol = match Llt::new(a_faer.as_ref(), Side::Lower) {
        Ok(llt) => llt.solve(rhs.as_ref()),
        Err(_) => Lblt::new(a_faer.as_ref(), Side::Lower).solve(rhs.as_ref()),
    };
    Ok(col_to_array(&sol))
}
