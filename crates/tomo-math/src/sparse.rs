// ─────────────────────────────────────────────────────────────────────
// SCPN Tomography — Sparse Factorizations
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Sparse (CSC) kernels on top of faer: weighted Gram products with a
//! cached symbolic structure, and LU / LLᵀ solvers that reuse their
//! symbolic analysis across repeated solves on the same sparsity
//! pattern.

use faer::dyn_stack::{MemBuffer, MemStack};
use faer::linalg::solvers::Solve;
use faer::sparse::linalg::matmul::{
    sparse_sparse_matmul_numeric, sparse_sparse_matmul_numeric_scratch,
    sparse_sparse_matmul_symbolic, SparseMatMulInfo,
};
use faer::sparse::linalg::solvers::{Llt, Lu, SymbolicLlt, SymbolicLu};
use faer::sparse::{SparseColMat, SparseColMatMut, SparseColMatRef, SymbolicSparseColMat, Triplet};
use faer::{get_global_parallelism, Accum, Par, Side};
use ndarray::{Array1, Array2, ArrayView1};
use tomo_types::error::{TomoError, TomoResult};

use crate::dense::{col_to_array, rhs_col};

// ── CSC construction and conversion ──────────────────────────────────

/// Build a CSC matrix from the nonzero entries of a dense matrix.
pub fn from_dense(a: &Array2<f64>) -> TomoResult<SparseColMat<usize, f64>> {
    let mut triplets = Vec::new();
    for ((i, j), &v) in a.indexed_iter() {
        if v != 0.0 {
            triplets.push(Triplet::new(i, j, v));
        }
    }
    SparseColMat::<usize, f64>::try_new_from_triplets(a.nrows(), a.ncols(), &triplets)
        .map_err(|err| TomoError::LinAlg(format!("CSC construction failed: {err:?}")))
}

/// Expand a CSC matrix to dense.
pub fn to_dense(a: SparseColMatRef<'_, usize, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((a.nrows(), a.ncols()));
    let sym = a.symbolic();
    let col_ptr = sym.col_ptr();
    let row_idx = sym.row_idx();
    let val = a.val();
    for col in 0..a.ncols() {
        for idx in col_ptr[col]..col_ptr[col + 1] {
            out[[row_idx[idx], col]] = val[idx];
        }
    }
    out
}

// ── CSC products ─────────────────────────────────────────────────────

/// y = A·x for a CSC matrix.
pub fn matvec(a: SparseColMatRef<'_, usize, f64>, x: ArrayView1<'_, f64>) -> Array1<f64> {
    let mut y = Array1::<f64>::zeros(a.nrows());
    let sym = a.symbolic();
    let col_ptr = sym.col_ptr();
    let row_idx = sym.row_idx();
    let val = a.val();
    for col in 0..a.ncols() {
        let xc = x[col];
        if xc == 0.0 {
            continue;
        }
        for idx in col_ptr[col]..col_ptr[col + 1] {
            y[row_idx[idx]] += val[idx] * xc;
        }
    }
    y
}

/// y = Aᵀ·x for a CSC matrix (column-wise dot products, no transpose
/// materialization).
pub fn tr_matvec(a: SparseColMatRef<'_, usize, f64>, x: ArrayView1<'_, f64>) -> Array1<f64> {
    let mut y = Array1::<f64>::zeros(a.ncols());
    let sym = a.symbolic();
    let col_ptr = sym.col_ptr();
    let row_idx = sym.row_idx();
    let val = a.val();
    for col in 0..a.ncols() {
        let mut acc = 0.0;
        for idx in col_ptr[col]..col_ptr[col + 1] {
            acc += val[idx] * x[row_idx[idx]];
        }
        y[col] = acc;
    }
    y
}

/// xᵀ·A·x for a square CSC matrix.
pub fn quad_form(a: SparseColMatRef<'_, usize, f64>, x: ArrayView1<'_, f64>) -> f64 {
    let sym = a.symbolic();
    let col_ptr = sym.col_ptr();
    let row_idx = sym.row_idx();
    let val = a.val();
    let mut acc = 0.0;
    for col in 0..a.ncols() {
        let xc = x[col];
        if xc == 0.0 {
            continue;
        }
        for idx in col_ptr[col]..col_ptr[col + 1] {
            acc += x[row_idx[idx]] * val[idx] * xc;
        }
    }
    acc
}

/// A + beta·B, preserving sparsity. The scaled values of B are staged in
/// a scratch vector so B's symbolic structure is borrowed, not cloned.
pub fn add_scaled(
    a: SparseColMatRef<'_, usize, f64>,
    b: SparseColMatRef<'_, usize, f64>,
    beta: f64,
) -> TomoResult<SparseColMat<usize, f64>> {
    let scaled: Vec<f64> = b.val().iter().map(|v| beta * v).collect();
    let b_scaled = SparseColMatRef::new(b.symbolic(), &scaled);
    faer::sparse::ops::add(a, b_scaled)
        .map_err(|err| TomoError::LinAlg(format!("sparse matrix addition failed: {err:?}")))
}

fn matmul_par(ncols: usize) -> Par {
    if ncols < 128 {
        Par::Seq
    } else {
        get_global_parallelism()
    }
}

// ── Weighted Gram product ────────────────────────────────────────────

/// Cached computation of `Tn = diag(w)·M` and `TTn = Tnᵀ·Tn` for a
/// fixed sparsity pattern of `M` and varying row weights `w`.
///
/// The symbolic structure of the product and the transpose of `M` are
/// computed once; `reweight` only rescales values and reruns the
/// numeric multiplication.
pub struct WeightedGram {
    matrix: SparseColMat<usize, f64>,
    matrix_t: SparseColMat<usize, f64>,
    tn_values: Vec<f64>,
    tn_t_values: Vec<f64>,
    gram_symbolic: SymbolicSparseColMat<usize>,
    gram_values: Vec<f64>,
    info: SparseMatMulInfo,
    scratch: MemBuffer,
    par: Par,
}

impl WeightedGram {
    pub fn new(matrix: SparseColMat<usize, f64>) -> TomoResult<Self> {
        let matrix_t = matrix
            .as_ref()
            .transpose()
            .to_col_major()
            .map_err(|err| TomoError::LinAlg(format!("CSC transpose failed: {err:?}")))?;
        let (gram_symbolic, info) =
            sparse_sparse_matmul_symbolic(matrix_t.symbolic(), matrix.symbolic()).map_err(
                |err| TomoError::LinAlg(format!("symbolic Gram product failed: {err:?}")),
            )?;
        let gram_values = vec![0.0; gram_symbolic.row_idx().len()];
        let tn_values = matrix.val().to_vec();
        let tn_t_values = matrix_t.val().to_vec();
        let par = matmul_par(matrix.ncols());
        let scratch = MemBuffer::new(sparse_sparse_matmul_numeric_scratch::<usize, f64>(
            gram_symbolic.as_ref(),
            par,
        ));
        let mut gram = WeightedGram {
            matrix,
            matrix_t,
            tn_values,
            tn_t_values,
            gram_symbolic,
            gram_values,
            info,
            scratch,
            par,
        };
        let uniform = Array1::<f64>::ones(gram.matrix.nrows());
        gram.reweight(uniform.view())?;
        Ok(gram)
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    /// Rescale `Tn` and `Tnᵀ` with new row weights and recompute the
    /// Gram values in place.
    pub fn reweight(&mut self, weights: ArrayView1<'_, f64>) -> TomoResult<()> {
        if weights.len() != self.matrix.nrows() {
            return Err(TomoError::ShapeMismatch(format!(
                "weight vector of length {} does not match {} matrix rows",
                weights.len(),
                self.matrix.nrows()
            )));
        }

        // Tn keeps M's sparsity; each entry is scaled by the weight of
        // its row.
        let m_sym = self.matrix.symbolic();
        let m_col_ptr = m_sym.col_ptr();
        let m_row_idx = m_sym.row_idx();
        let m_val = self.matrix.val();
        for col in 0..self.matrix.ncols() {
            for idx in m_col_ptr[col]..m_col_ptr[col + 1] {
                self.tn_values[idx] = m_val[idx] * weights[m_row_idx[idx]];
            }
        }

        // Columns of Mᵀ correspond to rows of M, so each column of the
        // transpose is scaled by a single weight.
        let t_sym = self.matrix_t.symbolic();
        let t_col_ptr = t_sym.col_ptr();
        let t_val = self.matrix_t.val();
        for col in 0..self.matrix_t.ncols() {
            let w = weights[col];
            for idx in t_col_ptr[col]..t_col_ptr[col + 1] {
                self.tn_t_values[idx] = t_val[idx] * w;
            }
        }

        let tn = SparseColMatRef::new(self.matrix.symbolic(), &self.tn_values);
        let tn_t = SparseColMatRef::new(self.matrix_t.symbolic(), &self.tn_t_values);
        let mut stack = MemStack::new(&mut self.scratch);
        let gram_mut = SparseColMatMut::new(self.gram_symbolic.as_ref(), &mut self.gram_values);
        sparse_sparse_matmul_numeric(
            gram_mut,
            Accum::Replace,
            tn_t,
            tn,
            1.0,
            &self.info,
            self.par,
            &mut stack,
        );
        Ok(())
    }

    /// The weighted projection matrix `Tn`.
    pub fn tn(&self) -> SparseColMatRef<'_, usize, f64> {
        SparseColMatRef::new(self.matrix.symbolic(), &self.tn_values)
    }

    /// The Gram matrix `TTn = Tnᵀ·Tn`.
    pub fn ttn(&self) -> SparseColMatRef<'_, usize, f64> {
        SparseColMatRef::new(self.gram_symbolic.as_ref(), &self.gram_values)
    }
}

// ── Solvers with symbolic reuse ──────────────────────────────────────

/// Sparse LU solver. The symbolic analysis is computed on the first
/// call and reused for every later solve on the same sparsity pattern.
#[derive(Default)]
pub struct SparseLuSolver {
    symbolic: Option<SymbolicLu<usize>>,
}

impl SparseLuSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn solve(
        &mut self,
        a: &SparseColMat<usize, f64>,
        b: &Array1<f64>,
    ) -> TomoResult<Array1<f64>> {
        if a.nrows() != a.ncols() || b.len() != a.nrows() {
            return Err(TomoError::ShapeMismatch(format!(
                "sparse solve expects square system, got matrix {}x{} and rhs of length {}",
                a.nrows(),
                a.ncols(),
                b.len()
            )));
        }
        let symbolic = match &self.symbolic {
            Some(symbolic) => symbolic.clone(),
            None => {
                let symbolic = SymbolicLu::try_new(a.symbolic()).map_err(|err| {
                    TomoError::LinAlg(format!("symbolic LU analysis failed: {err:?}"))
                })?;
                self.symbolic = Some(symbolic.clone());
                symbolic
            }
        };
        let lu = Lu::try_new_with_symbolic(symbolic, a.as_ref())
            .map_err(|err| TomoError::LinAlg(format!("sparse LU factorization failed: {err:?}")))?;
        let sol = lu.solve(rhs_col(b).as_ref());
        Ok(col_to_array(&sol))
    }
}

/// Sparse LLᵀ solver with symbolic reuse. A failed numeric
/// factorization falls back to sparse LU for that call; the cached
/// Cholesky symbolic analysis is kept for later calls.
#[derive(Default)]
pub struct SparseLltSolver {
    symbolic: Option<SymbolicLlt<usize>>,
    fallback: SparseLuSolver,
}

impl SparseLltSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn solve(
        &mut self,
        a: &SparseColMat<usize, f64>,
        b: &Array1<f64>,
    ) -> TomoResult<Array1<f64>> {
        if a.nrows() != a.ncols() || b.len() != a.nrows() {
            return Err(TomoError::ShapeMismatch(format!(
                "sparse solve expects square system, got matrix {}x{} and rhs of length {}",
                a.nrows(),
                a.ncols(),
                b.len()
            )));
        }
        let symbolic = match &self.symbolic {
            Some(symbolic) => symbolic.clone(),
            None => {
                let symbolic =
                    SymbolicLlt::try_new(a.symbolic(), Side::Lower).map_err(|err| {
                        TomoError::LinAlg(format!("symbolic Cholesky analysis failed: {err:?}"))
                    })?;
                self.symbolic = Some(symbolic.clone());
                symbolic
            }
        };
        match Llt::try_new_with_symbolic(symbolic, a.as_ref(), Side::Lower) {
            Ok(llt) => {
                let sol = llt.solve(rhs_col(b).as_ref());
                Ok(col_to_array(&sol))
            }
            Err(_) => self.fallback.solve(a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn spd_matrix() -> Array2<f64> {
        array![
            [4.0, 1.0, 0.0, 0.0],
            [1.0, 5.0, 1.0, 0.0],
            [0.0, 1.0, 6.0, 2.0],
            [0.0, 0.0, 2.0, 7.0]
        ]
    }

    #[test]
    fn test_from_dense_roundtrip() {
        let a = spd_matrix();
        let sp = from_dense(&a).unwrap();
        let back = to_dense(sp.as_ref());
        for (v1, v2) in a.iter().zip(back.iter()) {
            assert!((v1 - v2).abs() < 1e-15, "roundtrip mismatch: {v1} vs {v2}");
        }
    }

    #[test]
    fn test_matvec_against_dense() {
        let a = spd_matrix();
        let sp = from_dense(&a).unwrap();
        let x = array![1.0, -2.0, 0.5, 3.0];
        let y_sparse = matvec(sp.as_ref(), x.view());
        let y_dense = a.dot(&x);
        for (v1, v2) in y_sparse.iter().zip(y_dense.iter()) {
            assert!((v1 - v2).abs() < 1e-13, "matvec mismatch: {v1} vs {v2}");
        }
    }

    #[test]
    fn test_tr_matvec_against_dense() {
        let a = array![[1.0, 2.0, 0.0], [0.0, 3.0, 4.0]];
        let sp = from_dense(&a).unwrap();
        let x = array![2.0, -1.0];
        let y_sparse = tr_matvec(sp.as_ref(), x.view());
        let y_dense = a.t().dot(&x);
        for (v1, v2) in y_sparse.iter().zip(y_dense.iter()) {
            assert!((v1 - v2).abs() < 1e-13, "transpose matvec mismatch: {v1} vs {v2}");
        }
    }

    #[test]
    fn test_quad_form_against_dense() {
        let a = spd_matrix();
        let sp = from_dense(&a).unwrap();
        let x = array![0.3, -1.2, 2.0, 0.7];
        let q_sparse = quad_form(sp.as_ref(), x.view());
        let q_dense = x.dot(&a.dot(&x));
        assert!(
            (q_sparse - q_dense).abs() < 1e-12,
            "quadratic form mismatch: {q_sparse} vs {q_dense}"
        );
    }

    #[test]
    fn test_add_scaled_against_dense() {
        let a = spd_matrix();
        let r = Array2::<f64>::eye(4);
        let sp_a = from_dense(&a).unwrap();
        let sp_r = from_dense(&r).unwrap();
        let sum = add_scaled(sp_a.as_ref(), sp_r.as_ref(), 2.5).unwrap();
        let expected = &a + &(r * 2.5);
        let back = to_dense(sum.as_ref());
        for (v1, v2) in back.iter().zip(expected.iter()) {
            assert!((v1 - v2).abs() < 1e-13, "scaled add mismatch: {v1} vs {v2}");
        }
    }

    #[test]
    fn test_weighted_gram_matches_dense_computation() {
        let m = array![
            [1.0, 0.0, 2.0],
            [0.0, 3.0, 0.0],
            [4.0, 0.0, 1.0],
            [0.0, 1.0, 1.0]
        ];
        let weights = array![0.5, 2.0, 1.0, 0.25];
        let mut gram = WeightedGram::new(from_dense(&m).unwrap()).unwrap();
        gram.reweight(weights.view()).unwrap();

        let tn_dense = &m * &weights.view().insert_axis(ndarray::Axis(1));
        let ttn_dense = tn_dense.t().dot(&tn_dense);

        let tn_back = to_dense(gram.tn());
        for (v1, v2) in tn_back.iter().zip(tn_dense.iter()) {
            assert!((v1 - v2).abs() < 1e-13, "Tn mismatch: {v1} vs {v2}");
        }
        let ttn_back = to_dense(gram.ttn());
        for (v1, v2) in ttn_back.iter().zip(ttn_dense.iter()) {
            assert!((v1 - v2).abs() < 1e-12, "TTn mismatch: {v1} vs {v2}");
        }
    }

    #[test]
    fn test_gram_reweight_is_repeatable() {
        let m = array![[1.0, 2.0], [3.0, 0.0], [0.0, 1.0]];
        let mut gram = WeightedGram::new(from_dense(&m).unwrap()).unwrap();
        let w1 = array![1.0, 2.0, 3.0];
        gram.reweight(w1.view()).unwrap();
        let first = to_dense(gram.ttn());
        gram.reweight(array![5.0, 5.0, 5.0].view()).unwrap();
        gram.reweight(w1.view()).unwrap();
        let second = to_dense(gram.ttn());
        for (v1, v2) in first.iter().zip(second.iter()) {
            assert!((v1 - v2).abs() < 1e-13, "reweight not repeatable: {v1} vs {v2}");
        }
    }

    #[test]
    fn test_sparse_lu_solver_reuses_symbolic() {
        let a = spd_matrix();
        let sp = from_dense(&a).unwrap();
        let b = array![1.0, 2.0, 3.0, 4.0];
        let mut solver = SparseLuSolver::new();
        let x1 = solver.solve(&sp, &b).unwrap();
        // Second solve on the same pattern hits the cached analysis.
        let x2 = solver.solve(&sp, &b).unwrap();
        let expected = a.dot(&x1);
        for (v1, v2) in expected.iter().zip(b.iter()) {
            assert!((v1 - v2).abs() < 1e-10, "LU residual too large: {v1} vs {v2}");
        }
        for (v1, v2) in x1.iter().zip(x2.iter()) {
            assert!((v1 - v2).abs() < 1e-13, "cached solve differs: {v1} vs {v2}");
        }
    }

    #[test]
    fn test_sparse_llt_agrees_with_lu() {
        let a = spd_matrix();
        let sp = from_dense(&a).unwrap();
        let b = array![1.0, -1.0, 0.5, 2.0];
        let x_llt = SparseLltSolver::new().solve(&sp, &b).unwrap();
        let x_lu = SparseLuSolver::new().solve(&sp, &b).unwrap();
        for (v1, v2) in x_llt.iter().zip(x_lu.iter()) {
            assert!((v1 - v2).abs() < 1e-10, "LLT/LU disagree: {v1} vs {v2}");
        }
    }

    #[test]
    fn test_sparse_llt_falls_back_on_indefinite() {
        // Slightly indefinite: Cholesky must fail, LU handles it.
        let a = array![
            [2.0, 0.0, 0.0],
            [0.0, -1e-8, 0.0],
            [0.0, 0.0, 3.0]
        ];
        let sp = from_dense(&a).unwrap();
        let b = array![2.0, 1e-8, 3.0];
        let x = SparseLltSolver::new().solve(&sp, &b).unwrap();
        assert!(x.iter().all(|v| v.is_finite()), "fallback produced non-finite entries");
        let residual: f64 = (a.dot(&x) - &b).iter().map(|v| v * v).sum();
        assert!(residual.sqrt() < 1e-8, "fallback residual too large: {residual}");
    }

    #[test]
    fn test_sparse_lu_reports_singular_matrix() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let sp = from_dense(&a).unwrap();
        let b = array![1.0, 2.0];
        let result = SparseLuSolver::new().solve(&sp, &b);
        match result {
            Err(TomoError::LinAlg(_)) => {}
            Ok(x) => assert!(
                x.iter().any(|v| !v.is_finite()),
                "singular system returned a finite solution: {x:?}"
            ),
            Err(err) => panic!("unexpected error kind: {err:?}"),
        }
    }
}
