// ─────────────────────────────────────────────────────────────────────
// SCPN Tomography — Regularization Operators
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Assembly of the regularization matrix `R` from precomputed operator
//! components.

use ndarray::Array2;
use tomo_types::config::Operator;
use tomo_types::error::{TomoError, TomoResult};

/// Combine operator components into the regularization matrix.
///
/// `D0N2` uses the first component alone; `D1N2` and `D2N2` both use
/// the sum of the first two (typically the two directional derivative
/// quadratic forms).
pub fn build_regularization(
    operator: Operator,
    components: &[Array2<f64>],
) -> TomoResult<Array2<f64>> {
    let needed = operator.n_components();
    if components.len() < needed {
        return Err(TomoError::ShapeMismatch(format!(
            "operator {operator} needs {needed} component(s), got {}",
            components.len()
        )));
    }
    let nbs = components[0].nrows();
    for (k, comp) in components.iter().take(needed).enumerate() {
        if comp.nrows() != nbs || comp.ncols() != nbs {
            return Err(TomoError::ShapeMismatch(format!(
                "operator component {k} is {}x{}, expected {nbs}x{nbs}",
                comp.nrows(),
                comp.ncols()
            )));
        }
    }
    match operator {
        Operator::D0N2 => Ok(components[0].clone()),
        Operator::D1N2 | Operator::D2N2 => Ok(&components[0] + &components[1]),
    }
}
