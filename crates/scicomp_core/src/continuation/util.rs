//! Helpers shared by the continuation engine: augmented vectors, the
//! extended Jacobian and spectra.

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;

use super::problem::ContinuationProblem;

/// Packs `(state, param)` as `[p, u...]`.
pub fn to_aug(state: &[f64], param: f64) -> DVector<f64> {
    let mut aug = DVector::zeros(state.len() + 1);
    aug[0] = param;
    aug.rows_mut(1, state.len()).copy_from_slice(state);
    aug
}

/// Inverse of [`to_aug`].
pub fn split_aug(aug: &DVector<f64>) -> (DVector<f64>, f64) {
    (aug.rows(1, aug.len() - 1).into_owned(), aug[0])
}

/// `[∂R/∂p | ∂R/∂u]`, matching the `[p, u...]` column order of [`to_aug`].
pub fn extended_jacobian<P: ContinuationProblem + ?Sized>(
    problem: &mut P,
    state: &DVector<f64>,
    param: f64,
) -> Result<DMatrix<f64>> {
    let dim = problem.dimension();
    let r_p = problem.param_derivative(state, param)?;
    let j_u = problem.jacobian(state, param)?;
    if r_p.len() != dim || j_u.nrows() != dim || j_u.ncols() != dim {
        bail!(
            "Derivative shapes {}x{} and {} do not match dimension {}",
            j_u.nrows(),
            j_u.ncols(),
            r_p.len(),
            dim
        );
    }
    let mut j_ext = DMatrix::zeros(dim, dim + 1);
    j_ext.set_column(0, &r_p);
    j_ext.view_mut((0, 1), (dim, dim)).copy_from(&j_u);
    Ok(j_ext)
}

/// Eigenvalues of a square matrix.
pub fn compute_eigenvalues(mat: &DMatrix<f64>) -> Result<Vec<Complex<f64>>> {
    if mat.nrows() == 0 {
        return Ok(Vec::new());
    }
    if !mat.is_square() {
        bail!("Eigenvalues need a square matrix, got {}x{}", mat.nrows(), mat.ncols());
    }
    Ok(mat.clone().complex_eigenvalues().iter().cloned().collect())
}
