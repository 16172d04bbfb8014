use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};

use crate::error::{SolverError, SolverResult};

/// Solves `lhs * x = rhs` with a dense LU factorization.
/// Returns `None` when the matrix is singular or the solution is not finite.
pub fn solve_dense(lhs: &DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    let solution = lhs.clone().lu().solve(rhs)?;
    if solution.iter().all(|v| v.is_finite()) {
        Some(solution)
    } else {
        None
    }
}

/// LU factorization of `I - theta * C * A` reused while the diffusion number is unchanged.
pub(crate) struct ShiftedSystem {
    theta: f64,
    courant: f64,
    lu: Option<LU<f64, Dyn, Dyn>>,
}

impl ShiftedSystem {
    pub(crate) fn new(theta: f64) -> Self {
        Self {
            theta,
            courant: f64::NAN,
            lu: None,
        }
    }

    pub(crate) fn solve(
        &mut self,
        matrix: &DMatrix<f64>,
        courant: f64,
        rhs: &DVector<f64>,
        time: f64,
    ) -> SolverResult<DVector<f64>> {
        if self.lu.is_none() || self.courant != courant {
            let n = matrix.nrows();
            let lhs = DMatrix::<f64>::identity(n, n) - matrix * (self.theta * courant);
            self.lu = Some(lhs.lu());
            self.courant = courant;
        }

        let lu = self.lu.as_ref().ok_or(SolverError::NotAssembled)?;
        let solution = lu.solve(rhs).ok_or_else(|| SolverError::NumericalInstability {
            time,
            reason: format!("singular (I - {}·C·A) with C = {courant}", self.theta),
        })?;
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NumericalInstability {
                time,
                reason: format!("non-finite solution of (I - {}·C·A) with C = {courant}", self.theta),
            });
        }
        Ok(solution)
    }
}
