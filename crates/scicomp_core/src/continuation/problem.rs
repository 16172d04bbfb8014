use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

use crate::newton::finite_difference_jacobian;

/// Core interface implemented by any parametrized system `R(u, p) = 0` that can be continued.
///
/// Only [`residual`](ContinuationProblem::residual) is required; the Jacobian and
/// the parameter derivative fall back to forward differences.
pub trait ContinuationProblem {
    /// Number of state variables (excluding the continuation parameter).
    fn dimension(&self) -> usize;

    /// Evaluate `R(state, param)` and write into `out`.
    fn residual(&mut self, state: &DVector<f64>, param: f64, out: &mut DVector<f64>) -> Result<()>;

    /// `∂R/∂u` at `(state, param)`.
    fn jacobian(&mut self, state: &DVector<f64>, param: f64) -> Result<DMatrix<f64>> {
        let fx = self.evaluate(state, param)?;
        finite_difference_jacobian(|x| self.evaluate(x, param), state, &fx)
    }

    /// `∂R/∂p` at `(state, param)`.
    fn param_derivative(&mut self, state: &DVector<f64>, param: f64) -> Result<DVector<f64>> {
        let fx = self.evaluate(state, param)?;
        let step = f64::EPSILON.sqrt() * (1.0 + param.abs());
        let shifted = self.evaluate(state, param + step)?;
        Ok((shifted - fx) / step)
    }

    /// Allocating wrapper around [`residual`](ContinuationProblem::residual).
    fn evaluate(&mut self, state: &DVector<f64>, param: f64) -> Result<DVector<f64>> {
        let mut out = DVector::zeros(self.dimension());
        self.residual(state, param, &mut out)?;
        Ok(out)
    }
}

type JacobianFn = Box<dyn FnMut(&DVector<f64>, f64) -> DMatrix<f64>>;

/// Continuation problem backed by closures.
pub struct FnProblem<R> {
    dim: usize,
    residual: R,
    jacobian: Option<JacobianFn>,
}

impl<R> FnProblem<R>
where
    R: FnMut(&DVector<f64>, f64) -> DVector<f64>,
{
    pub fn new(dim: usize, residual: R) -> Self {
        Self {
            dim,
            residual,
            jacobian: None,
        }
    }

    /// Supplies an analytic `∂R/∂u` instead of finite differences.
    pub fn with_jacobian(
        mut self,
        jacobian: impl FnMut(&DVector<f64>, f64) -> DMatrix<f64> + 'static,
    ) -> Self {
        self.jacobian = Some(Box::new(jacobian));
        self
    }
}

impl<R> ContinuationProblem for FnProblem<R>
where
    R: FnMut(&DVector<f64>, f64) -> DVector<f64>,
{
    fn dimension(&self) -> usize {
        self.dim
    }

    fn residual(&mut self, state: &DVector<f64>, param: f64, out: &mut DVector<f64>) -> Result<()> {
        let value = (self.residual)(state, param);
        if value.len() != out.len() {
            bail!(
                "Residual has dimension {}, expected {}",
                value.len(),
                out.len()
            );
        }
        out.copy_from(&value);
        Ok(())
    }

    fn jacobian(&mut self, state: &DVector<f64>, param: f64) -> Result<DMatrix<f64>> {
        if let Some(jacobian) = self.jacobian.as_mut() {
            let jac = jacobian(state, param);
            if jac.nrows() != self.dim || jac.ncols() != self.dim {
                bail!(
                    "Jacobian has shape {}x{}, expected {}x{}",
                    jac.nrows(),
                    jac.ncols(),
                    self.dim,
                    self.dim
                );
            }
            return Ok(jac);
        }
        let fx = self.evaluate(state, param)?;
        finite_difference_jacobian(|x| self.evaluate(x, param), state, &fx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold_map() -> FnProblem<impl FnMut(&DVector<f64>, f64) -> DVector<f64>> {
        FnProblem::new(1, |u: &DVector<f64>, p: f64| DVector::from_vec(vec![p - u[0] * u[0]]))
    }

    #[test]
    fn default_derivatives_use_finite_differences() {
        let mut problem = fold_map();
        let u = DVector::from_vec(vec![1.5]);
        let jac = problem.jacobian(&u, 2.0).expect("jacobian");
        assert!((jac[(0, 0)] + 3.0).abs() < 1e-6);
        let dp = problem.param_derivative(&u, 2.0).expect("param derivative");
        assert!((dp[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn analytic_jacobian_is_used_when_supplied() {
        let mut problem = fold_map().with_jacobian(|u: &DVector<f64>, _p: f64| {
            DMatrix::from_element(1, 1, -2.0 * u[0])
        });
        let jac = problem
            .jacobian(&DVector::from_vec(vec![0.25]), 0.0)
            .expect("jacobian");
        assert_eq!(jac[(0, 0)], -0.5);
    }

    #[test]
    fn residual_dimension_is_checked() {
        let mut problem = FnProblem::new(2, |_u: &DVector<f64>, _p: f64| DVector::zeros(3));
        let err = problem
            .evaluate(&DVector::zeros(2), 0.0)
            .expect_err("dimension mismatch");
        assert!(format!("{err}").contains("expected 2"));
    }

    #[test]
    fn jacobian_shape_is_checked() {
        let mut problem = fold_map().with_jacobian(|_u: &DVector<f64>, _p: f64| DMatrix::zeros(2, 2));
        assert!(problem.jacobian(&DVector::zeros(1), 0.0).is_err());
    }
}
