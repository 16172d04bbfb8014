use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::linalg::solve_dense;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            damping: 1.0,
            tolerance: 1e-9,
        }
    }
}

impl NewtonSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            bail!("max_steps must be greater than zero.");
        }
        if self.damping <= 0.0 {
            bail!("damping must be positive.");
        }
        if self.tolerance <= 0.0 {
            bail!("tolerance must be positive.");
        }
        Ok(())
    }
}

/// How a Newton solve ended. Only `Converged` carries a usable root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewtonStatus {
    Converged,
    IterationCap,
    SingularJacobian,
    NonFinite,
}

#[derive(Debug, Clone)]
pub struct NewtonReport {
    pub state: DVector<f64>,
    pub residual_norm: f64,
    pub iterations: usize,
    pub status: NewtonStatus,
}

impl NewtonReport {
    pub fn converged(&self) -> bool {
        self.status == NewtonStatus::Converged
    }
}

/// Newton iteration `J(x)·δ = -F(x)`, `x ← x + damping·δ` until `‖F‖ ≤ tolerance`.
///
/// Failing to converge is reported through [`NewtonStatus`]; only errors raised
/// by the residual or Jacobian callbacks propagate.
pub fn newton_solve<R, J>(
    mut residual: R,
    mut jacobian: J,
    initial: DVector<f64>,
    settings: NewtonSettings,
) -> Result<NewtonReport>
where
    R: FnMut(&DVector<f64>) -> Result<DVector<f64>>,
    J: FnMut(&DVector<f64>) -> Result<DMatrix<f64>>,
{
    settings.validate()?;

    let mut state = initial;
    let mut f_val = residual(&state)?;
    let mut residual_norm = f_val.norm();
    let mut iterations = 0usize;

    let status = loop {
        if !residual_norm.is_finite() {
            break NewtonStatus::NonFinite;
        }
        if residual_norm <= settings.tolerance {
            break NewtonStatus::Converged;
        }
        if iterations >= settings.max_steps {
            break NewtonStatus::IterationCap;
        }

        let jac = jacobian(&state)?;
        let Some(delta) = solve_dense(&jac, &(-&f_val)) else {
            break NewtonStatus::SingularJacobian;
        };

        state.axpy(settings.damping, &delta, 1.0);
        iterations += 1;
        f_val = residual(&state)?;
        residual_norm = f_val.norm();
    };

    Ok(NewtonReport {
        state,
        residual_norm,
        iterations,
        status,
    })
}

/// Forward-difference Jacobian of `f` at `x`, given `fx = f(x)`.
pub fn finite_difference_jacobian<F>(
    mut f: F,
    x: &DVector<f64>,
    fx: &DVector<f64>,
) -> Result<DMatrix<f64>>
where
    F: FnMut(&DVector<f64>) -> Result<DVector<f64>>,
{
    let rows = fx.len();
    let mut jac = DMatrix::zeros(rows, x.len());
    let mut perturbed = x.clone();
    for j in 0..x.len() {
        let step = f64::EPSILON.sqrt() * (1.0 + x[j].abs());
        perturbed[j] = x[j] + step;
        let f_plus = f(&perturbed)?;
        if f_plus.len() != rows {
            bail!(
                "Residual dimension changed during differencing: expected {}, got {}.",
                rows,
                f_plus.len()
            );
        }
        jac.set_column(j, &((f_plus - fx) / step));
        perturbed[j] = x[j];
    }
    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle_line(x: &DVector<f64>) -> Result<DVector<f64>> {
        // x² + y² = 4, x = y
        Ok(DVector::from_vec(vec![
            x[0] * x[0] + x[1] * x[1] - 4.0,
            x[0] - x[1],
        ]))
    }

    #[test]
    fn newton_converges_with_finite_difference_jacobian() {
        let report = newton_solve(
            circle_line,
            |x: &DVector<f64>| {
                let fx = circle_line(x)?;
                finite_difference_jacobian(circle_line, x, &fx)
            },
            DVector::from_vec(vec![1.0, 2.0]),
            NewtonSettings::default(),
        )
        .expect("newton should run");

        assert!(report.converged(), "status {:?}", report.status);
        let root = 2.0f64.sqrt();
        assert!((report.state[0] - root).abs() < 1e-8);
        assert!((report.state[1] - root).abs() < 1e-8);
        assert!(report.iterations > 0);
    }

    #[test]
    fn newton_reports_iteration_cap() {
        // x² + 1 = 0 has no real root.
        let report = newton_solve(
            |x: &DVector<f64>| Ok(DVector::from_vec(vec![x[0] * x[0] + 1.0])),
            |x: &DVector<f64>| Ok(DMatrix::from_element(1, 1, 2.0 * x[0])),
            DVector::from_vec(vec![0.3]),
            NewtonSettings {
                max_steps: 8,
                ..NewtonSettings::default()
            },
        )
        .expect("newton should run");
        assert_eq!(report.status, NewtonStatus::IterationCap);
        assert_eq!(report.iterations, 8);
    }

    #[test]
    fn newton_reports_singular_jacobian() {
        let report = newton_solve(
            |x: &DVector<f64>| Ok(DVector::from_vec(vec![x[0] * x[0] - 1.0])),
            |x: &DVector<f64>| Ok(DMatrix::from_element(1, 1, 2.0 * x[0])),
            DVector::from_vec(vec![0.0]),
            NewtonSettings::default(),
        )
        .expect("newton should run");
        assert_eq!(report.status, NewtonStatus::SingularJacobian);
    }

    #[test]
    fn newton_rejects_bad_settings() {
        let err = newton_solve(
            circle_line,
            |_x: &DVector<f64>| Ok(DMatrix::identity(2, 2)),
            DVector::zeros(2),
            NewtonSettings {
                tolerance: 0.0,
                ..NewtonSettings::default()
            },
        )
        .expect_err("invalid tolerance");
        assert!(format!("{err}").contains("tolerance must be positive"));
    }

    #[test]
    fn finite_difference_jacobian_matches_analytic() {
        let x = DVector::from_vec(vec![0.5, -1.5]);
        let fx = circle_line(&x).expect("residual");
        let jac = finite_difference_jacobian(circle_line, &x, &fx).expect("jacobian");
        let exact = DMatrix::from_row_slice(2, 2, &[1.0, -3.0, 1.0, -1.0]);
        assert!((jac - exact).amax() < 1e-6);
    }
}
