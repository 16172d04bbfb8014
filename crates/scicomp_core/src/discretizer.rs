//! Time integration of the semi-discretized reaction-diffusion system
//! `du/dt = (C/Δt)(A·u + b) + q(x, t, u)`.
//!
//! Every scheme walks the same caller-supplied time vector, so solutions from
//! different schemes share columns and can be compared entry by entry.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::assembly::{NodeConstraint, Operator};
use crate::bvp::Bvp;
use crate::error::{SolverError, SolverResult};
use crate::linalg::ShiftedSystem;
use crate::solvers::Stepper;

/// Explicit forward Euler is stable on the three-point Laplacian for C ≤ 1/2.
pub const EXPLICIT_STABILITY_LIMIT: f64 = 0.5;

/// Time-stepping scheme for [`solve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheme {
    /// u' = u + C(Au + b) + Δt·q(t_n, u_n)
    Explicit,
    /// (I - CA)u' = u + Cb + Δt·q(t_{n+1}, u_n)
    Implicit,
    /// (I - CA)u' = u + Cb, then u' += Δt·q(t_n, u_n)
    ///
    /// The reaction rate is scaled by the step length, so the source enters
    /// every scheme as the same semi-discrete term.
    Mixed,
    /// (I - CA/2)u' = (I + CA/2)u + Cb + Δt·q(t_n, u_n)
    CrankNicolson,
    /// Any stepper primitive applied to the semi-discrete system, `substeps`
    /// times per interval of the time vector.
    MethodOfLines { stepper: Stepper, substeps: usize },
}

impl Scheme {
    fn stability_limit(self) -> Option<f64> {
        match self {
            Scheme::Explicit => Some(EXPLICIT_STABILITY_LIMIT),
            Scheme::MethodOfLines { stepper, .. } => stepper.diffusion_stability_limit(),
            Scheme::Implicit | Scheme::Mixed | Scheme::CrankNicolson => None,
        }
    }

    fn solves_linear_system(self) -> bool {
        matches!(
            self,
            Scheme::Implicit | Scheme::Mixed | Scheme::CrankNicolson
        )
    }
}

/// Non-fatal notice that an explicit scheme ran above its stability threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilityWarning {
    /// Index of the first time interval above the threshold; later intervals are not reported again.
    pub step: usize,
    pub time: f64,
    /// Effective diffusion number per update (after substepping).
    pub courant: f64,
    pub limit: f64,
}

/// Node values at every time point: one column per entry of the time vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    grid: Vec<f64>,
    times: Vec<f64>,
    values: DMatrix<f64>,
    warnings: Vec<StabilityWarning>,
}

impl Solution {
    pub fn grid(&self) -> &[f64] {
        &self.grid
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// N × M matrix of node values.
    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn column(&self, index: usize) -> Vec<f64> {
        self.values.column(index).iter().copied().collect()
    }

    pub fn last(&self) -> Vec<f64> {
        self.column(self.values.ncols() - 1)
    }

    pub fn warnings(&self) -> &[StabilityWarning] {
        &self.warnings
    }

    /// Largest absolute difference to `reference` in each column.
    pub fn max_abs_difference(&self, reference: &DMatrix<f64>) -> SolverResult<Vec<f64>> {
        check_reference_shape(reference, self.values.nrows(), self.values.ncols())?;
        Ok((0..self.values.ncols())
            .map(|j| (self.values.column(j) - reference.column(j)).amax())
            .collect())
    }
}

/// Result of [`solve_and_compare`].
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub solution: Solution,
    /// Max-norm difference per shared time point.
    pub max_abs_error: Vec<f64>,
}

/// Integrates `bvp` over `times` with `scheme`.
///
/// Column 0 is the initial profile at `times[0]`; constrained boundary nodes
/// are overwritten after every step and in the initial column.
///
/// Explicit and method-of-lines runs above their stability threshold are not
/// halted: they carry a [`StabilityWarning`] and return whatever they computed.
/// Only the linear-solve schemes fail with `NumericalInstability`.
pub fn solve(bvp: &Bvp, times: &[f64], scheme: Scheme) -> SolverResult<Solution> {
    let operator = bvp.operator()?;
    validate_times(times)?;
    if let Scheme::MethodOfLines { substeps: 0, .. } = scheme {
        return Err(SolverError::InvalidInput(
            "method of lines needs at least one substep per interval".to_string(),
        ));
    }

    let n = operator.dimension();
    let m = times.len();
    let mut values = DMatrix::<f64>::zeros(n, m);
    let mut warnings: Vec<StabilityWarning> = Vec::new();

    let mut u = bvp.initial_state(times[0]);
    operator.enforce_constraints(u.as_mut_slice());
    values.set_column(0, &u);

    let mut shifted = match scheme {
        Scheme::CrankNicolson => ShiftedSystem::new(0.5),
        _ => ShiftedSystem::new(1.0),
    };

    for step in 0..m - 1 {
        let t = times[step];
        let t_next = times[step + 1];
        let dt = t_next - t;
        let courant = operator.diffusion_number(dt);

        if let Some(limit) = scheme.stability_limit() {
            let effective = match scheme {
                Scheme::MethodOfLines { substeps, .. } => courant / substeps as f64,
                _ => courant,
            };
            if effective > limit && warnings.is_empty() {
                warn!(
                    "{scheme:?} step {step} at t = {t}: diffusion number {effective} exceeds stability limit {limit}"
                );
                warnings.push(StabilityWarning {
                    step,
                    time: t,
                    courant: effective,
                    limit,
                });
            }
        }

        let mut next = match scheme {
            Scheme::Explicit => {
                let mut next = &u + operator.apply(&u) * courant;
                bvp.add_source(t, &u, dt, &mut next);
                next
            }
            Scheme::Implicit => {
                let mut rhs = &u + &operator.forcing * courant;
                bvp.add_source(t_next, &u, dt, &mut rhs);
                shifted.solve(&operator.matrix, courant, &rhs, t_next)?
            }
            Scheme::Mixed => {
                let rhs = &u + &operator.forcing * courant;
                let mut next = shifted.solve(&operator.matrix, courant, &rhs, t_next)?;
                bvp.add_source(t, &u, dt, &mut next);
                next
            }
            Scheme::CrankNicolson => {
                let mut rhs =
                    &u + (&operator.matrix * &u) * (0.5 * courant) + &operator.forcing * courant;
                bvp.add_source(t, &u, dt, &mut rhs);
                shifted.solve(&operator.matrix, courant, &rhs, t_next)?
            }
            Scheme::MethodOfLines { stepper, substeps } => {
                method_of_lines(bvp, operator, stepper, substeps, t, dt, &u)
            }
        };

        operator.enforce_constraints(next.as_mut_slice());
        // Explicit blow-up above the threshold is reported by the warning only.
        if scheme.solves_linear_system() && next.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NumericalInstability {
                time: t_next,
                reason: format!("{scheme:?} produced non-finite node values"),
            });
        }

        values.set_column(step + 1, &next);
        u = next;
    }

    debug!(
        "{scheme:?}: integrated {n} nodes over {} steps ({} warnings)",
        m - 1,
        warnings.len()
    );

    Ok(Solution {
        grid: bvp.grid().points().to_vec(),
        times: times.to_vec(),
        values,
        warnings,
    })
}

/// Integrates like [`solve`] and measures the result against a reference
/// trajectory. The reference shape is validated before any stepping.
pub fn solve_and_compare(
    bvp: &Bvp,
    times: &[f64],
    scheme: Scheme,
    reference: &DMatrix<f64>,
) -> SolverResult<Comparison> {
    check_reference_shape(reference, bvp.grid().len(), times.len())?;
    let solution = solve(bvp, times, scheme)?;
    let max_abs_error = solution.max_abs_difference(reference)?;
    Ok(Comparison {
        solution,
        max_abs_error,
    })
}

/// `count + 1` equally spaced points on `[t0, tf]`, the shared time vector for all schemes.
pub fn uniform_times(t0: f64, tf: f64, count: usize) -> SolverResult<Vec<f64>> {
    if count == 0 {
        return Err(SolverError::InvalidInput(
            "time vector needs at least one interval".to_string(),
        ));
    }
    if !(tf > t0) || !t0.is_finite() || !tf.is_finite() {
        return Err(SolverError::InvalidInput(format!(
            "final time {tf} must be finite and exceed initial time {t0}"
        )));
    }
    let dt = (tf - t0) / count as f64;
    let mut times: Vec<f64> = (0..=count).map(|i| t0 + i as f64 * dt).collect();
    times[count] = tf;
    Ok(times)
}

fn method_of_lines(
    bvp: &Bvp,
    operator: &Operator,
    stepper: Stepper,
    substeps: usize,
    t: f64,
    dt: f64,
    u: &DVector<f64>,
) -> DVector<f64> {
    let scale = operator.rate_scale();
    let field = |time: f64, y: &[f64], out: &mut [f64]| {
        let state = DVector::from_column_slice(y);
        let mut rate = operator.apply(&state) * scale;
        bvp.add_source(time, &state, 1.0, &mut rate);
        for constraint in &operator.constraints {
            match *constraint {
                NodeConstraint::Pinned { index, .. } | NodeConstraint::Mirror { index, .. } => {
                    rate[index] = 0.0
                }
            }
        }
        out.copy_from_slice(rate.as_slice());
    };

    let h = dt / substeps as f64;
    let mut time = t;
    let mut state = u.as_slice().to_vec();
    for _ in 0..substeps {
        let (next_time, next_state) = stepper.step(&field, time, &state, h);
        time = next_time;
        state = next_state;
    }
    DVector::from_vec(state)
}

fn validate_times(times: &[f64]) -> SolverResult<()> {
    if times.is_empty() {
        return Err(SolverError::InvalidInput("time vector is empty".to_string()));
    }
    if let Some(bad) = times.iter().find(|t| !t.is_finite()) {
        return Err(SolverError::InvalidInput(format!(
            "time vector contains non-finite value {bad}"
        )));
    }
    if let Some(pos) = times.windows(2).position(|w| w[1] <= w[0]) {
        return Err(SolverError::InvalidInput(format!(
            "time vector must be strictly increasing (t[{}] = {}, t[{}] = {})",
            pos,
            times[pos],
            pos + 1,
            times[pos + 1]
        )));
    }
    Ok(())
}

fn check_reference_shape(reference: &DMatrix<f64>, nodes: usize, columns: usize) -> SolverResult<()> {
    if reference.ncols() != columns {
        return Err(SolverError::ShapeMismatch {
            what: "reference trajectory columns vs time points",
            expected: columns,
            actual: reference.ncols(),
        });
    }
    if reference.nrows() != nodes {
        return Err(SolverError::ShapeMismatch {
            what: "reference trajectory rows vs grid nodes",
            expected: nodes,
            actual: reference.nrows(),
        });
    }
    Ok(())
}
