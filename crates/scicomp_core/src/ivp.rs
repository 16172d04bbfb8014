//! Fixed-step initial-value driver and a shooting solver for periodic orbits.

use anyhow::{bail, Result};
use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};
use crate::newton::{finite_difference_jacobian, newton_solve, NewtonSettings};
use crate::solvers::Stepper;
use crate::traits::VectorField;

/// Stop criteria and step control for [`solve_ode`]. At least one of
/// `final_time` and `max_steps` must be set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OdeSettings {
    pub method: Stepper,
    pub max_step: f64,
    pub final_time: Option<f64>,
    pub max_steps: Option<usize>,
}

impl Default for OdeSettings {
    fn default() -> Self {
        Self {
            method: Stepper::Rk4,
            max_step: 1e-2,
            final_time: Some(1.0),
            max_steps: None,
        }
    }
}

/// Sampled trajectory, one row of `y` per entry of `t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdeSolution {
    pub t: Vec<f64>,
    pub y: Vec<Vec<f64>>,
}

impl OdeSolution {
    pub fn last(&self) -> Option<(f64, &[f64])> {
        Some((*self.t.last()?, self.y.last()?.as_slice()))
    }
}

fn validate(t0: f64, y0: &[f64], settings: &OdeSettings) -> SolverResult<()> {
    if y0.is_empty() {
        return Err(SolverError::InvalidInput("initial state is empty".into()));
    }
    if !(settings.max_step > 0.0) || !settings.max_step.is_finite() {
        return Err(SolverError::InvalidInput(format!(
            "max_step must be positive, got {}",
            settings.max_step
        )));
    }
    if let Some(tf) = settings.final_time {
        if !(tf > t0) {
            return Err(SolverError::InvalidInput(format!(
                "final time {tf} must be greater than initial time {t0}"
            )));
        }
    }
    match settings.max_steps {
        Some(0) => Err(SolverError::InvalidInput(
            "max_steps must be greater than zero".into(),
        )),
        None if settings.final_time.is_none() => Err(SolverError::InvalidInput(
            "either final_time or max_steps must be given".into(),
        )),
        _ => Ok(()),
    }
}

/// Integrates `y' = f(t, y)` from `(t0, y0)` with steps of at most `max_step`.
///
/// Stops at `final_time` (the last step is shortened so it lands exactly on
/// it) or after `max_steps` steps, whichever comes first.
pub fn solve_ode(
    field: &impl VectorField<f64>,
    t0: f64,
    y0: &[f64],
    settings: &OdeSettings,
) -> SolverResult<OdeSolution> {
    validate(t0, y0, settings)?;

    let mut t = t0;
    let mut y = y0.to_vec();
    let mut solution = OdeSolution {
        t: vec![t0],
        y: vec![y.clone()],
    };

    let mut steps = 0usize;
    loop {
        if settings.max_steps.is_some_and(|cap| steps >= cap) {
            break;
        }
        let (h, lands_on_final) = match settings.final_time {
            Some(tf) => {
                let remaining = tf - t;
                if remaining <= f64::EPSILON * tf.abs().max(1.0) {
                    break;
                }
                if remaining <= settings.max_step {
                    (remaining, true)
                } else {
                    (settings.max_step, false)
                }
            }
            None => (settings.max_step, false),
        };

        let (t_next, y_next) = settings.method.step(field, t, &y, h);
        if y_next.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NumericalInstability {
                time: t_next,
                reason: format!("{} step produced non-finite state", settings.method),
            });
        }
        t = match (lands_on_final, settings.final_time) {
            (true, Some(tf)) => tf,
            _ => t_next,
        };
        y = y_next;
        steps += 1;
        solution.t.push(t);
        solution.y.push(y.clone());
    }

    Ok(solution)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShootingSettings {
    pub method: Stepper,
    /// Fixed number of steps used to integrate over one period.
    pub steps_per_period: usize,
    pub newton: NewtonSettings,
}

impl Default for ShootingSettings {
    fn default() -> Self {
        Self {
            method: Stepper::Rk4,
            steps_per_period: 1000,
            newton: NewtonSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeriodicOrbit {
    pub initial_state: Vec<f64>,
    pub period: f64,
    pub residual_norm: f64,
    pub iterations: usize,
}

fn flow(
    field: &impl VectorField<f64>,
    method: Stepper,
    y0: &[f64],
    period: f64,
    steps: usize,
) -> Vec<f64> {
    let h = period / steps as f64;
    let mut t = 0.0;
    let mut y = y0.to_vec();
    for _ in 0..steps {
        (t, y) = method.step(field, t, &y, h);
    }
    y
}

/// Finds a periodic orbit from `guess = [y0..., T]` by Newton on
/// `[φ_T(y0) - y0, phase(y0)] = 0`.
pub fn shooting(
    field: &impl VectorField<f64>,
    phase: impl Fn(&[f64]) -> f64,
    guess: &[f64],
    settings: &ShootingSettings,
) -> Result<PeriodicOrbit> {
    if guess.len() < 2 {
        bail!("Shooting guess needs at least one state variable and a period");
    }
    if settings.steps_per_period == 0 {
        bail!("steps_per_period must be greater than zero.");
    }
    let dim = guess.len() - 1;
    if !(guess[dim] > 0.0) {
        bail!("Period guess must be positive, got {}", guess[dim]);
    }

    let residual = |z: &DVector<f64>| -> Result<DVector<f64>> {
        let y0 = &z.as_slice()[..dim];
        let period = z[dim];
        let end = flow(field, settings.method, y0, period, settings.steps_per_period);
        let mut out = DVector::zeros(dim + 1);
        for i in 0..dim {
            out[i] = end[i] - y0[i];
        }
        out[dim] = phase(y0);
        Ok(out)
    };
    let jacobian = |z: &DVector<f64>| {
        let fz = residual(z)?;
        finite_difference_jacobian(residual, z, &fz)
    };

    let report = newton_solve(
        residual,
        jacobian,
        DVector::from_column_slice(guess),
        settings.newton,
    )?;
    if !report.converged() {
        bail!(
            "Shooting did not converge ({:?}, residual {:e})",
            report.status,
            report.residual_norm
        );
    }

    let period = report.state[dim];
    if !(period > 0.0) {
        bail!("Shooting converged to a non-positive period {}", period);
    }
    debug!(
        "Periodic orbit with period {:.6} after {} Newton steps",
        period, report.iterations
    );
    Ok(PeriodicOrbit {
        initial_state: report.state.as_slice()[..dim].to_vec(),
        period,
        residual_norm: report.residual_norm,
        iterations: report.iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn decay(_t: f64, y: &[f64], out: &mut [f64]) {
        out[0] = -y[0];
    }

    fn hopf_normal_form(_t: f64, y: &[f64], out: &mut [f64]) {
        let r2 = y[0] * y[0] + y[1] * y[1];
        out[0] = y[0] - y[1] - y[0] * r2;
        out[1] = y[0] + y[1] - y[1] * r2;
    }

    #[test]
    fn rk4_decay_matches_exponential() {
        let solution = solve_ode(&decay, 0.0, &[1.0], &OdeSettings::default()).expect("solve");
        let (t, y) = solution.last().expect("samples");
        assert!((t - 1.0).abs() < 1e-12);
        assert!((y[0] - (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn final_step_lands_on_final_time() {
        let settings = OdeSettings {
            max_step: 0.3,
            ..OdeSettings::default()
        };
        let solution = solve_ode(&decay, 0.0, &[1.0], &settings).expect("solve");
        assert_eq!(solution.t.len(), 5);
        assert_eq!(*solution.t.last().expect("samples"), 1.0);
        assert!(solution.t.iter().all(|&t| t <= 1.0));
    }

    #[test]
    fn step_cap_stops_before_final_time() {
        let settings = OdeSettings {
            method: Stepper::Euler,
            max_step: 0.1,
            final_time: Some(10.0),
            max_steps: Some(3),
        };
        let solution = solve_ode(&decay, 0.0, &[1.0], &settings).expect("solve");
        assert_eq!(solution.t.len(), 4);
        assert!((solution.y[3][0] - 0.9f64.powi(3)).abs() < 1e-12);

        let open_ended = OdeSettings {
            final_time: None,
            ..settings
        };
        assert_eq!(
            solve_ode(&decay, 0.0, &[1.0], &open_ended).expect("solve").t.len(),
            4
        );
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let base = OdeSettings::default();
        let cases = [
            OdeSettings {
                final_time: Some(0.0),
                ..base
            },
            OdeSettings {
                max_steps: Some(0),
                ..base
            },
            OdeSettings {
                max_step: 0.0,
                ..base
            },
            OdeSettings {
                final_time: None,
                max_steps: None,
                ..base
            },
        ];
        for settings in cases {
            assert!(
                matches!(
                    solve_ode(&decay, 0.0, &[1.0], &settings),
                    Err(SolverError::InvalidInput(_))
                ),
                "{settings:?} should be rejected"
            );
        }
        assert!(solve_ode(&decay, 0.0, &[], &base).is_err());
    }

    #[test]
    fn blow_up_is_reported() {
        let settings = OdeSettings {
            method: Stepper::Euler,
            max_step: 1.0,
            final_time: Some(100.0),
            max_steps: None,
        };
        let result = solve_ode(
            &|_t: f64, y: &[f64], out: &mut [f64]| out[0] = y[0] * y[0],
            0.0,
            &[10.0],
            &settings,
        );
        assert!(matches!(
            result,
            Err(SolverError::NumericalInstability { .. })
        ));
    }

    #[test]
    fn shooting_finds_unit_circle_orbit() {
        let orbit = shooting(
            &hopf_normal_form,
            |y: &[f64]| y[1],
            &[1.1, 0.1, 6.0],
            &ShootingSettings::default(),
        )
        .expect("shooting should converge");
        let radius = orbit.initial_state[0].hypot(orbit.initial_state[1]);
        assert!((radius - 1.0).abs() < 1e-6, "radius {radius}");
        assert!((orbit.period - 2.0 * PI).abs() < 1e-6, "period {}", orbit.period);
    }

    #[test]
    fn shooting_rejects_non_positive_period() {
        let err = shooting(
            &hopf_normal_form,
            |y: &[f64]| y[1],
            &[1.0, 0.0, -1.0],
            &ShootingSettings::default(),
        )
        .expect_err("negative period");
        assert!(err.to_string().contains("Period guess must be positive"));
    }
}
