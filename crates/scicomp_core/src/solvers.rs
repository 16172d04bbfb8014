//! Single-step explicit update rules for initial-value problems.
//!
//! Every stepper is a pure function of `(field, t, y, h)` returning the
//! advanced pair `(t + h, y_next)`. Callers compose them into loops; see
//! [`crate::ivp::solve_ode`] for the standard driver.

use crate::traits::{constant, Scalar, VectorField};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

fn evaluate<T: Scalar>(field: &impl VectorField<T>, t: T, y: &[T]) -> Vec<T> {
    let mut out = vec![T::zero(); y.len()];
    field.apply(t, y, &mut out);
    out
}

/// Forward Euler: y' = y + h·f(t, y). Order 1.
pub fn euler_step<T: Scalar>(field: &impl VectorField<T>, t: T, y: &[T], h: T) -> (T, Vec<T>) {
    let k1 = evaluate(field, t, y);
    let next = y.iter().zip(&k1).map(|(&yi, &ki)| yi + h * ki).collect();
    (t + h, next)
}

/// Heun's method (explicit trapezoid). Order 2.
pub fn heun_step<T: Scalar>(field: &impl VectorField<T>, t: T, y: &[T], h: T) -> (T, Vec<T>) {
    let half = constant::<T>(0.5);

    // predictor y_p = y + h*f(t, y)
    let k1 = evaluate(field, t, y);
    let predicted: Vec<T> = y.iter().zip(&k1).map(|(&yi, &ki)| yi + h * ki).collect();

    // corrector y' = y + h/2 * (f(t, y) + f(t + h, y_p))
    let k2 = evaluate(field, t + h, &predicted);
    let next = (0..y.len())
        .map(|i| y[i] + h * half * (k1[i] + k2[i]))
        .collect();
    (t + h, next)
}

/// Classic four-stage Runge-Kutta. Order 4.
pub fn rk4_step<T: Scalar>(field: &impl VectorField<T>, t: T, y: &[T], h: T) -> (T, Vec<T>) {
    let half = constant::<T>(0.5);
    let sixth = constant::<T>(1.0 / 6.0);
    let two = constant::<T>(2.0);
    let n = y.len();
    let mut tmp = vec![T::zero(); n];

    // k1 = f(t, y)
    let k1 = evaluate(field, t, y);

    // k2 = f(t + h/2, y + h*k1/2)
    for i in 0..n {
        tmp[i] = y[i] + h * k1[i] * half;
    }
    let k2 = evaluate(field, t + h * half, &tmp);

    // k3 = f(t + h/2, y + h*k2/2)
    for i in 0..n {
        tmp[i] = y[i] + h * k2[i] * half;
    }
    let k3 = evaluate(field, t + h * half, &tmp);

    // k4 = f(t + h, y + h*k3)
    for i in 0..n {
        tmp[i] = y[i] + h * k3[i];
    }
    let k4 = evaluate(field, t + h, &tmp);

    let next = (0..n)
        .map(|i| y[i] + h * sixth * (k1[i] + two * k2[i] + two * k3[i] + k4[i]))
        .collect();
    (t + h, next)
}

/// Tsitouras 5(4) weights used as a fixed-step fifth-order update.
/// Only serves as a high-accuracy reference; no error control is performed.
pub fn tsit5_step<T: Scalar>(field: &impl VectorField<T>, t: T, y: &[T], h: T) -> (T, Vec<T>) {
    let n = y.len();
    let c = |v: f64| constant::<T>(v);

    let c2 = c(0.161);
    let c3 = c(0.327);
    let c4 = c(0.9);
    let c5 = c(0.9800255409045097);

    let a21 = c(0.161);

    let a31 = c(-0.008480655492356989);
    let a32 = c(0.335480655492357);

    let a41 = c(2.898);
    let a42 = c(-6.359447987781783);
    let a43 = c(4.361447987781783);

    let a51 = c(5.325864858437957);
    let a52 = c(-11.748883564062828);
    let a53 = c(7.495539342889693);
    let a54 = c(-0.09249506636030195);

    let a61 = c(5.86145544294642);
    let a62 = c(-12.92096931784711);
    let a63 = c(8.159367898576159);
    let a64 = c(-0.071584973281401);
    let a65 = c(-0.02826857949054663);

    let b1 = c(0.09646076681806523);
    let b2 = c(0.01);
    let b3 = c(0.4798896504144996);
    let b4 = c(1.379008574103742);
    let b5 = c(-3.290069515436099);
    let b6 = c(2.324710524099774);

    let mut tmp = vec![T::zero(); n];

    let k1 = evaluate(field, t, y);

    for i in 0..n {
        tmp[i] = y[i] + h * (a21 * k1[i]);
    }
    let k2 = evaluate(field, t + c2 * h, &tmp);

    for i in 0..n {
        tmp[i] = y[i] + h * (a31 * k1[i] + a32 * k2[i]);
    }
    let k3 = evaluate(field, t + c3 * h, &tmp);

    for i in 0..n {
        tmp[i] = y[i] + h * (a41 * k1[i] + a42 * k2[i] + a43 * k3[i]);
    }
    let k4 = evaluate(field, t + c4 * h, &tmp);

    for i in 0..n {
        tmp[i] = y[i] + h * (a51 * k1[i] + a52 * k2[i] + a53 * k3[i] + a54 * k4[i]);
    }
    let k5 = evaluate(field, t + c5 * h, &tmp);

    for i in 0..n {
        tmp[i] = y[i]
            + h * (a61 * k1[i] + a62 * k2[i] + a63 * k3[i] + a64 * k4[i] + a65 * k5[i]);
    }
    let k6 = evaluate(field, t + h, &tmp);

    let next = (0..n)
        .map(|i| {
            y[i] + h
                * (b1 * k1[i] + b2 * k2[i] + b3 * k3[i] + b4 * k4[i] + b5 * k5[i] + b6 * k6[i])
        })
        .collect();
    (t + h, next)
}

/// Selector over the available stepper primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stepper {
    Euler,
    Heun,
    Rk4,
    Tsit5,
}

impl Stepper {
    pub const ALL: [Stepper; 4] = [Stepper::Euler, Stepper::Heun, Stepper::Rk4, Stepper::Tsit5];

    pub fn step<T: Scalar>(
        self,
        field: &impl VectorField<T>,
        t: T,
        y: &[T],
        h: T,
    ) -> (T, Vec<T>) {
        match self {
            Stepper::Euler => euler_step(field, t, y, h),
            Stepper::Heun => heun_step(field, t, y, h),
            Stepper::Rk4 => rk4_step(field, t, y, h),
            Stepper::Tsit5 => tsit5_step(field, t, y, h),
        }
    }

    /// Global order of accuracy.
    pub fn order(self) -> u32 {
        match self {
            Stepper::Euler => 1,
            Stepper::Heun => 2,
            Stepper::Rk4 => 4,
            Stepper::Tsit5 => 5,
        }
    }

    /// Largest diffusion number C for which the method of lines stays stable
    /// on the three-point Laplacian (negative real-axis stability interval / 4).
    pub fn diffusion_stability_limit(self) -> Option<f64> {
        match self {
            Stepper::Euler | Stepper::Heun => Some(0.5),
            Stepper::Rk4 => Some(2.785 / 4.0),
            Stepper::Tsit5 => None,
        }
    }
}

impl fmt::Display for Stepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stepper::Euler => "Euler",
            Stepper::Heun => "Heun",
            Stepper::Rk4 => "RK4",
            Stepper::Tsit5 => "Tsit5",
        };
        f.write_str(name)
    }
}

impl FromStr for Stepper {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stepper::ALL
            .into_iter()
            .find(|stepper| stepper.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!("Invalid method: {s}. Method must be one of Euler, Heun, RK4, Tsit5.")
            })
    }
}
