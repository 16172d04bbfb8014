use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars by the stepper primitives.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Converts an f64 literal into `T`, yielding NaN if the type cannot represent it.
pub(crate) fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Right-hand side of an initial-value problem dy/dt = f(t, y).
pub trait VectorField<T: Scalar> {
    /// Evaluates the vector field.
    /// t: current time
    /// y: current state
    /// out: buffer to write dy/dt into (same length as `y`)
    fn apply(&self, t: T, y: &[T], out: &mut [T]);
}

impl<T, F> VectorField<T> for F
where
    T: Scalar,
    F: Fn(T, &[T], &mut [T]),
{
    fn apply(&self, t: T, y: &[T], out: &mut [T]) {
        self(t, y, out)
    }
}

/// Reaction/source term q(x, t, u) of a reaction-diffusion problem.
pub trait SourceTerm {
    /// Writes q evaluated at every grid node into `out`.
    fn evaluate(&self, x: &[f64], t: f64, u: &[f64], out: &mut [f64]);
}

impl<F> SourceTerm for F
where
    F: Fn(&[f64], f64, &[f64], &mut [f64]),
{
    fn evaluate(&self, x: &[f64], t: f64, u: &[f64], out: &mut [f64]) {
        self(x, t, u, out)
    }
}

/// Spatial profile f(x, t), used for initial conditions.
pub trait Profile {
    /// Writes the profile evaluated at every grid node into `out`.
    fn evaluate(&self, x: &[f64], t: f64, out: &mut [f64]);
}

impl<F> Profile for F
where
    F: Fn(&[f64], f64, &mut [f64]),
{
    fn evaluate(&self, x: &[f64], t: f64, out: &mut [f64]) {
        self(x, t, out)
    }
}
