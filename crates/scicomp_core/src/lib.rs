pub mod assembly;
pub mod bvp;
pub mod continuation;
pub mod discretizer;
pub mod error;
pub mod grid;
pub mod ivp;
pub mod linalg;
pub mod newton;
pub mod solvers;
/// The `scicomp_core` crate is a small numerical-methods engine.
///
/// Key components:
/// - **Solvers**: single-step explicit primitives (Euler, Heun, RK4, Tsit5), generic over `Scalar`.
/// - **Grid / Assembly / Bvp**: uniform grids, boundary conditions and the assembled
///   finite-difference diffusion operator `(A, b)` of a reaction-diffusion problem.
/// - **Discretizer**: explicit, implicit, mixed, Crank–Nicolson and method-of-lines
///   time stepping over a shared time vector, with stability warnings.
/// - **Continuation**: natural-parameter and pseudo-arclength continuation of
///   `R(u, p) = 0`, driven as an explicit predictor/corrector state machine.
/// - **Ivp**: fixed-step driver and shooting for periodic orbits.
pub mod traits;

pub use bvp::Bvp;
pub use continuation::{
    continue_branch, extend_branch, Branch, ContinuationEngine, ContinuationMethod,
    ContinuationProblem, ContinuationSettings, ContinuationState, StepPhase, Termination,
};
pub use discretizer::{solve, solve_and_compare, uniform_times, Scheme, Solution};
pub use error::{SolverError, SolverResult};
pub use grid::{make_grid, BoundaryCondition, Grid, GridSpec};
pub use solvers::Stepper;
