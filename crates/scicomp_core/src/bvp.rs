use nalgebra::DVector;

use crate::assembly::{assemble, Operator};
use crate::error::{SolverError, SolverResult};
use crate::grid::{BoundaryCondition, Grid};
use crate::traits::{Profile, SourceTerm};

/// Reaction-diffusion problem `u_t = D·u_xx + q(x, t, u)` on a grid.
///
/// The operator `(A, b)` is derived data: it exists only after [`Bvp::assemble`]
/// and every setter that changes the grid, coefficient or boundaries drops it.
pub struct Bvp {
    grid: Grid,
    diffusion: f64,
    left: BoundaryCondition,
    right: BoundaryCondition,
    source: Option<Box<dyn SourceTerm>>,
    initial: Box<dyn Profile>,
    operator: Option<Operator>,
}

impl Bvp {
    pub fn new(
        grid: Grid,
        diffusion: f64,
        left: BoundaryCondition,
        right: BoundaryCondition,
        initial: impl Profile + 'static,
    ) -> Self {
        Self {
            grid,
            diffusion,
            left,
            right,
            source: None,
            initial: Box::new(initial),
            operator: None,
        }
    }

    pub fn with_source(mut self, source: impl SourceTerm + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Recomputes `(A, b)` from the current grid, coefficient and boundaries.
    pub fn assemble(&mut self) -> SolverResult<&Operator> {
        let operator = assemble(&self.grid, self.diffusion, self.left, self.right)?;
        Ok(self.operator.insert(operator))
    }

    /// The assembled operator; fails if `assemble()` has not run since the last change.
    pub fn operator(&self) -> SolverResult<&Operator> {
        self.operator.as_ref().ok_or(SolverError::NotAssembled)
    }

    pub fn is_assembled(&self) -> bool {
        self.operator.is_some()
    }

    pub fn set_grid(&mut self, grid: Grid) {
        self.grid = grid;
        self.operator = None;
    }

    pub fn set_diffusion(&mut self, diffusion: f64) {
        self.diffusion = diffusion;
        self.operator = None;
    }

    pub fn set_boundaries(&mut self, left: BoundaryCondition, right: BoundaryCondition) {
        self.left = left;
        self.right = right;
        self.operator = None;
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn diffusion(&self) -> f64 {
        self.diffusion
    }

    pub fn boundaries(&self) -> (BoundaryCondition, BoundaryCondition) {
        (self.left, self.right)
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Initial profile `f(x, t)` sampled on the grid.
    pub fn initial_state(&self, t: f64) -> DVector<f64> {
        let mut out = DVector::zeros(self.grid.len());
        self.initial
            .evaluate(self.grid.points(), t, out.as_mut_slice());
        out
    }

    /// Adds `scale · q(x, t, u)` to `out`; no-op without a source term.
    pub(crate) fn add_source(&self, t: f64, u: &DVector<f64>, scale: f64, out: &mut DVector<f64>) {
        if let Some(source) = &self.source {
            let mut rate = DVector::zeros(u.len());
            source.evaluate(self.grid.points(), t, u.as_slice(), rate.as_mut_slice());
            out.axpy(scale, &rate, 1.0);
        }
    }
}

impl std::fmt::Debug for Bvp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bvp")
            .field("grid", &self.grid)
            .field("diffusion", &self.diffusion)
            .field("left", &self.left)
            .field("right", &self.right)
            .field("has_source", &self.source.is_some())
            .field("assembled", &self.operator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::make_grid;

    fn flat(_x: &[f64], _t: f64, out: &mut [f64]) {
        out.fill(0.0);
    }

    fn sample_bvp() -> Bvp {
        Bvp::new(
            make_grid(0.0, 1.0, 6).expect("valid grid"),
            1.0,
            BoundaryCondition::Dirichlet(0.0),
            BoundaryCondition::Dirichlet(1.0),
            flat,
        )
    }

    #[test]
    fn operator_is_unavailable_before_assembly() {
        let bvp = sample_bvp();
        assert_eq!(bvp.operator().expect_err("not assembled"), SolverError::NotAssembled);
    }

    #[test]
    fn configuration_changes_invalidate_operator() {
        let mut bvp = sample_bvp();
        bvp.assemble().expect("assembly");
        assert!(bvp.is_assembled());

        bvp.set_boundaries(BoundaryCondition::Neumann(0.0), BoundaryCondition::Dirichlet(1.0));
        assert!(bvp.operator().is_err());
        let op = bvp.assemble().expect("assembly");
        assert_eq!(op.matrix[(0, 1)], 2.0);

        bvp.set_diffusion(2.0);
        assert!(bvp.operator().is_err());
        bvp.assemble().expect("assembly");
        bvp.set_grid(make_grid(0.0, 2.0, 4).expect("valid grid"));
        assert!(bvp.operator().is_err());
        assert_eq!(bvp.assemble().expect("assembly").dimension(), 4);
    }

    #[test]
    fn assembly_errors_leave_problem_unassembled() {
        let mut bvp = sample_bvp();
        bvp.set_boundaries(BoundaryCondition::Periodic, BoundaryCondition::Neumann(0.0));
        assert!(matches!(bvp.assemble(), Err(SolverError::Configuration(_))));
        assert!(!bvp.is_assembled());
    }

    #[test]
    fn initial_state_samples_profile() {
        let bvp = Bvp::new(
            make_grid(0.0, 1.0, 3).expect("valid grid"),
            1.0,
            BoundaryCondition::Dirichlet(0.0),
            BoundaryCondition::Dirichlet(0.0),
            |x: &[f64], t: f64, out: &mut [f64]| {
                for (o, xi) in out.iter_mut().zip(x) {
                    *o = xi + t;
                }
            },
        );
        assert_eq!(bvp.initial_state(1.0).as_slice(), &[1.0, 1.5, 2.0]);
    }

    #[test]
    fn source_is_scaled_into_output() {
        let bvp = sample_bvp().with_source(|_x: &[f64], _t: f64, u: &[f64], out: &mut [f64]| {
            for (o, ui) in out.iter_mut().zip(u) {
                *o = 2.0 * ui;
            }
        });
        let u = DVector::from_element(6, 1.0);
        let mut out = DVector::from_element(6, 1.0);
        bvp.add_source(0.0, &u, 0.5, &mut out);
        assert!(out.iter().all(|&v| v == 2.0));
    }
}
