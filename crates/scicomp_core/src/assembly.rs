//! Finite-difference assembly of the diffusion operator.
//!
//! The assembled pair `(A, b)` is scaled so that `A·u + b ≈ Δx²·∂²u/∂x²` on the
//! grid. The diffusion coefficient enters through the diffusion number
//! `C = D·Δt/Δx²`, so the semi-discrete system reads `du/dt = (C/Δt)(A·u + b) + q`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};
use crate::grid::{BoundaryCondition, Grid};

/// Node whose value is fixed after every update instead of being evolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NodeConstraint {
    /// The node holds a prescribed boundary value.
    Pinned { index: usize, value: f64 },
    /// The node duplicates another node (periodic wrap of the last node).
    Mirror { index: usize, source: usize },
}

/// Assembled diffusion operator for a fixed grid, coefficient and boundary pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub matrix: DMatrix<f64>,
    pub forcing: DVector<f64>,
    pub diffusion: f64,
    pub dx: f64,
    pub constraints: Vec<NodeConstraint>,
}

impl Operator {
    pub fn dimension(&self) -> usize {
        self.forcing.len()
    }

    /// Diffusion (Courant) number `C = D·Δt/Δx²` for a step of length `dt`.
    pub fn diffusion_number(&self, dt: f64) -> f64 {
        self.diffusion * dt / (self.dx * self.dx)
    }

    /// Factor `D/Δx²` turning `A·u + b` into a time derivative.
    pub fn rate_scale(&self) -> f64 {
        self.diffusion / (self.dx * self.dx)
    }

    /// `A·u + b`.
    pub fn apply(&self, u: &DVector<f64>) -> DVector<f64> {
        &self.matrix * u + &self.forcing
    }

    /// Overwrites constrained nodes with their boundary values.
    pub fn enforce_constraints(&self, u: &mut [f64]) {
        for constraint in &self.constraints {
            match *constraint {
                NodeConstraint::Pinned { index, value } => u[index] = value,
                NodeConstraint::Mirror { index, source } => u[index] = u[source],
            }
        }
    }

    pub fn is_constrained(&self, index: usize) -> bool {
        self.constraints.iter().any(|c| match *c {
            NodeConstraint::Pinned { index: i, .. } | NodeConstraint::Mirror { index: i, .. } => {
                i == index
            }
        })
    }
}

/// Builds `(A, b)` for `D·∂²/∂x²` on `grid` with the given boundary pair.
pub fn assemble(
    grid: &Grid,
    diffusion: f64,
    left: BoundaryCondition,
    right: BoundaryCondition,
) -> SolverResult<Operator> {
    if !diffusion.is_finite() || diffusion < 0.0 {
        return Err(SolverError::Configuration(format!(
            "diffusion coefficient must be finite and non-negative, got {diffusion}"
        )));
    }
    left.validate("left")?;
    right.validate("right")?;

    let n = grid.len();
    let dx = grid.dx();
    let mut matrix = DMatrix::<f64>::zeros(n, n);
    let mut forcing = DVector::<f64>::zeros(n);
    let mut constraints = Vec::new();

    match (left.is_periodic(), right.is_periodic()) {
        (true, true) => {
            if n < 3 {
                return Err(SolverError::Configuration(format!(
                    "periodic boundaries need at least 3 nodes, got {n}"
                )));
            }
            // Node n-1 coincides with node 0; its ghost neighbour is node 1.
            for i in 0..n {
                let west = if i == 0 { n - 2 } else { i - 1 };
                let east = if i == n - 1 { 1 } else { i + 1 };
                matrix[(i, i)] -= 2.0;
                matrix[(i, west)] += 1.0;
                matrix[(i, east)] += 1.0;
            }
            constraints.push(NodeConstraint::Mirror {
                index: n - 1,
                source: 0,
            });
            return Ok(Operator {
                matrix,
                forcing,
                diffusion,
                dx,
                constraints,
            });
        }
        (false, false) => {}
        _ => {
            return Err(SolverError::Configuration(format!(
                "periodic boundaries must be used on both sides (left: {left:?}, right: {right:?})"
            )));
        }
    }

    for i in 1..n - 1 {
        matrix[(i, i - 1)] = 1.0;
        matrix[(i, i)] = -2.0;
        matrix[(i, i + 1)] = 1.0;
    }

    apply_boundary(&mut matrix, &mut forcing, &mut constraints, left, 0, 1, -1.0, dx);
    apply_boundary(&mut matrix, &mut forcing, &mut constraints, right, n - 1, n - 2, 1.0, dx);

    // Pinned values enter b rather than coupling other rows to the boundary node.
    for constraint in &constraints {
        if let NodeConstraint::Pinned { index, value } = *constraint {
            for row in 0..n {
                if row != index && matrix[(row, index)] != 0.0 {
                    forcing[row] += matrix[(row, index)] * value;
                    matrix[(row, index)] = 0.0;
                }
            }
        }
    }

    Ok(Operator {
        matrix,
        forcing,
        diffusion,
        dx,
        constraints,
    })
}

/// Fills row `node` for a non-periodic condition.
///
/// `outward` is -1 at the left end and +1 at the right end; the ghost node
/// beyond the boundary is `u[inner] + outward·2Δx·du/dx`.
#[allow(clippy::too_many_arguments)]
fn apply_boundary(
    matrix: &mut DMatrix<f64>,
    forcing: &mut DVector<f64>,
    constraints: &mut Vec<NodeConstraint>,
    condition: BoundaryCondition,
    node: usize,
    inner: usize,
    outward: f64,
    dx: f64,
) {
    if let Some(value) = condition.pinned_value() {
        matrix.row_mut(node).fill(0.0);
        forcing[node] = 0.0;
        constraints.push(NodeConstraint::Pinned { index: node, value });
        return;
    }

    // Neumann is Robin with alpha = 0, beta = 1.
    let (alpha, beta, gamma) = match condition {
        BoundaryCondition::Neumann(flux) => (0.0, 1.0, flux),
        BoundaryCondition::Robin { alpha, beta, gamma } => (alpha, beta, gamma),
        BoundaryCondition::Dirichlet(_) | BoundaryCondition::Periodic => return,
    };

    // du/dx = (gamma - alpha*u)/beta at the boundary node.
    matrix.row_mut(node).fill(0.0);
    matrix[(node, node)] = -2.0 - outward * 2.0 * dx * alpha / beta;
    matrix[(node, inner)] = 2.0;
    forcing[node] = outward * 2.0 * dx * gamma / beta;
}
