use crate::error::{SolverError, SolverResult};
use serde::{Deserialize, Serialize};

/// Uniform one-dimensional grid of `N` nodes spanning `[a, b]`.
///
/// Serialized as its [`GridSpec`]; deserialization goes through [`Grid::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridSpec", into = "GridSpec")]
pub struct Grid {
    a: f64,
    b: f64,
    points: Vec<f64>,
}

impl Grid {
    pub fn new(a: f64, b: f64, n: usize) -> SolverResult<Self> {
        if n < 2 {
            return Err(SolverError::InvalidDomain(format!(
                "grid needs at least 2 nodes, got {n}"
            )));
        }
        if !a.is_finite() || !b.is_finite() {
            return Err(SolverError::InvalidDomain(format!(
                "grid bounds must be finite, got [{a}, {b}]"
            )));
        }
        if b <= a {
            return Err(SolverError::InvalidDomain(format!(
                "right bound {b} must exceed left bound {a}"
            )));
        }

        let dx = (b - a) / (n - 1) as f64;
        let mut points: Vec<f64> = (0..n).map(|i| a + i as f64 * dx).collect();
        // Pin the last node exactly to b.
        points[n - 1] = b;

        Ok(Self { a, b, points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dx(&self) -> f64 {
        (self.b - self.a) / (self.points.len() - 1) as f64
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.a, self.b)
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }
}

/// Serialized form of a [`Grid`]: bounds and node count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub a: f64,
    pub b: f64,
    pub n: usize,
}

impl TryFrom<GridSpec> for Grid {
    type Error = SolverError;

    fn try_from(spec: GridSpec) -> SolverResult<Self> {
        Grid::new(spec.a, spec.b, spec.n)
    }
}

impl From<Grid> for GridSpec {
    fn from(grid: Grid) -> Self {
        Self {
            a: grid.a,
            b: grid.b,
            n: grid.points.len(),
        }
    }
}

/// Builds the uniform grid on `[a, b]` with `n` nodes.
pub fn make_grid(a: f64, b: f64, n: usize) -> SolverResult<Grid> {
    Grid::new(a, b, n)
}

/// Boundary condition attached to one end of the grid.
///
/// Derivatives are taken along +x at both ends, so `Neumann(flux)` means
/// `du/dx = flux` at the node in question.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BoundaryCondition {
    Dirichlet(f64),
    Neumann(f64),
    /// `alpha * u + beta * du/dx = gamma`.
    Robin { alpha: f64, beta: f64, gamma: f64 },
    Periodic,
}

impl BoundaryCondition {
    /// Value the boundary node is held at, if the condition fixes it.
    pub fn pinned_value(&self) -> Option<f64> {
        match *self {
            BoundaryCondition::Dirichlet(value) => Some(value),
            BoundaryCondition::Robin { alpha, beta, gamma } if beta == 0.0 && alpha != 0.0 => {
                Some(gamma / alpha)
            }
            _ => None,
        }
    }

    pub fn is_periodic(&self) -> bool {
        matches!(self, BoundaryCondition::Periodic)
    }

    pub(crate) fn validate(&self, side: &str) -> SolverResult<()> {
        let finite = match *self {
            BoundaryCondition::Dirichlet(v) | BoundaryCondition::Neumann(v) => v.is_finite(),
            BoundaryCondition::Robin { alpha, beta, gamma } => {
                if alpha == 0.0 && beta == 0.0 {
                    return Err(SolverError::Configuration(format!(
                        "{side} Robin condition has both coefficients zero"
                    )));
                }
                alpha.is_finite() && beta.is_finite() && gamma.is_finite()
            }
            BoundaryCondition::Periodic => true,
        };
        if !finite {
            return Err(SolverError::Configuration(format!(
                "{side} boundary condition has non-finite data: {self:?}"
            )));
        }
        Ok(())
    }
}
