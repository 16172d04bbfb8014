use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

use super::problem::ContinuationProblem;
use crate::assembly::{NodeConstraint, Operator};
use crate::bvp::Bvp;
use crate::error::SolverResult;

type ParamSource = Box<dyn Fn(&[f64], &[f64], f64, &mut [f64])>;

/// Steady states `0 = D·u_xx + q(x, u, p)` of an assembled reaction-diffusion problem.
///
/// Interior rows carry `(D/Δx²)(A·u + b) + q`; rows of pinned boundary nodes
/// become `value - u_i` and the periodic duplicate node becomes `u_source - u_i`,
/// so the residual is square in the full grid vector and constrained nodes
/// contribute a stable eigenvalue of -1.
pub struct SteadyStateProblem {
    operator: Operator,
    points: Vec<f64>,
    source: ParamSource,
}

impl SteadyStateProblem {
    /// Captures the operator of `bvp`, which must already be assembled.
    ///
    /// `source(x, u, p, out)` writes the parametrized reaction term.
    pub fn new(
        bvp: &Bvp,
        source: impl Fn(&[f64], &[f64], f64, &mut [f64]) + 'static,
    ) -> SolverResult<Self> {
        let operator = bvp.operator()?.clone();
        Ok(Self {
            operator,
            points: bvp.grid().points().to_vec(),
            source: Box::new(source),
        })
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }
}

impl ContinuationProblem for SteadyStateProblem {
    fn dimension(&self) -> usize {
        self.operator.dimension()
    }

    fn residual(&mut self, state: &DVector<f64>, param: f64, out: &mut DVector<f64>) -> Result<()> {
        let n = self.dimension();
        if state.len() != n || out.len() != n {
            bail!(
                "Steady-state residual expects vectors of length {}, got {} and {}",
                n,
                state.len(),
                out.len()
            );
        }

        (self.source)(&self.points, state.as_slice(), param, out.as_mut_slice());
        out.axpy(self.operator.rate_scale(), &self.operator.apply(state), 1.0);

        for constraint in &self.operator.constraints {
            match *constraint {
                NodeConstraint::Pinned { index, value } => out[index] = value - state[index],
                NodeConstraint::Mirror { index, source } => {
                    out[index] = state[source] - state[index]
                }
            }
        }
        Ok(())
    }

    /// Diffusion part is exact; only the reaction term is differenced.
    fn jacobian(&mut self, state: &DVector<f64>, param: f64) -> Result<DMatrix<f64>> {
        let n = self.dimension();
        let mut jac = self.operator.matrix.scale(self.operator.rate_scale());

        let mut base = DVector::zeros(n);
        (self.source)(&self.points, state.as_slice(), param, base.as_mut_slice());
        let mut perturbed = state.clone();
        let mut shifted = DVector::zeros(n);
        for j in 0..n {
            let step = f64::EPSILON.sqrt() * (1.0 + state[j].abs());
            perturbed[j] = state[j] + step;
            (self.source)(&self.points, perturbed.as_slice(), param, shifted.as_mut_slice());
            for i in 0..n {
                jac[(i, j)] += (shifted[i] - base[i]) / step;
            }
            perturbed[j] = state[j];
        }

        for constraint in &self.operator.constraints {
            match *constraint {
                NodeConstraint::Pinned { index, .. } => {
                    jac.row_mut(index).fill(0.0);
                    jac[(index, index)] = -1.0;
                }
                NodeConstraint::Mirror { index, source } => {
                    jac.row_mut(index).fill(0.0);
                    jac[(index, index)] = -1.0;
                    jac[(index, source)] = 1.0;
                }
            }
        }
        Ok(jac)
    }
}

impl std::fmt::Debug for SteadyStateProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteadyStateProblem")
            .field("dimension", &self.operator.dimension())
            .field("constraints", &self.operator.constraints)
            .finish()
    }
}
