//! Core types for continuation runs.
//!
//! Settings, the per-point record, the append-only branch and the phases of
//! the predictor/corrector state machine.

use anyhow::{bail, Result};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Predictor/corrector flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContinuationMethod {
    /// Step the parameter, Newton-correct the state at fixed parameter.
    NaturalParameter,
    /// Step along the branch tangent, correct on the arclength hyperplane.
    PseudoArclength,
}

/// Settings controlling the continuation run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContinuationSettings {
    pub method: ContinuationMethod,
    pub step_size: f64,
    pub min_step_size: f64,
    pub max_step_size: f64,
    /// Accepted points to add before stopping.
    pub max_steps: usize,
    /// Stop once the branch is at least this long (in (u, p) arclength).
    pub max_arclength: Option<f64>,
    pub corrector_steps: usize,
    pub corrector_tolerance: f64,
    /// Growth applied to the step after a quickly converged correction.
    pub growth_factor: f64,
    /// Corrector iteration count at or below which the step may grow.
    pub fast_convergence: usize,
    /// Consecutive rejections tolerated before the branch is closed.
    pub max_retries: usize,
    /// Initial direction of travel in the parameter.
    pub forward: bool,
}

impl Default for ContinuationSettings {
    fn default() -> Self {
        Self {
            method: ContinuationMethod::PseudoArclength,
            step_size: 0.05,
            min_step_size: 1e-6,
            max_step_size: 0.5,
            max_steps: 100,
            max_arclength: None,
            corrector_steps: 10,
            corrector_tolerance: 1e-9,
            growth_factor: 1.5,
            fast_convergence: 3,
            max_retries: 8,
            forward: true,
        }
    }
}

impl ContinuationSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_step_size > 0.0) {
            bail!("min_step_size must be positive.");
        }
        if !(self.min_step_size <= self.step_size && self.step_size <= self.max_step_size) {
            bail!(
                "step_size {} must lie within [{}, {}].",
                self.step_size,
                self.min_step_size,
                self.max_step_size
            );
        }
        if self.corrector_steps == 0 {
            bail!("corrector_steps must be greater than zero.");
        }
        if !(self.corrector_tolerance > 0.0) {
            bail!("corrector_tolerance must be positive.");
        }
        if !(self.growth_factor >= 1.0) {
            bail!("growth_factor must be at least 1.");
        }
        if let Some(limit) = self.max_arclength {
            if !(limit > 0.0) {
                bail!("max_arclength must be positive.");
            }
        }
        Ok(())
    }

    pub(crate) fn direction(&self) -> f64 {
        if self.forward {
            1.0
        } else {
            -1.0
        }
    }
}

/// A single accepted point on a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationState {
    pub param: f64,
    pub state: Vec<f64>,
    /// State part of the unit tangent (Δu).
    pub tangent_state: Vec<f64>,
    /// Parameter part of the unit tangent (Δp).
    pub tangent_param: f64,
    /// Accumulated (u, p) distance from the first point.
    pub arclength: f64,
    /// Corrector iterations spent on this point.
    pub iterations: usize,
    /// Step size that produced this point (0 for the initial point).
    pub step_size: f64,
    /// Δp changed sign between the previous point and this one.
    pub fold: bool,
    /// Eigenvalues of ∂R/∂u at this point.
    #[serde(default)]
    pub eigenvalues: Vec<Complex<f64>>,
}

impl ContinuationState {
    /// Largest real part among the eigenvalues, if any were computed.
    pub fn spectral_abscissa(&self) -> Option<f64> {
        self.eigenvalues.iter().map(|e| e.re).reduce(f64::max)
    }
}

/// Why a run stopped. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    MaxSteps,
    MaxArclength,
    RetriesExhausted,
    MinStepSize,
    Stopped,
}

/// Phase of the predictor/corrector state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepPhase {
    Predicting,
    Correcting,
    Accepted,
    Rejected,
    Finished(Termination),
}

/// Ordered, append-only sequence of accepted continuation states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    states: Vec<ContinuationState>,
    termination: Option<Termination>,
    rejections: usize,
}

impl Branch {
    pub(crate) fn new(initial: ContinuationState) -> Self {
        Self {
            states: vec![initial],
            termination: None,
            rejections: 0,
        }
    }

    pub(crate) fn push(&mut self, state: ContinuationState) {
        self.states.push(state);
    }

    pub(crate) fn record_rejection(&mut self) {
        self.rejections += 1;
    }

    pub(crate) fn set_termination(&mut self, termination: Option<Termination>) {
        self.termination = termination;
    }

    pub fn states(&self) -> &[ContinuationState] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn last(&self) -> Option<&ContinuationState> {
        self.states.last()
    }

    /// How the run that produced this branch ended, `None` while it is running.
    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    /// Total corrector failures over the branch's lifetime.
    pub fn rejections(&self) -> usize {
        self.rejections
    }

    /// Indices of states flagged as folds.
    pub fn folds(&self) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.fold)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn params(&self) -> Vec<f64> {
        self.states.iter().map(|s| s.param).collect()
    }
}
