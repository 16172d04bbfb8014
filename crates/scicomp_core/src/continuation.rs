pub mod problem;
pub mod steady_state;
pub mod types;
pub mod util;

pub use problem::{ContinuationProblem, FnProblem};
pub use steady_state::SteadyStateProblem;
pub use types::{
    Branch, ContinuationMethod, ContinuationSettings, ContinuationState, StepPhase, Termination,
};

use anyhow::{bail, Result};
use log::{debug, info};
use nalgebra::{DMatrix, DVector};

use crate::linalg::solve_dense;
use util::{compute_eigenvalues, extended_jacobian, split_aug, to_aug};

struct Correction {
    aug: DVector<f64>,
    iterations: usize,
}

/// Predictor/corrector continuation of `R(u, p) = 0` as an explicit state machine.
///
/// Each call to [`advance`](ContinuationEngine::advance) performs one phase
/// transition; [`run`](ContinuationEngine::run) drives it to a [`Termination`].
/// Accepted points are appended to the branch and never revisited.
pub struct ContinuationEngine<P> {
    problem: P,
    settings: ContinuationSettings,
    branch: Branch,
    phase: StepPhase,
    step_size: f64,
    retries: usize,
    accepted: usize,
    /// Predicted `[p, u...]` together with the normal of the correction hyperplane.
    prediction: Option<(DVector<f64>, DVector<f64>)>,
    correction: Option<Correction>,
    stop_requested: bool,
}

impl<P: ContinuationProblem> ContinuationEngine<P> {
    /// Starts a new branch at `(initial_state, initial_param)`.
    ///
    /// The starting point is Newton-polished at fixed parameter first; the run
    /// is refused if that does not converge.
    pub fn new(
        mut problem: P,
        initial_state: &[f64],
        initial_param: f64,
        settings: ContinuationSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let dim = problem.dimension();
        if dim == 0 {
            bail!("Cannot continue a zero-dimensional problem");
        }
        if initial_state.len() != dim {
            bail!(
                "Initial state has dimension {}, expected {}",
                initial_state.len(),
                dim
            );
        }

        let guess = to_aug(initial_state, initial_param);
        let Some(polished) = correct(&mut problem, &guess, &param_normal(dim), &settings)? else {
            bail!(
                "Initial point is not a solution at p = {} and Newton did not converge",
                initial_param
            );
        };

        let (state, param) = split_aug(&polished.aug);
        let jacobian = problem.jacobian(&state, param)?;
        let tangent = initial_tangent(&mut problem, &state, param, &jacobian, settings.direction())?;
        let initial = ContinuationState {
            param,
            state: state.iter().copied().collect(),
            tangent_state: tangent.rows(1, dim).iter().copied().collect(),
            tangent_param: tangent[0],
            arclength: 0.0,
            iterations: polished.iterations,
            step_size: 0.0,
            fold: false,
            eigenvalues: compute_eigenvalues(&jacobian)?,
        };

        Ok(Self::from_parts(problem, Branch::new(initial), settings))
    }

    /// Continues an existing branch from its last point, along its last tangent.
    pub fn resume(problem: P, mut branch: Branch, settings: ContinuationSettings) -> Result<Self> {
        settings.validate()?;
        let Some(last) = branch.last() else {
            bail!("Cannot resume an empty branch");
        };
        let dim = problem.dimension();
        if last.state.len() != dim || last.tangent_state.len() != dim {
            bail!(
                "Branch dimension {} does not match problem dimension {}",
                last.state.len(),
                dim
            );
        }
        branch.set_termination(None);
        Ok(Self::from_parts(problem, branch, settings))
    }

    fn from_parts(problem: P, branch: Branch, settings: ContinuationSettings) -> Self {
        Self {
            problem,
            settings,
            branch,
            phase: StepPhase::Predicting,
            step_size: settings.step_size,
            retries: 0,
            accepted: 0,
            prediction: None,
            correction: None,
            stop_requested: false,
        }
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    pub fn branch(&self) -> &Branch {
        &self.branch
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn settings(&self) -> &ContinuationSettings {
        &self.settings
    }

    pub fn problem_mut(&mut self) -> &mut P {
        &mut self.problem
    }

    /// Ends the run at the next prediction. A correction in flight still completes.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    /// Performs one phase transition and returns the new phase.
    pub fn advance(&mut self) -> Result<StepPhase> {
        match self.phase {
            StepPhase::Finished(_) => {}
            StepPhase::Predicting => self.predict()?,
            StepPhase::Correcting => {
                let Some((prediction, normal)) = self.prediction.take() else {
                    bail!("Corrector entered without a prediction");
                };
                match correct(&mut self.problem, &prediction, &normal, &self.settings)? {
                    Some(correction) => {
                        self.correction = Some(correction);
                        self.phase = StepPhase::Accepted;
                    }
                    None => self.phase = StepPhase::Rejected,
                }
            }
            StepPhase::Accepted => self.accept()?,
            StepPhase::Rejected => self.reject(),
        }
        Ok(self.phase)
    }

    /// Advances until the run terminates.
    pub fn run(&mut self) -> Result<&Branch> {
        while !matches!(self.advance()?, StepPhase::Finished(_)) {}
        Ok(&self.branch)
    }

    pub fn into_branch(self) -> Branch {
        self.branch
    }

    fn predict(&mut self) -> Result<()> {
        let Some(last) = self.branch.last() else {
            bail!("Branch is empty");
        };
        if self.stop_requested {
            self.finish(Termination::Stopped);
            return Ok(());
        }
        if self.accepted >= self.settings.max_steps {
            self.finish(Termination::MaxSteps);
            return Ok(());
        }
        if let Some(limit) = self.settings.max_arclength {
            if last.arclength >= limit {
                self.finish(Termination::MaxArclength);
                return Ok(());
            }
        }

        let base = to_aug(&last.state, last.param);
        let h = self.step_size;
        let prediction = match self.settings.method {
            ContinuationMethod::NaturalParameter => {
                let direction = if last.tangent_param != 0.0 {
                    last.tangent_param.signum()
                } else {
                    self.settings.direction()
                };
                let mut predicted = base;
                predicted[0] += direction * h;
                (predicted, param_normal(last.state.len()))
            }
            ContinuationMethod::PseudoArclength => {
                let tangent = to_aug(&last.tangent_state, last.tangent_param);
                (base + &tangent * h, tangent)
            }
        };
        self.prediction = Some(prediction);
        self.phase = StepPhase::Correcting;
        Ok(())
    }

    fn accept(&mut self) -> Result<()> {
        let Some(correction) = self.correction.take() else {
            bail!("Accepted phase entered without a correction");
        };
        let Some(last) = self.branch.last() else {
            bail!("Branch is empty");
        };

        let previous = to_aug(&last.state, last.param);
        let secant = &correction.aug - &previous;
        let distance = secant.norm();
        if !(distance > 0.0) {
            // The corrector fell back onto the previous point.
            self.phase = StepPhase::Rejected;
            return Ok(());
        }
        let tangent = secant / distance;
        let fold = last.tangent_param * tangent[0] < 0.0;
        let arclength = last.arclength + distance;

        let (state, param) = split_aug(&correction.aug);
        let jacobian = self.problem.jacobian(&state, param)?;
        let point = ContinuationState {
            param,
            state: state.iter().copied().collect(),
            tangent_state: tangent.rows(1, state.len()).iter().copied().collect(),
            tangent_param: tangent[0],
            arclength,
            iterations: correction.iterations,
            step_size: self.step_size,
            fold,
            eigenvalues: compute_eigenvalues(&jacobian)?,
        };
        if fold {
            debug!(
                "Fold detected near p = {:.6} (point {})",
                param,
                self.branch.len()
            );
        }
        self.branch.push(point);
        self.accepted += 1;
        self.retries = 0;

        if correction.iterations <= self.settings.fast_convergence {
            self.step_size = (self.step_size * self.settings.growth_factor)
                .min(self.settings.max_step_size);
        }
        self.phase = StepPhase::Predicting;
        Ok(())
    }

    fn reject(&mut self) {
        self.branch.record_rejection();
        self.retries += 1;
        self.step_size *= 0.5;
        debug!(
            "Corrector rejected step (retry {}), step size now {:e}",
            self.retries, self.step_size
        );
        if self.retries > self.settings.max_retries {
            self.finish(Termination::RetriesExhausted);
        } else if self.step_size < self.settings.min_step_size {
            self.finish(Termination::MinStepSize);
        } else {
            self.phase = StepPhase::Predicting;
        }
    }

    fn finish(&mut self, termination: Termination) {
        self.phase = StepPhase::Finished(termination);
        self.branch.set_termination(Some(termination));
        info!(
            "Continuation finished with {:?} after {} points ({} rejections)",
            termination,
            self.branch.len(),
            self.branch.rejections()
        );
    }
}

/// Traces the branch through `(initial_state, initial_param)` until it terminates.
pub fn continue_branch<P: ContinuationProblem>(
    problem: P,
    initial_state: &[f64],
    initial_param: f64,
    settings: ContinuationSettings,
) -> Result<Branch> {
    let mut engine = ContinuationEngine::new(problem, initial_state, initial_param, settings)?;
    engine.run()?;
    Ok(engine.into_branch())
}

/// Appends further points to `branch`, continuing in its direction of travel.
pub fn extend_branch<P: ContinuationProblem>(
    problem: P,
    branch: Branch,
    settings: ContinuationSettings,
) -> Result<Branch> {
    let mut engine = ContinuationEngine::resume(problem, branch, settings)?;
    engine.run()?;
    Ok(engine.into_branch())
}

fn param_normal(dim: usize) -> DVector<f64> {
    let mut normal = DVector::zeros(dim + 1);
    normal[0] = 1.0;
    normal
}

/// Unit tangent `[Δp, Δu]` at a solution, pointing in `direction` of the parameter.
///
/// Solves `J_u·τ = -R_p` and uses `[1, τ]`; at a singular `J_u` (a fold) the
/// tangent is the null vector of `[R_p | J_u]`, i.e. the right singular vector
/// of its square padding with the smallest singular value.
fn initial_tangent<P: ContinuationProblem + ?Sized>(
    problem: &mut P,
    state: &DVector<f64>,
    param: f64,
    jacobian: &DMatrix<f64>,
    direction: f64,
) -> Result<DVector<f64>> {
    let r_p = problem.param_derivative(state, param)?;
    let mut tangent = match solve_dense(jacobian, &(-&r_p)) {
        Some(tau) => {
            let mut tangent = DVector::zeros(tau.len() + 1);
            tangent[0] = 1.0;
            tangent.rows_mut(1, tau.len()).copy_from(&tau);
            tangent
        }
        None => {
            let j_ext = extended_jacobian(problem, state, param)?;
            let dim = j_ext.nrows();
            let mut padded = DMatrix::zeros(dim + 1, dim + 1);
            padded.view_mut((0, 0), (dim, dim + 1)).copy_from(&j_ext);
            let svd = padded.svd(false, true);
            let Some(v_t) = svd.v_t else {
                bail!("Failed to compute initial tangent: SVD without right singular vectors");
            };
            let Some((weakest, _)) = svd
                .singular_values
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))
            else {
                bail!("Failed to compute initial tangent: empty SVD");
            };
            let tangent = v_t.row(weakest).transpose();
            if tangent[0] < 0.0 {
                -tangent
            } else {
                tangent
            }
        }
    };
    let norm = tangent.norm();
    if !(norm > 0.0) || !norm.is_finite() {
        bail!("Failed to compute initial tangent");
    }
    tangent /= norm;
    Ok(tangent * direction)
}

/// Newton on `R(u, p) = 0` bordered by `n·(x - prediction) = 0`.
///
/// `None` means the corrector failed (iteration cap, singular system or
/// non-finite values); errors from the problem itself propagate.
fn correct<P: ContinuationProblem + ?Sized>(
    problem: &mut P,
    prediction: &DVector<f64>,
    normal: &DVector<f64>,
    settings: &ContinuationSettings,
) -> Result<Option<Correction>> {
    let dim = problem.dimension();
    let tolerance = settings.corrector_tolerance;
    let mut aug = prediction.clone();

    for iteration in 0..=settings.corrector_steps {
        let (state, param) = split_aug(&aug);
        let residual = problem.evaluate(&state, param)?;
        let constraint = normal.dot(&(&aug - prediction));
        if residual.iter().any(|v| !v.is_finite()) || !constraint.is_finite() {
            return Ok(None);
        }
        if residual.norm() < tolerance && constraint.abs() < tolerance {
            return Ok(Some(Correction {
                aug,
                iterations: iteration,
            }));
        }
        if iteration == settings.corrector_steps {
            break;
        }

        let j_ext = extended_jacobian(problem, &state, param)?;
        let mut system = DMatrix::zeros(dim + 1, dim + 1);
        system.view_mut((0, 0), (dim, dim + 1)).copy_from(&j_ext);
        system.set_row(dim, &normal.transpose());
        let mut rhs = DVector::zeros(dim + 1);
        rhs.rows_mut(0, dim).copy_from(&(-residual));
        rhs[dim] = -constraint;

        let Some(delta) = solve_dense(&system, &rhs) else {
            return Ok(None);
        };
        aug += delta;
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parabola() -> FnProblem<impl FnMut(&DVector<f64>, f64) -> DVector<f64>> {
        // p = u², folding at the origin.
        FnProblem::new(1, |u: &DVector<f64>, p: f64| {
            DVector::from_vec(vec![p - u[0] * u[0]])
        })
    }

    fn fold_settings(method: ContinuationMethod) -> ContinuationSettings {
        ContinuationSettings {
            method,
            step_size: 0.1,
            min_step_size: 1e-6,
            max_step_size: 0.5,
            max_steps: 40,
            forward: false,
            ..ContinuationSettings::default()
        }
    }

    #[test]
    fn pseudo_arclength_passes_fold() {
        let branch = continue_branch(
            parabola(),
            &[1.0],
            1.0,
            fold_settings(ContinuationMethod::PseudoArclength),
        )
        .expect("continuation should run");

        assert_eq!(branch.folds().len(), 1, "params {:?}", branch.params());
        assert!(branch.states().iter().any(|s| s.state[0] < -0.5));
        for s in branch.states() {
            assert!((s.param - s.state[0] * s.state[0]).abs() < 1e-8);
            assert_eq!(s.eigenvalues.len(), 1);
            assert!((s.eigenvalues[0].re + 2.0 * s.state[0]).abs() < 1e-5);
        }
        for pair in branch.states().windows(2) {
            assert!(pair[1].arclength > pair[0].arclength);
            assert!(pair[1].state[0] < pair[0].state[0]);
        }
        assert_eq!(branch.termination(), Some(Termination::MaxSteps));
    }

    #[test]
    fn natural_parameter_stalls_at_fold() {
        let branch = continue_branch(
            parabola(),
            &[1.0],
            1.0,
            fold_settings(ContinuationMethod::NaturalParameter),
        )
        .expect("continuation should run");

        assert!(branch.folds().is_empty());
        assert!(branch.len() > 3);
        assert!(branch.rejections() > 0);
        for s in branch.states() {
            assert!(s.param >= -1e-9, "param {} beyond fold", s.param);
            assert!(s.state[0] > 0.0);
        }
        assert!(branch.termination().is_some());
    }

    #[test]
    fn step_control_grows_caps_halves_and_exhausts_retries() {
        let settings = ContinuationSettings {
            max_retries: 3,
            min_step_size: 1e-12,
            max_steps: 500,
            ..fold_settings(ContinuationMethod::NaturalParameter)
        };
        let mut engine =
            ContinuationEngine::new(parabola(), &[1.0], 1.0, settings).expect("engine");
        engine.run().expect("run");
        let branch = engine.branch();
        assert_eq!(branch.termination(), Some(Termination::RetriesExhausted));

        // Step that the engine would try after `state` before any rejection.
        let next_trial = |state: &ContinuationState| {
            if state.iterations <= settings.fast_convergence {
                (state.step_size * settings.growth_factor).min(settings.max_step_size)
            } else {
                state.step_size
            }
        };

        let states = branch.states();
        assert_eq!(states[1].step_size, settings.step_size);
        let mut halvings = 0usize;
        let mut grew = false;
        for pair in states[1..].windows(2) {
            let trial = next_trial(&pair[0]);
            let used = pair[1].step_size;
            assert!(used <= settings.max_step_size);
            let ratio = (trial / used).log2();
            assert!(
                ratio >= -1e-9 && (ratio - ratio.round()).abs() < 1e-9,
                "step {used} is not {trial} halved a whole number of times"
            );
            halvings += ratio.round() as usize;
            grew |= used > pair[0].step_size;
        }
        assert!(grew, "no step was ever enlarged");

        // The final streak of rejections is one more than the retry limit.
        let final_streak = settings.max_retries + 1;
        assert_eq!(branch.rejections(), halvings + final_streak);
        let last = branch.last().expect("points");
        let expected = next_trial(last) / 2f64.powi(final_streak as i32);
        assert!((engine.step_size() - expected).abs() <= 1e-15 * expected);
    }

    #[test]
    fn growth_is_capped_at_max_step_size() {
        let settings = ContinuationSettings {
            method: ContinuationMethod::NaturalParameter,
            step_size: 0.1,
            max_step_size: 0.2,
            max_steps: 6,
            ..ContinuationSettings::default()
        };
        // Linear residual: Newton converges in one iteration, so every step grows.
        let problem = FnProblem::new(1, |u: &DVector<f64>, p: f64| {
            DVector::from_vec(vec![u[0] - 2.0 * p])
        });
        let branch = continue_branch(problem, &[0.0], 0.0, settings).expect("run");
        let steps: Vec<f64> = branch.states()[1..].iter().map(|s| s.step_size).collect();
        assert_eq!(steps.len(), 6);
        assert_eq!(steps[0], 0.1);
        assert!((steps[1] - 0.15).abs() < 1e-15);
        for step in &steps[2..] {
            assert_eq!(*step, 0.2);
        }
        assert_eq!(branch.rejections(), 0);
    }

    #[test]
    fn initial_point_is_polished() {
        let settings = ContinuationSettings {
            max_steps: 1,
            ..ContinuationSettings::default()
        };
        let engine = ContinuationEngine::new(parabola(), &[1.1], 1.0, settings).expect("engine");
        let first = &engine.branch().states()[0];
        assert!((first.state[0] - 1.0).abs() < 1e-9);
        assert!((first.param - 1.0).abs() < 1e-12);
        // Forward means increasing p.
        assert!(first.tangent_param > 0.0);
    }

    #[test]
    fn start_at_fold_uses_null_vector_tangent() {
        // J_u = -2u vanishes at the origin, so [1, τ] is unavailable.
        let problem = parabola().with_jacobian(|u: &DVector<f64>, _p: f64| {
            DMatrix::from_element(1, 1, -2.0 * u[0])
        });
        let engine = ContinuationEngine::new(problem, &[0.0], 0.0, ContinuationSettings::default())
            .expect("engine");
        let first = &engine.branch().states()[0];
        assert!(first.tangent_param.abs() < 1e-6, "Δp {}", first.tangent_param);
        assert!((first.tangent_state[0].abs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unsolvable_start_is_refused() {
        // p - u² = 0 has no real solution at p = -1.
        let result = ContinuationEngine::new(parabola(), &[0.5], -1.0, ContinuationSettings::default());
        assert!(result.is_err());
    }

    #[test]
    fn advance_walks_through_phases_and_honours_stop() {
        let mut engine = ContinuationEngine::new(
            parabola(),
            &[1.0],
            1.0,
            ContinuationSettings::default(),
        )
        .expect("engine");
        assert_eq!(engine.phase(), StepPhase::Predicting);
        assert_eq!(engine.advance().expect("predict"), StepPhase::Correcting);
        assert_eq!(engine.advance().expect("correct"), StepPhase::Accepted);
        assert_eq!(engine.advance().expect("accept"), StepPhase::Predicting);
        assert_eq!(engine.branch().len(), 2);

        engine.request_stop();
        assert_eq!(
            engine.advance().expect("stop"),
            StepPhase::Finished(Termination::Stopped)
        );
        assert_eq!(
            engine.advance().expect("finished is terminal"),
            StepPhase::Finished(Termination::Stopped)
        );
        assert_eq!(engine.branch().len(), 2);
        assert_eq!(engine.branch().termination(), Some(Termination::Stopped));
    }

    #[test]
    fn max_arclength_terminates() {
        let settings = ContinuationSettings {
            max_arclength: Some(0.3),
            ..ContinuationSettings::default()
        };
        let branch = continue_branch(parabola(), &[1.0], 1.0, settings).expect("run");
        assert_eq!(branch.termination(), Some(Termination::MaxArclength));
        let last = branch.last().expect("points");
        assert!(last.arclength >= 0.3);
        assert!(branch.states()[branch.len() - 2].arclength < 0.3);
    }

    #[test]
    fn resumed_branch_keeps_direction() {
        let settings = ContinuationSettings {
            max_steps: 5,
            ..ContinuationSettings::default()
        };
        let branch = continue_branch(parabola(), &[1.0], 1.0, settings).expect("first leg");
        assert_eq!(branch.len(), 6);
        let end = branch.last().expect("points").param;

        let extended = extend_branch(parabola(), branch, settings).expect("second leg");
        assert_eq!(extended.len(), 11);
        assert_eq!(extended.termination(), Some(Termination::MaxSteps));
        assert!(extended.params()[6] > end);
        for pair in extended.states().windows(2) {
            assert!(pair[1].param > pair[0].param);
            assert!(pair[1].arclength > pair[0].arclength);
        }
    }
}
