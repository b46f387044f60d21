use log::{debug, warn};
use rand::Rng;

use crate::{
    adapt::AdaptPhase,
    integrator::LeapfrogIntegrator,
    model::Model,
    nuts::NutsError,
    potential::Potential,
    state::LeapfrogState,
};

const STARTING_STEP_SIZE: f64 = 1.;
const MAX_STEP_SIZE_SEARCH: usize = 100;

/// Settings for step size adaptation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DualAverageOptions {
    pub k: f64,
    pub t0: f64,
    pub gamma: f64,
}

impl Default for DualAverageOptions {
    fn default() -> DualAverageOptions {
        DualAverageOptions {
            k: 0.75,
            t0: 10.,
            gamma: 0.05,
        }
    }
}

/// Nesterov dual averaging of the log step size.
#[derive(Debug, Clone)]
pub struct DualAverage {
    log_step: f64,
    log_step_adapted: f64,
    hbar: f64,
    mu: f64,
    count: u64,
    settings: DualAverageOptions,
}

impl DualAverage {
    pub fn new(settings: DualAverageOptions, initial_step: f64) -> DualAverage {
        DualAverage {
            log_step: initial_step.ln(),
            log_step_adapted: initial_step.ln(),
            hbar: 0.,
            mu: (10. * initial_step).ln(),
            count: 1,
            settings,
        }
    }

    pub fn advance(&mut self, accept_stat: f64, target: f64) {
        let count = self.count as f64;
        let w = 1. / (count + self.settings.t0);
        self.hbar = (1. - w) * self.hbar + w * (target - accept_stat);
        self.log_step = self.mu - self.hbar * count.sqrt() / self.settings.gamma;
        let mk = count.powf(-self.settings.k);
        self.log_step_adapted = mk * self.log_step + (1. - mk) * self.log_step_adapted;
        self.count += 1;
    }

    pub fn current_step_size(&self) -> f64 {
        self.log_step.exp()
    }

    pub fn current_step_size_adapted(&self) -> f64 {
        self.log_step_adapted.exp()
    }
}

/// What the step size controller needs to know about a finished trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeStats {
    pub delta_likelihood_sum: f64,
    pub tree_size: u64,
}

impl TreeStats {
    /// Mean acceptance probability over all leapfrog steps of the tree.
    pub fn mean_tree_accept(&self) -> f64 {
        self.delta_likelihood_sum / self.tree_size as f64
    }
}

/// Tunes the step size towards a target acceptance rate during warm-up and
/// freezes it afterwards.
#[derive(Debug, Clone)]
pub struct StepSizeController {
    dual: DualAverage,
    target_accept: f64,
    step_size: f64,
    mean_tree_accept: f64,
}

impl StepSizeController {
    pub fn new(options: DualAverageOptions, initial_step: f64, target_accept: f64) -> Self {
        Self {
            dual: DualAverage::new(options, initial_step),
            target_accept,
            step_size: initial_step,
            mean_tree_accept: 0.,
        }
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Acceptance statistic of the last tree seen during warm-up.
    pub fn mean_tree_accept(&self) -> f64 {
        self.mean_tree_accept
    }

    /// Feed the tree of the draw `phase` describes into the dual averaging.
    ///
    /// The last warm-up draw installs the averaged step size, so every draw
    /// after warm-up is integrated with the same step size.
    pub fn adapt(&mut self, stats: &TreeStats, phase: &AdaptPhase) {
        if !phase.is_tuning() {
            self.step_size = self.dual.current_step_size_adapted();
            return;
        }
        self.mean_tree_accept = stats.mean_tree_accept();
        self.dual.advance(self.mean_tree_accept, self.target_accept);
        self.step_size = if phase.is_last_tuning_draw() {
            self.dual.current_step_size_adapted()
        } else {
            self.dual.current_step_size()
        };
    }
}

/// Find a step size for which one leapfrog step changes the joint density by
/// about a factor of two.
///
/// Starts from a step size of one and doubles or halves it until the change
/// crosses `ln 2`.
pub fn find_starting_step_size<M, P, R>(
    model: &mut M,
    potential: &P,
    position: &[f64],
    gradient: &[f64],
    log_prob: f64,
    rng: &mut R,
) -> Result<f64, NutsError>
where
    M: Model,
    P: Potential,
    R: Rng + ?Sized,
{
    let mut momentum = vec![0f64; position.len()];
    potential.random_momentum(rng, &mut momentum);
    let start = LeapfrogState::new(
        potential,
        position.into(),
        momentum.into(),
        gradient.into(),
        log_prob,
    );
    let initial = start.joint_log_density();

    let mut step_size = STARTING_STEP_SIZE;
    let log_ratio = |model: &mut M, step_size: f64| -> Result<f64, NutsError> {
        let next = LeapfrogIntegrator::step(model, potential, &start, step_size)?;
        Ok(next.joint_log_density() - initial)
    };

    let mut ratio = log_ratio(model, step_size)?;
    let scale = if ratio > 0.5f64.ln() { 1. } else { -1. };
    let ln2 = 2f64.ln();

    let mut iterations = 0;
    while scale * ratio > -scale * ln2 {
        if iterations == MAX_STEP_SIZE_SEARCH {
            warn!(
                "Step size search did not converge after {} iterations, using {}",
                MAX_STEP_SIZE_SEARCH, step_size
            );
            break;
        }
        step_size *= 2f64.powf(scale);
        ratio = log_ratio(model, step_size)?;
        iterations += 1;
    }

    debug!("Starting step size {}", step_size);
    Ok(step_size)
}
