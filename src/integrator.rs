use rand::distr::{Distribution, StandardUniform};

use crate::{
    math::axpy_out,
    model::Model,
    nuts::NutsError,
    potential::Potential,
    state::LeapfrogState,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.,
            Direction::Backward => -1.,
        }
    }
}

impl Distribution<Direction> for StandardUniform {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Direction {
        if rng.random::<bool>() {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

/// The velocity Verlet scheme: half momentum step, full position step,
/// half momentum step.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeapfrogIntegrator;

impl LeapfrogIntegrator {
    /// Integrate one step of size `dt`. A negative `dt` integrates backwards in time.
    ///
    /// Evaluates the model exactly once.
    pub fn step<M: Model, P: Potential>(
        model: &mut M,
        potential: &P,
        state: &LeapfrogState,
        dt: f64,
    ) -> Result<LeapfrogState, NutsError> {
        let dim = state.position.len();
        let half = dt / 2.;

        let mut momentum_half = vec![0f64; dim];
        axpy_out(&state.gradient, &state.momentum, half, &mut momentum_half);

        let mut velocity_half = vec![0f64; dim];
        potential.update_velocity(&momentum_half, &mut velocity_half);

        let mut position = vec![0f64; dim];
        axpy_out(&velocity_half, &state.position, dt, &mut position);

        let mut gradient = vec![0f64; dim];
        let log_prob = model
            .logp(&position, &mut gradient)
            .map_err(|err| NutsError::LogpFailure(Box::new(err)))?;

        let mut momentum = vec![0f64; dim];
        axpy_out(&gradient, &momentum_half, half, &mut momentum);

        Ok(LeapfrogState::new(
            potential,
            position.into(),
            momentum.into(),
            gradient.into(),
            log_prob,
        ))
    }
}
