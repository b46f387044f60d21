use std::rc::Rc;

use anyhow::{Context, Result};
use log::{trace, warn};
use rand::Rng;

use crate::{
    adapt::AdaptPhase,
    model::{Model, VariableValues},
    nuts::{draw, NutsError, NutsOptions},
    potential::{DiagPotential, Potential},
    sampler::NutsSettings,
    sampler_stats::{DrawStats, Statistics},
    state::LeapfrogState,
    stepsize::{find_starting_step_size, StepSizeController},
};

/// Warn once the height cap has been hit this many times.
const MAXDEPTH_WARN_AFTER: u64 = 10;

/// A posterior draw, with the values of every latent variable.
#[derive(Debug, Clone)]
pub struct Draw {
    pub sample: VariableValues,
    pub position: Box<[f64]>,
    pub log_prob: f64,
    pub stats: DrawStats,
}

/// Draw samples from the posterior distribution using Hamiltonian MCMC.
pub trait Chain {
    /// Initialize the sampler to a position. This should be called
    /// before calling draw.
    ///
    /// This fails if the logp function returns an error or if the
    /// position has zero probability.
    fn set_position(&mut self, position: &VariableValues) -> Result<()>;

    /// Draw a new sample and return it with some diagnostic information.
    fn draw(&mut self) -> Result<Draw>;

    /// The dimensionality of the posterior.
    fn dim(&self) -> usize;
}

pub struct NutsChain<M, R, P = DiagPotential>
where
    M: Model,
    R: Rng,
    P: Potential,
{
    model: M,
    potential: P,
    step_size: Option<StepSizeController>,
    current: Option<Rc<LeapfrogState>>,
    settings: NutsSettings,
    options: NutsOptions,
    rng: R,
    chain: u64,
    draw_count: u64,
    maxdepth_count: u64,
    statistics: Option<Statistics>,
}

impl<M, R, P> NutsChain<M, R, P>
where
    M: Model,
    R: Rng,
    P: Potential,
{
    /// Create a chain. `settings` have to be validated already.
    pub fn new(model: M, potential: P, settings: NutsSettings, rng: R, chain: u64) -> Self {
        assert!(model.dim() == potential.dim());
        let options = NutsOptions {
            max_tree_height: settings.max_tree_height,
            max_energy_error: settings.max_energy_error,
        };
        let statistics = settings.save_statistics.then(Statistics::new);
        NutsChain {
            model,
            potential,
            step_size: None,
            current: None,
            settings,
            options,
            rng,
            chain,
            draw_count: 0,
            maxdepth_count: 0,
            statistics,
        }
    }

    /// Start from a flat position vector.
    pub fn set_flat_position(&mut self, position: &[f64]) -> Result<(), NutsError> {
        let dim = self.model.dim();
        if position.len() != dim {
            return Err(NutsError::DimensionMismatch {
                expected: dim,
                actual: position.len(),
            });
        }

        let mut gradient = vec![0f64; dim];
        let logp = self
            .model
            .logp(position, &mut gradient)
            .map_err(|err| NutsError::LogpFailure(Box::new(err)))?;
        if !logp.is_finite() {
            return Err(NutsError::ZeroProbabilityStart { logp });
        }

        if self.step_size.is_none() {
            let initial_step = match self.settings.initial_step_size {
                Some(step) => step,
                None => find_starting_step_size(
                    &mut self.model,
                    &self.potential,
                    position,
                    &gradient,
                    logp,
                    &mut self.rng,
                )?,
            };
            self.step_size = Some(StepSizeController::new(
                self.settings.step_size_options,
                initial_step,
                self.settings.target_accept,
            ));
        }

        let momentum = vec![0f64; dim];
        self.current = Some(Rc::new(LeapfrogState::new(
            &self.potential,
            position.into(),
            momentum.into(),
            gradient.into(),
            logp,
        )));
        Ok(())
    }

    pub fn potential(&self) -> &P {
        &self.potential
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// The step size the next trajectory will be integrated with.
    pub fn step_size(&self) -> Option<f64> {
        self.step_size.as_ref().map(|controller| controller.step_size())
    }

    pub fn position(&self) -> Option<&[f64]> {
        self.current.as_ref().map(|state| state.position())
    }

    pub fn statistics(&self) -> Option<&Statistics> {
        self.statistics.as_ref()
    }

    pub fn take_statistics(&mut self) -> Option<Statistics> {
        self.statistics.take()
    }

    fn phase(&self) -> AdaptPhase {
        AdaptPhase::new(
            self.draw_count + 1,
            self.settings.adapt_count,
            self.settings.adapt_enabled,
        )
    }

    fn draw_inner(&mut self) -> Result<Draw, NutsError> {
        let phase = self.phase();
        let (Some(current), Some(controller)) = (self.current.clone(), self.step_size.as_mut())
        else {
            return Err(NutsError::NotInitialized);
        };
        let step_size = controller.step_size();

        let mut momentum = vec![0f64; current.position.len()];
        self.potential.random_momentum(&mut self.rng, &mut momentum);
        let start = LeapfrogState::new(
            &self.potential,
            current.position.clone(),
            momentum.into(),
            current.gradient.clone(),
            current.log_prob,
        );

        let (proposal, info) = draw(
            &mut self.model,
            &self.potential,
            &mut self.rng,
            start,
            step_size,
            &self.options,
        )?;

        if phase.enabled {
            controller.adapt(&info.tree_stats, &phase);
            self.potential.update(proposal.position(), &phase);
        }

        let sample = self
            .model
            .sample_at(proposal.position())
            .map_err(|err| NutsError::LogpFailure(Box::new(err)))?;

        if info.reached_maxdepth && !phase.is_tuning() {
            self.maxdepth_count += 1;
            if self.maxdepth_count == MAXDEPTH_WARN_AFTER {
                warn!(
                    "Chain {} hit the maximum tree height of {} in {} draws after warm-up",
                    self.chain, self.options.max_tree_height, MAXDEPTH_WARN_AFTER
                );
            }
        }

        self.draw_count += 1;
        let stats = DrawStats {
            chain: self.chain,
            draw: self.draw_count,
            depth: info.depth,
            maxdepth_reached: info.reached_maxdepth,
            diverging: info.diverging,
            step_size,
            mean_tree_accept: info.tree_stats.mean_tree_accept(),
            tree_size: info.tree_stats.tree_size,
            logp: proposal.log_prob(),
            energy: proposal.energy(),
            tuning: phase.is_tuning(),
        };
        trace!(
            "Chain {} draw {}: logp {} depth {} step size {}",
            self.chain,
            stats.draw,
            stats.logp,
            stats.depth,
            stats.step_size
        );
        if let Some(statistics) = self.statistics.as_mut() {
            statistics.record(&stats);
        }

        let draw = Draw {
            sample,
            position: proposal.position.clone(),
            log_prob: proposal.log_prob(),
            stats,
        };
        self.current = Some(proposal);
        Ok(draw)
    }
}

impl<M, R, P> Chain for NutsChain<M, R, P>
where
    M: Model,
    R: Rng,
    P: Potential,
{
    fn set_position(&mut self, position: &VariableValues) -> Result<()> {
        let flat = self
            .model
            .layout()
            .flatten(position)
            .context("Starting position does not match the model")?;
        self.set_flat_position(&flat)
            .with_context(|| format!("Could not initialize chain {}", self.chain))
    }

    fn draw(&mut self) -> Result<Draw> {
        let draw = self.phase().iteration;
        self.draw_inner()
            .with_context(|| format!("Draw {} of chain {} failed", draw, self.chain))
    }

    fn dim(&self) -> usize {
        self.model.dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::VariableId,
        sampler::{new_chain, test_logps::NormalLogp, NutsSettings},
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn draw_requires_position() {
        let mut chain = new_chain(NormalLogp::new(3, 0.), &NutsSettings::default(), 0).unwrap();
        let err = chain.draw().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NutsError>(),
            Some(NutsError::NotInitialized)
        ));
    }

    #[test]
    fn draws_move_and_adapt() {
        let settings = NutsSettings {
            adapt_count: 50,
            save_statistics: true,
            ..Default::default()
        };
        let model = NormalLogp::new(4, 2.);
        let mut chain = new_chain(model, &settings, 1).unwrap();
        let start = chain.model().layout().filled(0.);
        chain.set_position(&start).unwrap();
        assert!(chain.step_size().unwrap() > 0.);

        let mut draws = Vec::new();
        for _ in 0..100 {
            draws.push(chain.draw().unwrap());
        }

        assert!(draws[..50].iter().all(|d| d.stats.tuning));
        assert!(draws[50..].iter().all(|d| !d.stats.tuning));
        assert_eq!(draws[99].stats.draw, 100);
        assert_eq!(draws[99].stats.chain, 1);

        // frozen after warm-up
        let frozen = draws[50].stats.step_size;
        assert!(draws[50..].iter().all(|d| d.stats.step_size == frozen));
        assert_eq!(chain.step_size(), Some(frozen));

        for draw in draws.iter() {
            let values = draw.sample.get(VariableId(0)).unwrap();
            assert_eq!(values.values(), &draw.position[..]);
            assert!(draw.log_prob.is_finite());
            assert!(draw.stats.tree_size >= 2);
        }

        let statistics = chain.statistics().unwrap();
        assert_eq!(statistics.len(), 100);
    }

    #[test]
    fn zero_probability_start() {
        let mut chain = new_chain(NormalLogp::new(1, 0.), &NutsSettings::default(), 0).unwrap();
        let err = chain.set_flat_position(&[f64::INFINITY]).unwrap_err();
        assert!(matches!(err, NutsError::ZeroProbabilityStart { .. }));

        let err = chain.set_flat_position(&[0., 1.]).unwrap_err();
        assert!(matches!(
            err,
            NutsError::DimensionMismatch {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    fn fixed_step_size_without_adaptation() {
        let settings = NutsSettings {
            adapt_enabled: false,
            initial_step_size: Some(0.25),
            ..Default::default()
        };
        let mut chain = new_chain(NormalLogp::new(2, 0.), &settings, 0).unwrap();
        chain.set_flat_position(&[0.5, -0.5]).unwrap();
        for _ in 0..20 {
            let draw = chain.draw().unwrap();
            assert_eq!(draw.stats.step_size, 0.25);
            assert!(!draw.stats.tuning);
        }
        assert_eq!(chain.potential().variance(), &[1., 1.]);
    }
}
