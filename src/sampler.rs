use anyhow::{bail, Context, Result};
use log::debug;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::{prelude::*, ThreadPoolBuilder};

use crate::{
    chain::{Chain, Draw, NutsChain},
    model::{Model, Tensor, VariableId, VariableValues},
    nuts::NutsError,
    potential::{DiagPotential, PotentialSettings},
    sampler_stats::Statistics,
    stepsize::DualAverageOptions,
};

/// Settings for the NUTS sampler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NutsSettings {
    /// The number of draws during which the step size and the mass
    /// matrix are adapted.
    pub adapt_count: u64,
    /// The acceptance rate the step size is tuned towards.
    pub target_accept: f64,
    pub adapt_enabled: bool,
    /// Start the dual averaging from this step size. If unset, a step size
    /// is searched for at the starting position.
    pub initial_step_size: Option<f64>,
    /// The maximum number of tree doublings per draw. The number of leapfrog
    /// steps is at most `2 ^ max_tree_height`.
    pub max_tree_height: u64,
    /// A leapfrog step that leaves the slice by more than this is treated
    /// as a divergence and ends the trajectory.
    pub max_energy_error: f64,
    /// Record a `Statistics` trace in every chain.
    pub save_statistics: bool,
    pub potential: PotentialSettings,
    pub step_size_options: DualAverageOptions,
    pub seed: u64,
    pub num_chains: usize,
}

impl Default for NutsSettings {
    fn default() -> Self {
        Self {
            adapt_count: 1000,
            target_accept: 0.65,
            adapt_enabled: true,
            initial_step_size: None,
            max_tree_height: 10,
            max_energy_error: 1000f64,
            save_statistics: false,
            potential: PotentialSettings::default(),
            step_size_options: DualAverageOptions::default(),
            seed: 0,
            num_chains: 4,
        }
    }
}

impl NutsSettings {
    pub fn validate(&self) -> Result<(), NutsError> {
        if let Some(step) = self.initial_step_size {
            if !(step.is_finite() && step > 0.) {
                return Err(NutsError::InvalidSettings(format!(
                    "initial step size must be positive and finite, got {}",
                    step
                )));
            }
        }
        if !(self.target_accept > 0. && self.target_accept < 1.) {
            return Err(NutsError::InvalidSettings(format!(
                "target acceptance rate must lie in (0, 1), got {}",
                self.target_accept
            )));
        }
        if !(self.max_energy_error > 0.) {
            return Err(NutsError::InvalidSettings(format!(
                "maximum energy error must be positive, got {}",
                self.max_energy_error
            )));
        }
        if self.max_tree_height == 0 {
            return Err(NutsError::InvalidSettings(
                "maximum tree height must be at least one".into(),
            ));
        }
        if self.num_chains == 0 {
            return Err(NutsError::InvalidSettings(
                "at least one chain is needed".into(),
            ));
        }
        self.potential.validate()
    }
}

/// Create a chain with the potential and random stream described by `settings`.
///
/// Chains with the same seed but different `chain` indices draw from
/// independent streams.
pub fn new_chain<M: Model>(
    model: M,
    settings: &NutsSettings,
    chain: u64,
) -> Result<NutsChain<M, ChaCha8Rng>, NutsError> {
    settings.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
    rng.set_stream(chain);
    let potential = DiagPotential::from_settings(&settings.potential, model.dim());
    Ok(NutsChain::new(model, potential, *settings, rng, chain))
}

pub fn sample_sequentially<M: Model>(
    model: M,
    settings: &NutsSettings,
    start: &VariableValues,
    draws: u64,
    chain: u64,
) -> Result<impl Iterator<Item = Result<Draw>>> {
    let mut sampler = new_chain(model, settings, chain)?;
    sampler.set_position(start)?;
    Ok((0..draws).map(move |_| sampler.draw()))
}

/// The draws that were kept by a [`SampleGenerator`].
#[derive(Debug, Clone, Default)]
pub struct Samples {
    pub draws: Vec<Draw>,
}

impl Samples {
    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn log_probs(&self) -> Vec<f64> {
        self.draws.iter().map(|draw| draw.log_prob).collect()
    }

    /// All values of one variable, in draw order.
    pub fn get(&self, id: VariableId) -> Vec<&Tensor> {
        self.draws
            .iter()
            .filter_map(|draw| draw.sample.get(id))
            .collect()
    }

    /// Elementwise mean of one variable over all kept draws.
    pub fn mean(&self, id: VariableId) -> Option<Vec<f64>> {
        let values = self.get(id);
        let first = values.first()?;
        let mut sum = vec![0f64; first.len()];
        for value in values.iter() {
            sum.iter_mut()
                .zip(value.values())
                .for_each(|(acc, &x)| *acc += x);
        }
        let count = values.len() as f64;
        Some(sum.into_iter().map(|x| x / count).collect())
    }
}

/// Burn-in and thinning on top of a chain.
pub struct SampleGenerator<C: Chain> {
    chain: C,
    drop_count: u64,
    down_sample_interval: u64,
    variables: Option<Vec<VariableId>>,
}

impl<C: Chain> SampleGenerator<C> {
    /// The chain must have a position already.
    pub fn new(chain: C) -> Self {
        Self {
            chain,
            drop_count: 0,
            down_sample_interval: 1,
            variables: None,
        }
    }

    /// Only report these variables in the kept draws.
    pub fn keep_variables(mut self, ids: impl IntoIterator<Item = VariableId>) -> Self {
        self.variables = Some(ids.into_iter().collect());
        self
    }

    fn keep(&self, mut draw: Draw) -> Draw {
        if let Some(ids) = self.variables.as_ref() {
            draw.sample = draw.sample.restrict(ids);
        }
        draw
    }

    /// Discard this many draws before collecting anything.
    pub fn drop_count(mut self, drop_count: u64) -> Self {
        self.drop_count = drop_count;
        self
    }

    /// Keep one draw out of every `interval`. An interval of one keeps everything.
    pub fn down_sample_interval(mut self, interval: u64) -> Self {
        self.down_sample_interval = interval;
        self
    }

    fn check_interval(&self) -> Result<()> {
        if self.down_sample_interval == 0 {
            bail!("Down-sample interval must be at least one");
        }
        Ok(())
    }

    fn drop_samples(&mut self) -> Result<()> {
        if self.drop_count > 0 {
            debug!("Dropping {} draws", self.drop_count);
        }
        for _ in 0..self.drop_count {
            self.chain.draw().context("Failed while dropping draws")?;
        }
        Ok(())
    }

    /// Run `total` draws, drop the first ones and thin the rest.
    ///
    /// Dropping 10 of 100 draws with an interval of 2 keeps 45 draws.
    pub fn generate(&mut self, total: u64) -> Result<Samples> {
        self.check_interval()?;
        if self.drop_count >= total {
            bail!(
                "Cannot drop {} of {} requested draws",
                self.drop_count,
                total
            );
        }

        self.drop_samples()?;
        let remaining = total - self.drop_count;
        let mut draws = Vec::with_capacity((remaining / self.down_sample_interval + 1) as usize);
        for i in 0..remaining {
            if i % self.down_sample_interval == 0 {
                let draw = self.chain.draw()?;
                draws.push(self.keep(draw));
            } else {
                self.chain.draw()?;
            }
        }
        Ok(Samples { draws })
    }

    /// An endless stream of thinned draws, starting after the dropped ones.
    ///
    /// The stream ends after the first error.
    pub fn stream(mut self) -> Result<impl Iterator<Item = Result<Draw>>> {
        self.check_interval()?;
        self.drop_samples()?;

        let mut failed = false;
        Ok(std::iter::from_fn(move || {
            if failed {
                return None;
            }
            let mut draw = self.chain.draw();
            for _ in 1..self.down_sample_interval {
                if draw.is_err() {
                    break;
                }
                draw = self.chain.draw();
            }
            failed = draw.is_err();
            Some(draw.map(|draw| self.keep(draw)))
        }))
    }

    pub fn into_chain(self) -> C {
        self.chain
    }
}

/// Output of one chain in [`sample_parallel`].
#[derive(Debug)]
pub struct ChainOutput {
    pub chain: u64,
    pub draws: Vec<Draw>,
    pub statistics: Option<Statistics>,
}

/// Run `settings.num_chains` independent chains on a thread pool.
///
/// Every chain gets its own model from `make_model` and its own random stream.
pub fn sample_parallel<M, F>(
    make_model: F,
    settings: &NutsSettings,
    start: &VariableValues,
    draws: u64,
) -> Result<Vec<ChainOutput>>
where
    M: Model,
    F: Fn(u64) -> M + Sync,
{
    settings.validate()?;
    let pool = ThreadPoolBuilder::new()
        .num_threads(settings.num_chains)
        .thread_name(|i| format!("nuts-chain-{}", i))
        .build()
        .context("Could not start thread pool")?;

    pool.install(|| {
        (0..settings.num_chains as u64)
            .into_par_iter()
            .map(|chain| -> Result<ChainOutput> {
                let mut sampler = new_chain(make_model(chain), settings, chain)?;
                sampler.set_position(start)?;
                let draws = (0..draws)
                    .map(|_| sampler.draw())
                    .collect::<Result<Vec<_>>>()?;
                Ok(ChainOutput {
                    chain,
                    draws,
                    statistics: sampler.take_statistics(),
                })
            })
            .collect()
    })
}

pub mod test_logps {
    use multiversion::multiversion;
    use thiserror::Error;

    use crate::model::{Model, VariableId, VariableLayout};

    /// Independent normal distributions with a common mean and unit variance.
    #[derive(Clone, Debug)]
    pub struct NormalLogp {
        layout: VariableLayout,
        pub mu: f64,
    }

    impl NormalLogp {
        pub fn new(dim: usize, mu: f64) -> Self {
            Self {
                layout: VariableLayout::vector(VariableId(0), dim),
                mu,
            }
        }
    }

    #[derive(Error, Debug)]
    pub enum NormalLogpError {}

    impl Model for NormalLogp {
        type LogpError = NormalLogpError;

        fn layout(&self) -> &VariableLayout {
            &self.layout
        }

        fn logp(&mut self, position: &[f64], gradient: &mut [f64]) -> Result<f64, NormalLogpError> {
            #[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
            fn logp_inner(mu: f64, position: &[f64], gradient: &mut [f64]) -> f64 {
                let n = position.len();
                assert!(gradient.len() == n);

                let mut logp = 0f64;
                for (p, g) in position.iter().zip(gradient.iter_mut()) {
                    let val = mu - p;
                    logp -= val * val / 2.;
                    *g = val;
                }

                logp
            }

            Ok(logp_inner(self.mu, position, gradient))
        }
    }
}
