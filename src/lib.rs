//! Sample from posterior distributions using the No-U-Turn sampler in its
//! slice-variable form.
//!
//! Models implement [`Model`]: a log density over a flat vector, together with
//! its gradient. Step size and a diagonal mass matrix are adapted during warm-up.
//!
//! ```
//! use slice_nuts::{sample_sequentially, Model, NutsSettings, VariableId};
//! use slice_nuts::test_logps::NormalLogp;
//!
//! let model = NormalLogp::new(10, 0.5);
//! let start = model.layout().filled(0.);
//! let settings = NutsSettings {
//!     adapt_count: 200,
//!     ..Default::default()
//! };
//!
//! let chain = sample_sequentially(model, &settings, &start, 400, 0)
//!     .expect("Unrecoverable error during init");
//! let draws = chain
//!     .collect::<Result<Vec<_>, _>>()
//!     .expect("Unrecoverable error during sampling");
//! assert_eq!(draws.len(), 400);
//! assert_eq!(draws[0].sample.get(VariableId(0)).unwrap().len(), 10);
//! ```

pub(crate) mod adapt;
pub(crate) mod chain;
pub(crate) mod integrator;
pub(crate) mod mass_matrix;
pub(crate) mod math;
pub(crate) mod model;
pub(crate) mod nuts;
pub(crate) mod potential;
pub(crate) mod sampler;
pub(crate) mod sampler_stats;
pub(crate) mod state;
pub(crate) mod stepsize;

pub use adapt::AdaptPhase;
pub use chain::{Chain, Draw, NutsChain};
pub use integrator::{Direction, LeapfrogIntegrator};
pub use mass_matrix::{DiagMassMatrix, RunningVariance};
pub use model::{Model, Tensor, VariableId, VariableLayout, VariableValues};
pub use nuts::{NutsError, NutsOptions, SampleInfo, Tree};
pub use potential::{
    DiagPotential, Potential, PotentialKind, PotentialSettings, VarianceAdaptation,
};
pub use sampler::{
    new_chain, sample_parallel, sample_sequentially, ChainOutput, NutsSettings, SampleGenerator,
    Samples,
};
pub use sampler::test_logps;
pub use sampler_stats::{AsSampleStatMap, DrawStats, Metric, SampleStatValue, Statistics};
pub use state::LeapfrogState;
pub use stepsize::{
    find_starting_step_size, DualAverage, DualAverageOptions, StepSizeController, TreeStats,
};
