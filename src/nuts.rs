use std::rc::Rc;

use log::trace;
use rand::{distr::Open01, Rng};
use thiserror::Error;

use crate::{
    integrator::{Direction, LeapfrogIntegrator},
    math::scalar_prods_of_diff,
    model::{Model, VariableId},
    potential::Potential,
    state::LeapfrogState,
    stepsize::TreeStats,
};

#[derive(Error, Debug)]
pub enum NutsError {
    #[error("Logp function returned error: {0}")]
    LogpFailure(Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid sampler settings: {0}")]
    InvalidSettings(String),
    #[error("Starting position has zero probability (logp = {logp})")]
    ZeroProbabilityStart { logp: f64 },
    #[error("Expected a vector of length {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("A model needs at least one latent variable")]
    EmptyLayout,
    #[error("Variable {0} appears more than once")]
    DuplicateVariable(VariableId),
    #[error("No value for variable {0}")]
    MissingVariable(VariableId),
    #[error("Tensor of shape {shape:?} can not hold {len} values")]
    ShapeMismatch { shape: Vec<usize>, len: usize },
    #[error("Chain has no position, call set_position first")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, NutsError>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NutsOptions {
    pub max_tree_height: u64,
    pub max_energy_error: f64,
}

impl Default for NutsOptions {
    fn default() -> Self {
        Self {
            max_tree_height: 10,
            max_energy_error: 1000.,
        }
    }
}

/// Everything that stays fixed while one trajectory is built.
pub(crate) struct Trajectory<'a, M: Model, P: Potential> {
    pub(crate) model: &'a mut M,
    pub(crate) potential: &'a P,
    pub(crate) step_size: f64,
    pub(crate) log_slice: f64,
    pub(crate) initial_joint: f64,
    pub(crate) max_energy_error: f64,
}

impl<'a, M: Model, P: Potential> Trajectory<'a, M, P> {
    fn leapfrog(&mut self, start: &LeapfrogState, direction: Direction) -> Result<LeapfrogState> {
        LeapfrogIntegrator::step(
            self.model,
            self.potential,
            start,
            direction.sign() * self.step_size,
        )
    }
}

/// A balanced binary tree of leapfrog states.
///
/// Only the two outermost states and the current proposal are kept. The edges are
/// stored in time order: `forward` has been integrated furthest into the future.
#[derive(Debug, Clone)]
pub struct Tree {
    forward: Rc<LeapfrogState>,
    backward: Rc<LeapfrogState>,
    proposal: Rc<LeapfrogState>,
    accepted_count: u64,
    should_continue: bool,
    delta_likelihood_sum: f64,
    size: u64,
    height: u64,
    diverging: bool,
}

impl Tree {
    pub fn new(start: Rc<LeapfrogState>) -> Tree {
        Tree {
            forward: start.clone(),
            backward: start.clone(),
            proposal: start,
            accepted_count: 1,
            should_continue: true,
            delta_likelihood_sum: 0.,
            size: 1,
            height: 0,
            diverging: false,
        }
    }

    /// Double the tree by adding a subtree of the same height on one side.
    pub(crate) fn grow<M, P, R>(
        &mut self,
        trajectory: &mut Trajectory<M, P>,
        direction: Direction,
        rng: &mut R,
    ) -> Result<()>
    where
        M: Model,
        P: Potential,
        R: Rng + ?Sized,
    {
        let edge = self.edge(direction).clone();
        let other = Tree::build(trajectory, edge, direction, self.height, rng)?;

        self.set_edge(direction, &other);

        if other.should_continue {
            let accept_prob = other.accepted_count as f64 / self.accepted_count as f64;
            if rng.random::<f64>() < accept_prob {
                self.proposal = other.proposal.clone();
            }
        }

        self.add_totals(&other);
        self.should_continue = other.should_continue && self.is_not_u_turning();
        self.height += 1;
        Ok(())
    }

    /// Build a subtree of height `height` that starts next to `edge`.
    fn build<M, P, R>(
        trajectory: &mut Trajectory<M, P>,
        edge: Rc<LeapfrogState>,
        direction: Direction,
        height: u64,
        rng: &mut R,
    ) -> Result<Tree>
    where
        M: Model,
        P: Potential,
        R: Rng + ?Sized,
    {
        if height == 0 {
            return Tree::leaf(trajectory, &edge, direction);
        }

        let mut first = Tree::build(trajectory, edge, direction, height - 1, rng)?;
        if first.should_continue {
            let far_edge = first.edge(direction).clone();
            let other = Tree::build(trajectory, far_edge, direction, height - 1, rng)?;
            first.merge(other, direction, rng);
        }
        // A stopped subtree holds fewer than 2^height states.
        first.height = height;
        Ok(first)
    }

    fn leaf<M, P>(
        trajectory: &mut Trajectory<M, P>,
        edge: &LeapfrogState,
        direction: Direction,
    ) -> Result<Tree>
    where
        M: Model,
        P: Potential,
    {
        let state = Rc::new(trajectory.leapfrog(edge, direction)?);
        let joint = state.joint_log_density();

        let accepted = trajectory.log_slice <= joint;
        let should_continue = trajectory.log_slice < joint + trajectory.max_energy_error;
        let delta = (joint - trajectory.initial_joint).exp();
        let delta = if delta.is_nan() { 0. } else { delta.min(1.) };

        Ok(Tree {
            forward: state.clone(),
            backward: state.clone(),
            proposal: state,
            accepted_count: accepted as u64,
            should_continue,
            delta_likelihood_sum: delta,
            size: 1,
            height: 0,
            diverging: !should_continue,
        })
    }

    /// Combine the two halves of a recursive build. The other half may have
    /// stopped early and be smaller.
    fn merge<R: Rng + ?Sized>(&mut self, other: Tree, direction: Direction, rng: &mut R) {
        let total = self.accepted_count + other.accepted_count;
        if total > 0 {
            let accept_prob = other.accepted_count as f64 / total as f64;
            if rng.random::<f64>() < accept_prob {
                self.proposal = other.proposal.clone();
            }
        }

        self.set_edge(direction, &other);
        self.add_totals(&other);
        self.should_continue = other.should_continue && self.is_not_u_turning();
    }

    fn edge(&self, direction: Direction) -> &Rc<LeapfrogState> {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    fn set_edge(&mut self, direction: Direction, other: &Tree) {
        match direction {
            Direction::Forward => self.forward = other.forward.clone(),
            Direction::Backward => self.backward = other.backward.clone(),
        }
    }

    fn add_totals(&mut self, other: &Tree) {
        self.accepted_count += other.accepted_count;
        self.delta_likelihood_sum += other.delta_likelihood_sum;
        self.size += other.size;
        self.diverging |= other.diverging;
    }

    /// Neither edge moves back towards the other one.
    fn is_not_u_turning(&self) -> bool {
        let (forward_dot, backward_dot) = scalar_prods_of_diff(
            &self.forward.position,
            &self.backward.position,
            &self.forward.momentum,
            &self.backward.momentum,
        );
        forward_dot >= 0. && backward_dot >= 0.
    }

    pub fn proposal(&self) -> &Rc<LeapfrogState> {
        &self.proposal
    }

    pub fn forward(&self) -> &LeapfrogState {
        &self.forward
    }

    pub fn backward(&self) -> &LeapfrogState {
        &self.backward
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted_count
    }

    pub fn should_continue(&self) -> bool {
        self.should_continue
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn diverging(&self) -> bool {
        self.diverging
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            delta_likelihood_sum: self.delta_likelihood_sum,
            tree_size: self.size,
        }
    }
}

/// Information about a draw, exported as part of the sampler stats
#[derive(Debug, Clone)]
pub struct SampleInfo {
    /// The height of the trajectory that this point was sampled from
    pub depth: u64,

    /// Whether the trajectory was terminated because it reached
    /// the maximum tree height.
    pub reached_maxdepth: bool,

    /// A leapfrog step left the slice by more than the maximum energy error.
    pub diverging: bool,

    pub tree_stats: TreeStats,
    pub accepted_count: u64,
}

/// Build one trajectory starting at `start` and pick a state from it.
///
/// `start` has to carry freshly drawn momentum.
pub(crate) fn draw<M, P, R>(
    model: &mut M,
    potential: &P,
    rng: &mut R,
    start: LeapfrogState,
    step_size: f64,
    options: &NutsOptions,
) -> Result<(Rc<LeapfrogState>, SampleInfo)>
where
    M: Model,
    P: Potential,
    R: Rng + ?Sized,
{
    let initial_joint = start.joint_log_density();
    let u: f64 = rng.sample(Open01);
    let mut trajectory = Trajectory {
        model,
        potential,
        step_size,
        log_slice: u.ln() + initial_joint,
        initial_joint,
        max_energy_error: options.max_energy_error,
    };

    let mut tree = Tree::new(Rc::new(start));
    while tree.should_continue && tree.height < options.max_tree_height {
        let direction: Direction = rng.random();
        tree.grow(&mut trajectory, direction, rng)?;
    }

    let info = SampleInfo {
        depth: tree.height,
        reached_maxdepth: tree.should_continue,
        diverging: tree.diverging,
        tree_stats: tree.stats(),
        accepted_count: tree.accepted_count,
    };
    trace!(
        "Tree of height {} with {} leapfrog states, {} accepted",
        info.depth,
        info.tree_stats.tree_size,
        info.accepted_count
    );
    Ok((tree.proposal, info))
}
