use crate::potential::Potential;

/// A point in phase space, together with everything derived from it.
///
/// States are never changed after construction. The tree keeps them behind
/// `Rc` and replaces whole states when it grows.
#[derive(Debug, Clone, PartialEq)]
pub struct LeapfrogState {
    pub(crate) position: Box<[f64]>,
    pub(crate) momentum: Box<[f64]>,
    pub(crate) velocity: Box<[f64]>,
    pub(crate) gradient: Box<[f64]>,
    pub(crate) kinetic_energy: f64,
    pub(crate) log_prob: f64,
}

impl LeapfrogState {
    /// Build a state, computing velocity and kinetic energy from the potential.
    pub fn new<P: Potential>(
        potential: &P,
        position: Box<[f64]>,
        momentum: Box<[f64]>,
        gradient: Box<[f64]>,
        log_prob: f64,
    ) -> Self {
        assert!(position.len() == momentum.len());
        assert!(position.len() == gradient.len());
        let mut velocity = vec![0f64; momentum.len()].into_boxed_slice();
        potential.update_velocity(&momentum, &mut velocity);
        let kinetic_energy = potential.kinetic_energy(&momentum, &velocity);
        Self {
            position,
            momentum,
            velocity,
            gradient,
            kinetic_energy,
            log_prob,
        }
    }

    pub fn position(&self) -> &[f64] {
        &self.position
    }

    pub fn momentum(&self) -> &[f64] {
        &self.momentum
    }

    pub fn velocity(&self) -> &[f64] {
        &self.velocity
    }

    pub fn gradient(&self) -> &[f64] {
        &self.gradient
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.kinetic_energy
    }

    pub fn log_prob(&self) -> f64 {
        self.log_prob
    }

    /// The Hamiltonian `K - log p`.
    pub fn energy(&self) -> f64 {
        self.kinetic_energy - self.log_prob
    }

    /// `log p - K`, the log density of the state in phase space.
    pub fn joint_log_density(&self) -> f64 {
        self.log_prob - self.kinetic_energy
    }
}
