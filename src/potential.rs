use log::debug;
use rand::Rng;

use crate::{
    adapt::AdaptPhase,
    mass_matrix::{DiagMassMatrix, RunningVariance},
    nuts::NutsError,
};

/// Translates between momentum and velocity, and owns the kinetic energy.
pub trait Potential {
    fn dim(&self) -> usize;

    /// Write `M⁻¹ p` into `velocity`.
    fn update_velocity(&self, momentum: &[f64], velocity: &mut [f64]);

    fn kinetic_energy(&self, momentum: &[f64], velocity: &[f64]) -> f64;

    /// Draw a momentum from `N(0, M)`.
    fn random_momentum<R: Rng + ?Sized>(&self, rng: &mut R, momentum: &mut [f64]);

    /// Feed an accepted position into the variance estimate.
    ///
    /// Does nothing once the phase is past warm-up.
    fn update(&mut self, position: &[f64], phase: &AdaptPhase);

    /// The current diagonal of `M⁻¹`.
    fn variance(&self) -> &[f64];
}

#[derive(Debug, Clone)]
pub enum VarianceAdaptation {
    Fixed,
    SingleWindow {
        estimate: RunningVariance,
    },
    DoubleWindow {
        forward: RunningVariance,
        background: RunningVariance,
        window: u64,
    },
}

/// A potential with a diagonal mass matrix.
#[derive(Debug, Clone)]
pub struct DiagPotential {
    mass_matrix: DiagMassMatrix,
    adaptation: VarianceAdaptation,
}

impl DiagPotential {
    pub fn fixed(variance: &[f64]) -> Self {
        let mut mass_matrix = DiagMassMatrix::new(variance.len());
        mass_matrix.update_diag(variance.iter().copied());
        Self {
            mass_matrix,
            adaptation: VarianceAdaptation::Fixed,
        }
    }

    /// One running estimate that starts from a prior with `weight` pseudo-observations.
    pub fn single_window(mean: &[f64], variance: &[f64], weight: f64) -> Self {
        let mut potential = Self::fixed(variance);
        potential.adaptation = VarianceAdaptation::SingleWindow {
            estimate: RunningVariance::with_prior(mean, variance, weight),
        };
        potential
    }

    /// Two overlapping estimates. The background estimate replaces the forward
    /// one each time it has seen `window` positions.
    pub fn double_window(mean: &[f64], variance: &[f64], weight: f64, window: u64) -> Self {
        let mut potential = Self::fixed(variance);
        potential.adaptation = VarianceAdaptation::DoubleWindow {
            forward: RunningVariance::with_prior(mean, variance, weight),
            background: RunningVariance::new(mean.len()),
            window,
        };
        potential
    }

    pub fn from_settings(settings: &PotentialSettings, dim: usize) -> Self {
        let mean = vec![0f64; dim];
        let variance = vec![settings.initial_variance; dim];
        match settings.kind {
            PotentialKind::Fixed => Self::fixed(&variance),
            PotentialKind::SingleWindow => {
                Self::single_window(&mean, &variance, settings.initial_weight)
            }
            PotentialKind::DoubleWindow { window } => {
                Self::double_window(&mean, &variance, settings.initial_weight, window)
            }
        }
    }

    pub fn adaptation(&self) -> &VarianceAdaptation {
        &self.adaptation
    }
}

impl Potential for DiagPotential {
    fn dim(&self) -> usize {
        self.mass_matrix.dim()
    }

    fn update_velocity(&self, momentum: &[f64], velocity: &mut [f64]) {
        self.mass_matrix.update_velocity(momentum, velocity)
    }

    fn kinetic_energy(&self, momentum: &[f64], velocity: &[f64]) -> f64 {
        self.mass_matrix.kinetic_energy(momentum, velocity)
    }

    fn random_momentum<R: Rng + ?Sized>(&self, rng: &mut R, momentum: &mut [f64]) {
        self.mass_matrix.randomize_momentum(rng, momentum)
    }

    fn update(&mut self, position: &[f64], phase: &AdaptPhase) {
        if !phase.is_tuning() {
            return;
        }

        match &mut self.adaptation {
            VarianceAdaptation::Fixed => {}
            VarianceAdaptation::SingleWindow { estimate } => {
                estimate.add_sample(position);
                self.mass_matrix.update_diag(estimate.current_variance());
            }
            VarianceAdaptation::DoubleWindow {
                forward,
                background,
                window,
            } => {
                forward.add_sample(position);
                background.add_sample(position);
                self.mass_matrix.update_diag(forward.current_variance());

                if background.count() >= *window as f64 {
                    debug!(
                        "Swapping variance windows after draw {} ({} positions in window)",
                        phase.iteration, window
                    );
                    let fresh = RunningVariance::new(background.mean().len());
                    *forward = std::mem::replace(background, fresh);
                }
            }
        }
    }

    fn variance(&self) -> &[f64] {
        self.mass_matrix.variance()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PotentialKind {
    Fixed,
    SingleWindow,
    DoubleWindow { window: u64 },
}

/// Settings for the mass matrix and its adaptation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PotentialSettings {
    pub kind: PotentialKind,
    /// Starting value of every diagonal element of `M⁻¹`.
    pub initial_variance: f64,
    /// Number of pseudo-observations behind the starting variance.
    pub initial_weight: f64,
}

impl Default for PotentialSettings {
    fn default() -> Self {
        Self {
            kind: PotentialKind::DoubleWindow { window: 101 },
            initial_variance: 1.,
            initial_weight: 1.,
        }
    }
}

impl PotentialSettings {
    pub(crate) fn validate(&self) -> Result<(), NutsError> {
        if let PotentialKind::DoubleWindow { window: 0 } = self.kind {
            return Err(NutsError::InvalidSettings(
                "adaptation window must be positive".into(),
            ));
        }
        if !(self.initial_variance.is_finite() && self.initial_variance > 0.) {
            return Err(NutsError::InvalidSettings(format!(
                "initial variance must be positive and finite, got {}",
                self.initial_variance
            )));
        }
        if !(self.initial_weight.is_finite() && self.initial_weight >= 0.) {
            return Err(NutsError::InvalidSettings(format!(
                "initial weight must be non-negative, got {}",
                self.initial_weight
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn feed(potential: &mut DiagPotential, values: impl Iterator<Item = f64>, adapt_count: u64) {
        let mut phase = AdaptPhase::new(1, adapt_count, true);
        for x in values {
            potential.update(&[x], &phase);
            phase = phase.next();
        }
    }

    #[test]
    fn double_window_forgets_early_positions() {
        let mut potential = DiagPotential::double_window(&[0.], &[1.], 1., 101);
        let values = std::iter::repeat(1.)
            .take(150)
            .chain(std::iter::repeat(0.).take(150));
        feed(&mut potential, values, 1000);

        // The live estimate covers positions 101..299: 49 ones, 150 zeros.
        let p = 49. / 199.;
        assert_relative_eq!(potential.variance()[0], p * (1. - p), max_relative = 1e-12);

        let VarianceAdaptation::DoubleWindow { background, .. } = potential.adaptation() else {
            panic!("Wrong adaptation")
        };
        assert_eq!(background.count(), 98.);
    }

    #[test]
    fn single_window_keeps_prior() {
        let mut potential = DiagPotential::single_window(&[0.], &[1.], 1.);
        feed(&mut potential, [2., 2.].into_iter(), 1000);
        // mean 4/3, m2 = 1 + 2 * 1 + 1 * (2 / 3)
        let m2 = 1. + 2. + 2. / 3.;
        assert_relative_eq!(potential.variance()[0], m2 / 3., max_relative = 1e-12);
    }

    #[test]
    fn frozen_after_warmup() {
        let mut potential = DiagPotential::double_window(&[0., 0.], &[1., 1.], 1., 101);
        let mut phase = AdaptPhase::new(1, 3, true);
        for i in 0..10 {
            if i == 3 {
                assert!(!phase.is_tuning());
            }
            let before = potential.variance().to_vec();
            potential.update(&[i as f64, -(i as f64)], &phase);
            if i >= 3 {
                assert_eq!(potential.variance(), &before[..]);
            }
            phase = phase.next();
        }

        let mut fixed = DiagPotential::fixed(&[2.]);
        feed(&mut fixed, [5., -5., 3.].into_iter(), 1000);
        assert_eq!(fixed.variance(), &[2.]);
    }

    #[test]
    fn disabled_adaptation_is_ignored() {
        let mut potential = DiagPotential::single_window(&[0.], &[1.], 1.);
        potential.update(&[10.], &AdaptPhase::new(1, 100, false));
        assert_eq!(potential.variance(), &[1.]);
    }

    #[test]
    fn kinetic_energy_uses_variance() {
        let potential = DiagPotential::fixed(&[2., 0.5]);
        let momentum = [1., 2.];
        let mut velocity = [0f64; 2];
        potential.update_velocity(&momentum, &mut velocity);
        assert_eq!(velocity, [2., 1.]);
        assert_relative_eq!(potential.kinetic_energy(&momentum, &velocity), 0.5 * (2. + 2.));

        let mut rng = StdRng::seed_from_u64(1);
        let mut p = [0f64; 2];
        potential.random_momentum(&mut rng, &mut p);
        assert!(p.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn settings_validation() {
        assert!(PotentialSettings::default().validate().is_ok());
        let bad = PotentialSettings {
            kind: PotentialKind::DoubleWindow { window: 0 },
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PotentialSettings {
            initial_variance: 0.,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PotentialSettings {
            initial_weight: -1.,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
