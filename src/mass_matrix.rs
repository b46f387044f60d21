use itertools::izip;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::math::{multiply, vector_dot};

pub(crate) const LOWER_LIMIT: f64 = 1e-10f64;
pub(crate) const UPPER_LIMIT: f64 = 1e10f64;

/// A diagonal mass matrix, stored as its inverse (the variance of the posterior).
#[derive(Debug, Clone)]
pub struct DiagMassMatrix {
    inv_stds: Box<[f64]>,
    variance: Box<[f64]>,
}

impl DiagMassMatrix {
    pub fn new(dim: usize) -> Self {
        Self {
            inv_stds: vec![1f64; dim].into(),
            variance: vec![1f64; dim].into(),
        }
    }

    pub fn dim(&self) -> usize {
        self.variance.len()
    }

    pub fn variance(&self) -> &[f64] {
        &self.variance
    }

    /// Install a new variance estimate.
    ///
    /// Values are clamped to `[LOWER_LIMIT, UPPER_LIMIT]`, non-finite values fall back to one.
    pub(crate) fn update_diag(&mut self, new_variance: impl Iterator<Item = f64>) {
        izip!(self.variance.iter_mut(), self.inv_stds.iter_mut(), new_variance).for_each(
            |(var, inv_std, x)| {
                let val = if x.is_finite() {
                    x.clamp(LOWER_LIMIT, UPPER_LIMIT)
                } else {
                    1.
                };
                *var = val;
                *inv_std = val.sqrt().recip();
            },
        );
    }

    pub(crate) fn update_velocity(&self, momentum: &[f64], velocity: &mut [f64]) {
        multiply(&self.variance, momentum, velocity);
    }

    pub(crate) fn kinetic_energy(&self, momentum: &[f64], velocity: &[f64]) -> f64 {
        0.5 * vector_dot(momentum, velocity)
    }

    pub(crate) fn randomize_momentum<R: Rng + ?Sized>(&self, rng: &mut R, momentum: &mut [f64]) {
        assert!(momentum.len() == self.inv_stds.len());
        izip!(momentum.iter_mut(), self.inv_stds.iter()).for_each(|(p, &inv_std)| {
            let norm: f64 = rng.sample(StandardNormal);
            *p = norm * inv_std;
        });
    }
}

/// Welford's running estimate of an elementwise variance.
///
/// The accumulator can start from a prior: a mean and variance that count as
/// `weight` pseudo-observations. With a zero weight the estimate is the plain
/// population variance of the samples.
#[derive(Debug, Clone)]
pub struct RunningVariance {
    mean: Box<[f64]>,
    m2: Box<[f64]>,
    count: f64,
}

impl RunningVariance {
    pub fn new(dim: usize) -> Self {
        Self {
            mean: vec![0f64; dim].into(),
            m2: vec![0f64; dim].into(),
            count: 0.,
        }
    }

    pub fn with_prior(mean: &[f64], variance: &[f64], weight: f64) -> Self {
        assert!(mean.len() == variance.len());
        Self {
            mean: mean.into(),
            m2: variance.iter().map(|&var| var * weight).collect(),
            count: weight,
        }
    }

    pub fn add_sample(&mut self, value: &[f64]) {
        assert!(value.len() == self.mean.len());
        self.count += 1.;
        let count = self.count;
        izip!(self.mean.iter_mut(), self.m2.iter_mut(), value).for_each(|(mean, m2, &x)| {
            let delta = x - *mean;
            *mean += delta / count;
            let delta2 = x - *mean;
            *m2 += delta * delta2;
        });
    }

    /// Weight of the estimate, including the prior pseudo-count.
    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn current_variance(&self) -> impl Iterator<Item = f64> + '_ {
        let count = self.count;
        self.m2.iter().map(move |&m2| m2 / count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn two_pass(values: &[f64]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
        (mean, var)
    }

    #[test]
    fn welford_matches_two_pass() {
        let mut rng = StdRng::seed_from_u64(42);
        let dist = Normal::new(3., 2.).unwrap();

        for n in [2usize, 10, 1000] {
            let values: Vec<f64> = (0..n).map(|_| dist.sample(&mut rng)).collect();
            let mut running = RunningVariance::new(1);
            for &x in values.iter() {
                running.add_sample(&[x]);
            }
            let (mean, var) = two_pass(&values);
            assert_relative_eq!(running.mean()[0], mean, max_relative = 1e-10);
            let estimate: Vec<f64> = running.current_variance().collect();
            assert_relative_eq!(estimate[0], var, max_relative = 1e-10);
            assert_eq!(running.count(), n as f64);
        }
    }

    #[test]
    fn prior_counts_as_observations() {
        let mut running = RunningVariance::with_prior(&[0.], &[1.], 1.);
        running.add_sample(&[2.]);
        // mean moves halfway, m2 = 1 + 2 * 1
        assert_relative_eq!(running.mean()[0], 1.);
        let var: Vec<f64> = running.current_variance().collect();
        assert_relative_eq!(var[0], 1.5);
    }

    #[test]
    fn update_diag_clamps() {
        let mut mass = DiagMassMatrix::new(4);
        mass.update_diag([1e-20, 1e20, f64::NAN, 4.].into_iter());
        assert_eq!(mass.variance(), &[LOWER_LIMIT, UPPER_LIMIT, 1., 4.]);

        let velocity = {
            let mut out = [0f64; 4];
            mass.update_velocity(&[0., 0., 2., 1.], &mut out);
            out
        };
        assert_eq!(velocity, [0., 0., 2., 4.]);
        assert_relative_eq!(mass.kinetic_energy(&[0., 0., 2., 1.], &velocity), 0.5 * (4. + 4.));
    }

    #[test]
    fn momentum_scaled_by_inverse_std() {
        let mut mass = DiagMassMatrix::new(1);
        mass.update_diag([4.].into_iter());
        let mut rng = StdRng::seed_from_u64(3);
        let n = 20_000;
        let mut running = RunningVariance::new(1);
        let mut momentum = [0f64];
        for _ in 0..n {
            mass.randomize_momentum(&mut rng, &mut momentum);
            running.add_sample(&momentum);
        }
        let var: Vec<f64> = running.current_variance().collect();
        assert!((var[0] - 0.25).abs() < 0.02);
    }
}
