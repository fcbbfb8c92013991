/*!
Prior distributions over named parameters, the Gaussian random-walk proposal used by
the Metropolis engine, and a diagonal Gaussian likelihood handy for demos and tests.

# Examples

```rust
use mcmc_harness::distributions::{Prior, PriorDict};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let priors = PriorDict::new()
    .with("m", Prior::uniform(0.0, 10.0)).unwrap()
    .with("c", Prior::gaussian(5.0, 1.0)).unwrap()
    .with("sigma", Prior::delta_function(1.0)).unwrap();

// Fixed parameters do not count towards the sampled dimension.
assert_eq!(priors.ndim(), 2);
assert_eq!(priors.search_keys(), vec!["m", "c"]);

let mut rng = SmallRng::seed_from_u64(42);
let theta = priors.sample(&mut rng);
assert!(priors.ln_prob(&theta).is_finite());
```
*/

use indexmap::IndexMap;
use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::PriorError;
use crate::posterior::Likelihood;

/// A one-dimensional prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Prior {
    /// Flat density on `[minimum, maximum]`.
    Uniform {
        /// Lower bound.
        minimum: f64,
        /// Upper bound.
        maximum: f64,
    },
    /// Density proportional to `1/x` on `[minimum, maximum]`, `minimum > 0`.
    LogUniform {
        /// Lower bound.
        minimum: f64,
        /// Upper bound.
        maximum: f64,
    },
    /// Normal density.
    Gaussian {
        /// Mean.
        mu: f64,
        /// Standard deviation.
        sigma: f64,
    },
    /// The parameter is fixed to `peak` and not sampled.
    DeltaFunction {
        /// Fixed value.
        peak: f64,
    },
}

impl Prior {
    pub fn uniform(minimum: f64, maximum: f64) -> Self {
        Prior::Uniform { minimum, maximum }
    }

    pub fn log_uniform(minimum: f64, maximum: f64) -> Self {
        Prior::LogUniform { minimum, maximum }
    }

    pub fn gaussian(mu: f64, sigma: f64) -> Self {
        Prior::Gaussian { mu, sigma }
    }

    pub fn delta_function(peak: f64) -> Self {
        Prior::DeltaFunction { peak }
    }

    /// True when the parameter is pinned and excluded from sampling.
    pub fn is_fixed(&self) -> bool {
        matches!(self, Prior::DeltaFunction { .. })
    }

    /// Draws one value.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Prior::Uniform { minimum, maximum } => rng.gen_range(minimum..maximum),
            Prior::LogUniform { minimum, maximum } => {
                rng.gen_range(minimum.ln()..maximum.ln()).exp()
            }
            Prior::Gaussian { mu, sigma } => {
                let z: f64 = StandardNormal.sample(rng);
                mu + sigma * z
            }
            Prior::DeltaFunction { peak } => peak,
        }
    }

    /// Normalized log-density at `x`; `-inf` outside the support.
    pub fn ln_prob(&self, x: f64) -> f64 {
        match *self {
            Prior::Uniform { minimum, maximum } => {
                if (minimum..=maximum).contains(&x) {
                    -(maximum - minimum).ln()
                } else {
                    f64::NEG_INFINITY
                }
            }
            Prior::LogUniform { minimum, maximum } => {
                if (minimum..=maximum).contains(&x) {
                    -x.ln() - (maximum / minimum).ln().ln()
                } else {
                    f64::NEG_INFINITY
                }
            }
            Prior::Gaussian { mu, sigma } => {
                let z = (x - mu) / sigma;
                -0.5 * z * z - (sigma * (2.0 * PI).sqrt()).ln()
            }
            Prior::DeltaFunction { peak } => {
                if x == peak {
                    0.0
                } else {
                    f64::NEG_INFINITY
                }
            }
        }
    }

    fn validate(&self, name: &str) -> Result<(), PriorError> {
        match *self {
            Prior::Uniform { minimum, maximum } | Prior::LogUniform { minimum, maximum }
                if !(minimum < maximum && minimum.is_finite() && maximum.is_finite()) =>
            {
                Err(PriorError::InvalidBounds {
                    name: name.to_owned(),
                    minimum,
                    maximum,
                })
            }
            Prior::LogUniform { minimum, .. } if minimum <= 0.0 => {
                Err(PriorError::InvalidScale {
                    name: name.to_owned(),
                    value: minimum,
                })
            }
            Prior::Gaussian { sigma, .. } if !(sigma > 0.0 && sigma.is_finite()) => {
                Err(PriorError::InvalidScale {
                    name: name.to_owned(),
                    value: sigma,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Ordered collection of named priors.
///
/// The order of insertion defines the layout of parameter vectors handed to the
/// likelihood: fixed parameters are skipped, every other parameter occupies one
/// slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorDict {
    priors: IndexMap<String, Prior>,
}

impl PriorDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the prior for `name`.
    pub fn insert(&mut self, name: impl Into<String>, prior: Prior) -> Result<(), PriorError> {
        let name = name.into();
        prior.validate(&name)?;
        self.priors.insert(name, prior);
        Ok(())
    }

    /// Builder form of [`PriorDict::insert`].
    pub fn with(mut self, name: impl Into<String>, prior: Prior) -> Result<Self, PriorError> {
        self.insert(name, prior)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Prior> {
        self.priors.get(name)
    }

    /// Names of the sampled parameters, in vector order.
    pub fn search_keys(&self) -> Vec<&str> {
        self.search_priors().map(|(name, _)| name).collect()
    }

    /// Number of sampled parameters.
    pub fn ndim(&self) -> usize {
        self.search_priors().count()
    }

    fn search_priors(&self) -> impl Iterator<Item = (&str, &Prior)> {
        self.priors
            .iter()
            .filter(|(_, prior)| !prior.is_fixed())
            .map(|(name, prior)| (name.as_str(), prior))
    }

    /// Draws one parameter vector.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        self.search_priors().map(|(_, p)| p.sample(rng)).collect()
    }

    /// Draws `nwalkers` independent parameter vectors, one per row.
    pub fn sample_walkers<R: Rng + ?Sized>(&self, nwalkers: usize, rng: &mut R) -> Array2<f64> {
        let ndim = self.ndim();
        let mut out = Array2::<f64>::zeros((nwalkers, ndim));
        for mut row in out.rows_mut() {
            for (slot, (_, prior)) in row.iter_mut().zip(self.search_priors()) {
                *slot = prior.sample(rng);
            }
        }
        out
    }

    /// Joint log-density of a parameter vector laid out as [`PriorDict::search_keys`].
    pub fn ln_prob(&self, theta: &[f64]) -> f64 {
        if theta.len() != self.ndim() {
            return f64::NEG_INFINITY;
        }
        self.search_priors()
            .zip(theta)
            .map(|((_, prior), &x)| prior.ln_prob(x))
            .sum()
    }

    /// Expands a sampled vector into a full name → value map, fixed parameters included.
    pub fn full_parameters(&self, theta: &[f64]) -> IndexMap<String, f64> {
        let mut sampled = theta.iter();
        self.priors
            .iter()
            .map(|(name, prior)| {
                let value = match prior {
                    Prior::DeltaFunction { peak } => *peak,
                    _ => sampled.next().copied().unwrap_or(f64::NAN),
                };
                (name.clone(), value)
            })
            .collect()
    }

    pub(crate) fn check_sampleable(&self) -> Result<(), PriorError> {
        if self.ndim() == 0 {
            return Err(PriorError::NothingToSample);
        }
        Ok(())
    }
}

/// A trait for generating proposals in random-walk Metropolis updates.
pub trait Proposal {
    /// Samples a candidate from q(x' | x).
    fn propose<R: Rng + ?Sized>(&self, current: &[f64], rng: &mut R) -> Vec<f64>;

    /// Evaluates log q(x' | x).
    fn log_prob(&self, from: &[f64], to: &[f64]) -> f64;
}

/**
An isotropic Gaussian proposal: independent Gaussian noise with standard deviation
`std` added to every coordinate.

```rust
use mcmc_harness::distributions::{IsotropicGaussian, Proposal};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let proposal = IsotropicGaussian::new(1.0);
let mut rng = SmallRng::seed_from_u64(1);
let candidate = proposal.propose(&[0.0, 0.0], &mut rng);
assert_eq!(candidate.len(), 2);
```
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotropicGaussian {
    pub std: f64,
}

impl IsotropicGaussian {
    pub fn new(std: f64) -> Self {
        Self { std }
    }
}

impl Proposal for IsotropicGaussian {
    fn propose<R: Rng + ?Sized>(&self, current: &[f64], rng: &mut R) -> Vec<f64> {
        match Normal::new(0.0, self.std) {
            Ok(normal) => current.iter().map(|x| x + normal.sample(rng)).collect(),
            Err(_) => current.to_vec(),
        }
    }

    fn log_prob(&self, from: &[f64], to: &[f64]) -> f64 {
        let var = self.std * self.std;
        let d = from.len() as f64;
        let exponent: f64 = from
            .iter()
            .zip(to)
            .map(|(f, t)| -(t - f).powi(2) / (2.0 * var))
            .sum();
        exponent - 0.5 * d * (2.0 * PI * var).ln()
    }
}

/// Independent Gaussian likelihood with per-dimension mean and standard deviation.
///
/// ```rust
/// use mcmc_harness::distributions::GaussianLikelihood;
/// use mcmc_harness::posterior::Likelihood;
///
/// let like = GaussianLikelihood::new(vec![0.0, 1.0], vec![1.0, 2.0]);
/// assert!(like.log_likelihood(&[0.0, 1.0]) > like.log_likelihood(&[3.0, 1.0]));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianLikelihood {
    pub mean: Vec<f64>,
    pub sigma: Vec<f64>,
}

impl GaussianLikelihood {
    pub fn new(mean: Vec<f64>, sigma: Vec<f64>) -> Self {
        Self { mean, sigma }
    }
}

impl Likelihood for GaussianLikelihood {
    fn log_likelihood(&self, params: &[f64]) -> f64 {
        params
            .iter()
            .zip(self.mean.iter().zip(&self.sigma))
            .map(|(x, (mu, sigma))| {
                let z = (x - mu) / sigma;
                -0.5 * z * z - (sigma * (2.0 * PI).sqrt()).ln()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_uniform_ln_prob() {
        let prior = Prior::uniform(0.0, 4.0);
        assert_abs_diff_eq!(prior.ln_prob(1.0), -(4.0f64).ln(), epsilon = 1e-12);
        assert_eq!(prior.ln_prob(-0.1), f64::NEG_INFINITY);
        assert_eq!(prior.ln_prob(4.1), f64::NEG_INFINITY);
    }

    #[test]
    fn test_gaussian_ln_prob_matches_normal_density() {
        let prior = Prior::gaussian(0.0, 1.0);
        let p = prior.ln_prob(1.0).exp();
        assert_abs_diff_eq!(p, 0.24197072451914337, epsilon = 1e-12);
    }

    #[test]
    fn test_log_uniform_normalizes() {
        let prior = Prior::log_uniform(1.0, 100.0);
        // Trapezoid integration of the density over its support.
        let n = 200_000;
        let h = 99.0 / n as f64;
        let integral: f64 = (0..=n)
            .map(|i| {
                let x = 1.0 + i as f64 * h;
                let w = if i == 0 || i == n { 0.5 } else { 1.0 };
                w * prior.ln_prob(x).exp()
            })
            .sum::<f64>()
            * h;
        assert_abs_diff_eq!(integral, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_samples_respect_support() {
        let mut rng = SmallRng::seed_from_u64(7);
        let prior = Prior::log_uniform(0.5, 2.0);
        for _ in 0..1000 {
            let x = prior.sample(&mut rng);
            assert!((0.5..=2.0).contains(&x));
        }
    }

    #[test]
    fn test_invalid_priors_are_rejected() {
        let mut priors = PriorDict::new();
        assert!(matches!(
            priors.insert("a", Prior::uniform(1.0, 1.0)),
            Err(PriorError::InvalidBounds { .. })
        ));
        assert!(matches!(
            priors.insert("b", Prior::gaussian(0.0, 0.0)),
            Err(PriorError::InvalidScale { .. })
        ));
        assert!(matches!(
            priors.insert("c", Prior::log_uniform(0.0, 1.0)),
            Err(PriorError::InvalidScale { .. })
        ));
    }

    #[test]
    fn test_fixed_parameters_are_reinserted() {
        let priors = PriorDict::new()
            .with("a", Prior::uniform(0.0, 1.0))
            .unwrap()
            .with("fixed", Prior::delta_function(3.0))
            .unwrap()
            .with("b", Prior::uniform(0.0, 1.0))
            .unwrap();
        let full = priors.full_parameters(&[0.25, 0.75]);
        let values: Vec<f64> = full.values().copied().collect();
        assert_eq!(values, vec![0.25, 3.0, 0.75]);
        assert_eq!(full.keys().nth(1).map(String::as_str), Some("fixed"));
    }

    #[test]
    fn test_sample_walkers_shape() {
        let priors = PriorDict::new()
            .with("x", Prior::uniform(-1.0, 1.0))
            .unwrap()
            .with("y", Prior::gaussian(0.0, 1.0))
            .unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let p0 = priors.sample_walkers(16, &mut rng);
        assert_eq!(p0.shape(), &[16, 2]);
        assert!(p0.column(0).iter().all(|x| (-1.0..1.0).contains(x)));
    }

    #[test]
    fn test_isotropic_gaussian_log_prob() {
        let proposal = IsotropicGaussian::new(1.0);
        let lp = proposal.log_prob(&[0.0], &[1.0]);
        assert_abs_diff_eq!(lp.exp(), 0.24197072451914337, epsilon = 1e-12);
        // Symmetric in its arguments.
        assert_abs_diff_eq!(
            proposal.log_prob(&[0.3, 1.0], &[1.0, -2.0]),
            proposal.log_prob(&[1.0, -2.0], &[0.3, 1.0]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_gaussian_likelihood_peak() {
        let like = GaussianLikelihood::new(vec![1.0, -1.0], vec![0.5, 2.0]);
        let at_mean = like.log_likelihood(&[1.0, -1.0]);
        let expected = -(0.5 * (2.0 * PI).sqrt()).ln() - (2.0 * (2.0 * PI).sqrt()).ln();
        assert_abs_diff_eq!(at_mean, expected, epsilon = 1e-12);
        assert!(like.log_likelihood(&[1.5, -1.0]) < at_mean);
    }
}
