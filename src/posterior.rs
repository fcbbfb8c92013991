//! The log-posterior callback handed to sampling engines.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::distributions::PriorDict;

/// A user-supplied log-likelihood.
///
/// Engines evaluate it concurrently from several worker threads, so
/// implementations must be `Send + Sync`. Closures implement it directly:
///
/// ```rust
/// use mcmc_harness::posterior::Likelihood;
///
/// let like = |theta: &[f64]| -0.5 * theta.iter().map(|x| x * x).sum::<f64>();
/// assert_eq!(like.log_likelihood(&[0.0, 0.0]), 0.0);
/// ```
pub trait Likelihood: Send + Sync {
    /// Log-likelihood of the parameter vector `params`.
    fn log_likelihood(&self, params: &[f64]) -> f64;
}

impl<F> Likelihood for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn log_likelihood(&self, params: &[f64]) -> f64 {
        self(params)
    }
}

/// Auxiliary per-sample scalars carried alongside positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    pub log_likelihood: f64,
    pub log_prior: f64,
}

impl Blob {
    /// Unnormalized log posterior; `-inf` whenever the prior vanishes.
    pub fn log_posterior(&self) -> f64 {
        if self.log_prior == f64::NEG_INFINITY {
            f64::NEG_INFINITY
        } else {
            self.log_likelihood + self.log_prior
        }
    }
}

/// Anything an engine can call to score a walker position.
pub trait LogPosterior: Send + Sync {
    /// Evaluates likelihood and prior at `theta`.
    fn evaluate(&self, theta: &[f64]) -> Blob;
}

/// Combines a [`Likelihood`] with a [`PriorDict`].
///
/// The likelihood is skipped for positions outside the prior support, and the
/// number of likelihood evaluations is counted.
#[derive(Debug)]
pub struct Posterior<L> {
    likelihood: L,
    priors: PriorDict,
    evaluations: AtomicU64,
}

impl<L: Likelihood> Posterior<L> {
    pub fn new(likelihood: L, priors: PriorDict) -> Self {
        Self {
            likelihood,
            priors,
            evaluations: AtomicU64::new(0),
        }
    }

    pub fn priors(&self) -> &PriorDict {
        &self.priors
    }

    pub fn likelihood(&self) -> &L {
        &self.likelihood
    }

    /// Likelihood evaluations performed so far.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }
}

impl<L: Likelihood> LogPosterior for Posterior<L> {
    fn evaluate(&self, theta: &[f64]) -> Blob {
        let log_prior = self.priors.ln_prob(theta);
        if log_prior == f64::NEG_INFINITY {
            return Blob {
                log_likelihood: f64::NAN,
                log_prior,
            };
        }
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        Blob {
            log_likelihood: self.likelihood.log_likelihood(theta),
            log_prior,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Prior;

    fn posterior() -> Posterior<impl Likelihood> {
        let priors = PriorDict::new()
            .with("x", Prior::uniform(-1.0, 1.0))
            .unwrap();
        Posterior::new(|theta: &[f64]| -theta[0] * theta[0], priors)
    }

    #[test]
    fn test_inside_support() {
        let post = posterior();
        let blob = post.evaluate(&[0.5]);
        assert_eq!(blob.log_likelihood, -0.25);
        assert_eq!(blob.log_prior, -(2.0f64).ln());
        assert_eq!(blob.log_posterior(), -0.25 - (2.0f64).ln());
        assert_eq!(post.evaluations(), 1);
    }

    #[test]
    fn test_outside_support_skips_likelihood() {
        let post = posterior();
        let blob = post.evaluate(&[2.0]);
        assert!(blob.log_likelihood.is_nan());
        assert_eq!(blob.log_posterior(), f64::NEG_INFINITY);
        assert_eq!(post.evaluations(), 0);
    }
}
