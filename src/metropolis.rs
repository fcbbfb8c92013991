/*!
# Metropolis Walker Ensemble

Independent random-walk Metropolis–Hastings chains ("walkers") advanced in
lockstep. Every walker proposes from the same [`Proposal`] (an
[`IsotropicGaussian`] of width `proposal_scale`) and owns its random number
generator. A global seed gives reproducible runs: walker `i` is seeded with
`seed + i`.

Walkers are independent, so the whole update of each walker, proposal and
acceptance included, runs on the worker pool.

## Example Usage

```rust
use std::sync::Arc;
use mcmc_harness::core::{Engine, WorkerPool};
use mcmc_harness::distributions::{GaussianLikelihood, IsotropicGaussian, Prior, PriorDict};
use mcmc_harness::metropolis::MetropolisEngine;
use mcmc_harness::posterior::Posterior;
use ndarray::Array2;

let priors = PriorDict::new()
    .with("x", Prior::gaussian(0.0, 10.0)).unwrap()
    .with("y", Prior::gaussian(0.0, 10.0)).unwrap();
let posterior = Arc::new(Posterior::new(
    GaussianLikelihood::new(vec![0.0, 1.0], vec![2.0, 1.0]),
    priors,
));

let pool = WorkerPool::serial();
let mut mh = MetropolisEngine::new(posterior, IsotropicGaussian::new(1.0), 4, 2).set_seed(42);
mh.start(Array2::zeros((4, 2)), &pool).unwrap();
let step = mh.step(&pool).unwrap();
assert_eq!(step.positions.shape(), &[4, 2]);
```
*/

use std::sync::Arc;

use ndarray::prelude::*;
use rand::prelude::*;

use crate::config::{Alias, Configuration, Field, Kind, Schema, Value};
use crate::core::{Engine, Step, WorkerPool};
use crate::distributions::{IsotropicGaussian, Proposal};
use crate::error::{ConfigError, EngineError};
use crate::posterior::{Blob, LogPosterior};
use crate::sampler::EngineAdapter;

/// Options understood by the Metropolis walker ensemble.
pub static METROPOLIS_SCHEMA: Schema = Schema {
    name: "metropolis",
    fields: &[
        Field::new("nwalkers", Kind::Count, Value::Int(8)),
        Field::new("iterations", Kind::Count, Value::Int(1000)),
        Field::new("proposal_scale", Kind::Float, Value::Float(1.0)),
    ],
    aliases: &[
        Alias {
            canonical: "nwalkers",
            accepted: &["n_chains", "chains"],
        },
        Alias {
            canonical: "iterations",
            accepted: &["nsteps", "n_steps", "n_collect"],
        },
        Alias {
            canonical: "proposal_scale",
            accepted: &["step_size", "scale"],
        },
    ],
};

/// Adapter registering [`MetropolisEngine`] with the sampler lifecycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metropolis;

impl EngineAdapter for Metropolis {
    type Engine = MetropolisEngine<IsotropicGaussian>;

    const NAME: &'static str = "metropolis";

    fn schema() -> &'static Schema {
        &METROPOLIS_SCHEMA
    }

    fn validate(config: &Configuration, _ndim: usize) -> Result<(), ConfigError> {
        if config.nwalkers()? == 0 {
            return Err(ConfigError::Constraint(
                "at least one walker is required".into(),
            ));
        }
        let scale = config.float("proposal_scale")?;
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(ConfigError::Constraint(format!(
                "proposal_scale must be a positive number, got {scale}"
            )));
        }
        Ok(())
    }

    fn build(
        posterior: Arc<dyn LogPosterior>,
        ndim: usize,
        config: &Configuration,
        seed: Option<u64>,
    ) -> Result<Self::Engine, ConfigError> {
        let proposal = IsotropicGaussian::new(config.float("proposal_scale")?);
        let engine = MetropolisEngine::new(posterior, proposal, config.nwalkers()?, ndim);
        Ok(match seed {
            Some(seed) => engine.set_seed(seed),
            None => engine,
        })
    }
}

/// A single Metropolis–Hastings walker.
#[derive(Debug, Clone)]
pub struct MHWalker {
    /// Current position.
    pub current_state: Vec<f64>,
    /// Likelihood and prior at the current position.
    pub current_blob: Blob,
    /// The walker-specific random seed.
    pub seed: u64,
    rng: SmallRng,
}

impl MHWalker {
    fn new(seed: u64) -> Self {
        Self {
            current_state: Vec::new(),
            current_blob: Blob {
                log_likelihood: f64::NAN,
                log_prior: f64::NEG_INFINITY,
            },
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /**
    Performs one Metropolis–Hastings update.

    The acceptance ratio in log-space is

    \[
    \log \alpha = \left[\log p(\text{proposed}) + \log q(\text{current} \mid \text{proposed})\right]
                  - \left[\log p(\text{current}) + \log q(\text{proposed} \mid \text{current})\right]
    \]

    and the proposal is kept when \(\log u < \log \alpha\) for a uniform \(u\).
    Returns whether the proposal was accepted.
    */
    fn step<Q: Proposal>(
        &mut self,
        proposal: &Q,
        posterior: &dyn LogPosterior,
    ) -> Result<bool, &'static str> {
        let proposed = proposal.propose(&self.current_state, &mut self.rng);
        if proposed.iter().any(|v| !v.is_finite()) {
            return Err("proposed position");
        }
        let blob = posterior.evaluate(&proposed);
        let proposed_lp = blob.log_posterior();
        if proposed_lp.is_nan() {
            return Err("log posterior");
        }
        let log_q_forward = proposal.log_prob(&self.current_state, &proposed);
        let log_q_backward = proposal.log_prob(&proposed, &self.current_state);
        let log_accept_ratio = (proposed_lp + log_q_backward)
            - (self.current_blob.log_posterior() + log_q_forward);
        let u: f64 = self.rng.gen();
        if log_accept_ratio > u.ln() {
            self.current_state = proposed;
            self.current_blob = blob;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Ensemble of independent Metropolis–Hastings walkers.
pub struct MetropolisEngine<Q> {
    posterior: Arc<dyn LogPosterior>,
    /// The proposal distribution shared by every walker.
    pub proposal: Q,
    /// The walkers, in ensemble order.
    pub walkers: Vec<MHWalker>,
    /// The global random seed.
    pub seed: u64,
    ndim: usize,
    started: bool,
}

impl<Q: Proposal + Send + Sync> MetropolisEngine<Q> {
    /// Creates `nwalkers` walkers in `ndim` dimensions, seeded from a random
    /// global seed.
    pub fn new(posterior: Arc<dyn LogPosterior>, proposal: Q, nwalkers: usize, ndim: usize) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            posterior,
            proposal,
            walkers: Vec::new(),
            seed,
            ndim,
            started: false,
        }
        .reseed(seed, nwalkers)
    }

    /**
    Sets a new global seed; walker `i` receives `seed + i`.

    ```rust
    # use std::sync::Arc;
    # use mcmc_harness::distributions::IsotropicGaussian;
    # use mcmc_harness::metropolis::MetropolisEngine;
    # use mcmc_harness::posterior::{Blob, LogPosterior};
    # struct Flat;
    # impl LogPosterior for Flat {
    #     fn evaluate(&self, _: &[f64]) -> Blob { Blob { log_likelihood: 0.0, log_prior: 0.0 } }
    # }
    let mh = MetropolisEngine::new(Arc::new(Flat), IsotropicGaussian::new(1.0), 2, 1).set_seed(42);
    assert_eq!(mh.walkers[0].seed, 42);
    assert_eq!(mh.walkers[1].seed, 43);
    ```
    */
    pub fn set_seed(self, seed: u64) -> Self {
        let nwalkers = self.walkers.len();
        self.reseed(seed, nwalkers)
    }

    fn reseed(mut self, seed: u64, nwalkers: usize) -> Self {
        let previous = std::mem::take(&mut self.walkers);
        self.seed = seed;
        self.walkers = (0..nwalkers)
            .map(|i| {
                let mut walker = MHWalker::new(seed.wrapping_add(i as u64));
                if let Some(old) = previous.get(i) {
                    walker.current_state = old.current_state.clone();
                    walker.current_blob = old.current_blob;
                }
                walker
            })
            .collect();
        self
    }

    fn snapshot(&self, accepted: usize) -> Step {
        let mut positions = Array2::<f64>::zeros((self.walkers.len(), self.ndim));
        for (mut row, walker) in positions.outer_iter_mut().zip(&self.walkers) {
            row.assign(&ArrayView1::from(walker.current_state.as_slice()));
        }
        let blobs: Vec<Blob> = self.walkers.iter().map(|w| w.current_blob).collect();
        Step::from_blobs(positions, &blobs, accepted)
    }
}

impl<Q: Proposal + Send + Sync> Engine for MetropolisEngine<Q> {
    fn nwalkers(&self) -> usize {
        self.walkers.len()
    }

    fn ndim(&self) -> usize {
        self.ndim
    }

    fn start(&mut self, p0: Array2<f64>, pool: &WorkerPool) -> Result<(), EngineError> {
        if p0.dim() != (self.walkers.len(), self.ndim) {
            return Err(EngineError::InvalidInputs(format!(
                "initial positions have shape {:?}, expected [{}, {}]",
                p0.shape(),
                self.walkers.len(),
                self.ndim
            )));
        }
        let posterior = &self.posterior;
        let p0_ref = &p0;
        let outcomes = pool.map_mut(&mut self.walkers, |i, walker| {
            let state = p0_ref.row(i).to_vec();
            if state.iter().any(|v| !v.is_finite()) {
                return Err("initial position");
            }
            walker.current_blob = posterior.evaluate(&state);
            walker.current_state = state;
            if walker.current_blob.log_posterior().is_nan() {
                return Err("initial log posterior");
            }
            Ok(())
        });
        if let Some((walker, what)) = first_failure(outcomes) {
            return Err(EngineError::NonFinite { walker, what });
        }
        self.started = true;
        Ok(())
    }

    fn step(&mut self, pool: &WorkerPool) -> Result<Step, EngineError> {
        if !self.started {
            return Err(EngineError::NotStarted);
        }
        let posterior = self.posterior.as_ref();
        let proposal = &self.proposal;
        let outcomes = pool.map_mut(&mut self.walkers, |_, walker| {
            walker.step(proposal, posterior)
        });
        let accepted = outcomes.iter().filter(|o| matches!(o, Ok(true))).count();
        if let Some((walker, what)) = first_failure(outcomes) {
            return Err(EngineError::NonFinite { walker, what });
        }
        Ok(self.snapshot(accepted))
    }
}

fn first_failure<T>(outcomes: Vec<Result<T, &'static str>>) -> Option<(usize, &'static str)> {
    outcomes
        .into_iter()
        .enumerate()
        .find_map(|(i, outcome)| outcome.err().map(|what| (i, what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{GaussianLikelihood, Prior, PriorDict};
    use crate::kwargs;
    use crate::posterior::Posterior;
    use approx::assert_abs_diff_eq;

    fn posterior() -> Arc<dyn LogPosterior> {
        let priors = PriorDict::new()
            .with("x", Prior::uniform(-20.0, 20.0))
            .unwrap()
            .with("y", Prior::uniform(-20.0, 20.0))
            .unwrap();
        Arc::new(Posterior::new(
            GaussianLikelihood::new(vec![0.0, 1.0], vec![2.0, 1.5]),
            priors,
        ))
    }

    fn run_gaussian_2d_test(n_walkers: usize, n_steps: usize, pool: WorkerPool) {
        const BURNIN: usize = 1_000;
        const SEED: u64 = 42;

        let mut mh = MetropolisEngine::new(posterior(), IsotropicGaussian::new(1.5), n_walkers, 2)
            .set_seed(SEED);
        mh.start(Array2::zeros((n_walkers, 2)), &pool).unwrap();
        let steps: Vec<Step> = mh
            .sample(BURNIN + n_steps, &pool)
            .collect::<Result<_, _>>()
            .unwrap();

        let views: Vec<ArrayView2<f64>> = steps[BURNIN..].iter().map(|s| s.positions.view()).collect();
        let stacked = ndarray::concatenate(Axis(0), &views).unwrap();
        assert_eq!(stacked.shape(), &[n_walkers * n_steps, 2]);

        let mean = stacked.mean_axis(Axis(0)).unwrap();
        let std = stacked.std_axis(Axis(0), 1.0);
        assert_abs_diff_eq!(mean, array![0.0, 1.0], epsilon = 0.3);
        assert_abs_diff_eq!(std, array![2.0, 1.5], epsilon = 0.3);
    }

    #[test]
    fn test_single_walker() {
        run_gaussian_2d_test(1, 40_000, WorkerPool::serial());
    }

    #[test]
    fn test_4_walkers_on_pool() {
        run_gaussian_2d_test(4, 10_000, WorkerPool::with_threads(4).unwrap());
    }

    #[test]
    fn test_seeds_are_offset_per_walker() {
        let mh = MetropolisEngine::new(posterior(), IsotropicGaussian::new(1.0), 3, 2).set_seed(7);
        let seeds: Vec<u64> = mh.walkers.iter().map(|w| w.seed).collect();
        assert_eq!(seeds, vec![7, 8, 9]);
    }

    #[test]
    fn test_serial_and_pool_agree() {
        let run = |pool: WorkerPool| {
            let mut mh = MetropolisEngine::new(posterior(), IsotropicGaussian::new(1.0), 4, 2)
                .set_seed(3);
            mh.start(Array2::zeros((4, 2)), &pool).unwrap();
            mh.sample(50, &pool)
                .collect::<Result<Vec<Step>, _>>()
                .unwrap()
        };
        assert_eq!(
            run(WorkerPool::serial()),
            run(WorkerPool::with_threads(2).unwrap())
        );
    }

    #[test]
    fn test_not_started() {
        let mut mh = MetropolisEngine::new(posterior(), IsotropicGaussian::new(1.0), 2, 2);
        assert_eq!(
            mh.step(&WorkerPool::serial()),
            Err(EngineError::NotStarted)
        );
    }

    #[test]
    fn test_nan_likelihood_is_reported() {
        let priors = PriorDict::new()
            .with("x", Prior::uniform(-1.0, 1.0))
            .unwrap();
        let bad: Arc<dyn LogPosterior> =
            Arc::new(Posterior::new(|_: &[f64]| f64::NAN, priors));
        let mut mh = MetropolisEngine::new(bad, IsotropicGaussian::new(0.1), 3, 1);
        assert_eq!(
            mh.start(Array2::zeros((3, 1)), &WorkerPool::serial()),
            Err(EngineError::NonFinite {
                walker: 0,
                what: "initial log posterior"
            })
        );
    }

    #[test]
    fn test_aliases() {
        let config = Configuration::translate(
            &METROPOLIS_SCHEMA,
            kwargs! { "n_chains" => 6, "n_collect" => 300, "step_size" => 0.5 },
        )
        .unwrap();
        assert_eq!(config.nwalkers().unwrap(), 6);
        assert_eq!(config.iterations().unwrap(), 300);
        assert_eq!(config.float("proposal_scale").unwrap(), 0.5);
        assert!(Metropolis::validate(&config, 2).is_ok());

        let config = Configuration::translate(
            &METROPOLIS_SCHEMA,
            kwargs! { "scale" => -1.0 },
        )
        .unwrap();
        assert!(Metropolis::validate(&config, 2).is_err());
    }
}
