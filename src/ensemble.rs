/*!
Affine-invariant ensemble sampler using the Goodman & Weare (2010) stretch move.

The ensemble is split into two halves. Each walker `X_k` of one half is moved
along the line through a randomly chosen walker `X_j` of the other half,
`Y = X_j + Z (X_k - X_j)`, with `Z` drawn from `g(z) ∝ 1/sqrt(z)` on
`[1/a, a]`, and accepted with probability
`min(1, Z^(ndim - 1) p(Y) / p(X_k))`. Posterior evaluations of a half-ensemble
run on the worker pool.

The engine also provides a burn-in pre-pass: it samples batches of
`test_steps` iterations and stops once a two-sample Kolmogorov–Smirnov test can
no longer tell the log-posterior distribution of a batch from that of the
previous one.

# Examples

```rust
use std::sync::Arc;
use mcmc_harness::core::{Engine, WorkerPool};
use mcmc_harness::distributions::{GaussianLikelihood, Prior, PriorDict};
use mcmc_harness::ensemble::StretchEngine;
use mcmc_harness::posterior::Posterior;
use rand::rngs::SmallRng;
use rand::SeedableRng;

let priors = PriorDict::new()
    .with("x", Prior::uniform(-5.0, 5.0)).unwrap()
    .with("y", Prior::uniform(-5.0, 5.0)).unwrap();
let mut rng = SmallRng::seed_from_u64(0);
let p0 = priors.sample_walkers(16, &mut rng);
let posterior = Arc::new(Posterior::new(
    GaussianLikelihood::new(vec![0.0, 1.0], vec![1.0, 0.5]),
    priors,
));

let pool = WorkerPool::serial();
let mut engine = StretchEngine::new(posterior, 16, 2, 2.0).set_seed(42);
engine.start(p0, &pool).unwrap();
let steps: Vec<_> = engine.sample(100, &pool).collect::<Result<_, _>>().unwrap();
assert_eq!(steps.len(), 100);
assert_eq!(steps[99].positions.shape(), &[16, 2]);
```
*/

use std::sync::Arc;

use ndarray::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::config::{Alias, Configuration, Field, Kind, Schema, Value};
use crate::core::{BurninSettings, Engine, Step, WorkerPool};
use crate::error::{ConfigError, EngineError};
use crate::ks_test::{two_sample_ks_test, MIN_SAMPLE_SIZE};
use crate::posterior::{Blob, LogPosterior};
use crate::sampler::EngineAdapter;

/// Options understood by the stretch-move ensemble.
pub static ENSEMBLE_SCHEMA: Schema = Schema {
    name: "ensemble",
    fields: &[
        Field::new("nwalkers", Kind::Count, Value::Int(500)),
        Field::new("iterations", Kind::Count, Value::Int(500)),
        Field::new("a", Kind::Float, Value::Float(2.0)),
        Field::new("processes", Kind::Count, Value::Int(1)),
        Field::new("test_steps", Kind::Count, Value::Int(16)),
        Field::new("critical_pval", Kind::Float, Value::Float(0.05)),
        Field::new("max_steps", Kind::OptionalCount, Value::Null),
        Field::new("burnin_verbose", Kind::Bool, Value::Bool(false)),
    ],
    aliases: &[
        Alias {
            canonical: "nwalkers",
            accepted: &["nwalker", "walkers", "draws"],
        },
        Alias {
            canonical: "iterations",
            accepted: &["nsteps"],
        },
    ],
};

/// Adapter registering [`StretchEngine`] with the sampler lifecycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ensemble;

impl EngineAdapter for Ensemble {
    type Engine = StretchEngine;

    const NAME: &'static str = "ensemble";
    const SUPPORTS_AUTOBURNIN: bool = true;

    fn schema() -> &'static Schema {
        &ENSEMBLE_SCHEMA
    }

    fn normalize(config: &mut Configuration) {
        if let Ok(processes) = config.count("processes") {
            if processes != 1 {
                warn!(
                    processes,
                    "`processes` cannot be used for parallelisation; running with \
                     processes = 1, use `npool` to evaluate walkers in parallel"
                );
                config.replace("processes", Value::Int(1));
            }
        }
    }

    fn validate(config: &Configuration, ndim: usize) -> Result<(), ConfigError> {
        let nwalkers = config.nwalkers()?;
        let iterations = config.iterations()?;
        if nwalkers >= iterations {
            return Err(ConfigError::Constraint(format!(
                "the number of walkers ({nwalkers}) must be smaller than the number \
                 of iterations ({iterations})"
            )));
        }
        if nwalkers % 2 != 0 {
            return Err(ConfigError::Constraint(format!(
                "the number of walkers must be even, got {nwalkers}"
            )));
        }
        if nwalkers < 2 * ndim {
            return Err(ConfigError::Constraint(format!(
                "the number of walkers ({nwalkers}) must be at least twice the \
                 dimension of the parameter space ({ndim})"
            )));
        }
        let a = config.float("a")?;
        if !(a > 1.0 && a.is_finite()) {
            return Err(ConfigError::Constraint(format!(
                "the stretch scale `a` must be greater than 1, got {a}"
            )));
        }
        let burnin = BurninSettings::from_config(config)?;
        if config.settings().autoburnin && burnin.test_steps * nwalkers < MIN_SAMPLE_SIZE {
            return Err(ConfigError::Constraint(format!(
                "a burn-in batch of {} steps with {nwalkers} walkers holds fewer than \
                 {MIN_SAMPLE_SIZE} log-posterior values; raise `test_steps`",
                burnin.test_steps
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
        let engine = StretchEngine::new(posterior, config.nwalkers()?, ndim, config.float("a")?);
        Ok(match seed {
            Some(seed) => engine.set_seed(seed),
            None => engine,
        })
    }
}

#[derive(Debug, Clone)]
struct EnsembleState {
    positions: Array2<f64>,
    blobs: Vec<Blob>,
}

/// Stretch-move ensemble engine.
pub struct StretchEngine {
    posterior: Arc<dyn LogPosterior>,
    nwalkers: usize,
    ndim: usize,
    a: f64,
    rng: SmallRng,
    state: Option<EnsembleState>,
}

impl StretchEngine {
    pub fn new(posterior: Arc<dyn LogPosterior>, nwalkers: usize, ndim: usize, a: f64) -> Self {
        Self {
            posterior,
            nwalkers,
            ndim,
            a,
            rng: SmallRng::from_entropy(),
            state: None,
        }
    }

    /**
    Sets a new seed for the engine's random stream.

    # Examples

    ```rust
    # use std::sync::Arc;
    # use mcmc_harness::ensemble::StretchEngine;
    # use mcmc_harness::posterior::{Blob, LogPosterior};
    # struct Flat;
    # impl LogPosterior for Flat {
    #     fn evaluate(&self, _: &[f64]) -> Blob { Blob { log_likelihood: 0.0, log_prior: 0.0 } }
    # }
    let engine = StretchEngine::new(Arc::new(Flat), 8, 2, 2.0).set_seed(42);
    ```
    */
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Draws a stretch factor from `g(z) ∝ 1/sqrt(z)` on `[1/a, a]`.
    fn draw_z(&mut self) -> f64 {
        let u: f64 = self.rng.gen();
        ((self.a - 1.0) * u + 1.0).powi(2) / self.a
    }

    /// Updates the walkers in `active` using the walkers in `complement`.
    fn update_half(
        &mut self,
        active: std::ops::Range<usize>,
        complement: std::ops::Range<usize>,
        pool: &WorkerPool,
    ) -> Result<usize, EngineError> {
        let ndim = self.ndim;
        let n_active = active.len();
        let complements: Vec<usize> = (0..n_active)
            .map(|_| complement.start + self.rng.gen_range(0..complement.len()))
            .collect();
        let zs: Vec<f64> = (0..n_active).map(|_| self.draw_z()).collect();

        let state = self.state.as_ref().ok_or(EngineError::NotStarted)?;
        let mut proposals = Array2::<f64>::zeros((n_active, ndim));
        for (row, (k, &j)) in active.clone().zip(&complements).enumerate() {
            let x_k = state.positions.row(k);
            let x_j = state.positions.row(j);
            let mut y = proposals.row_mut(row);
            y.assign(&(&x_j + &((&x_k - &x_j) * zs[row])));
            if y.iter().any(|v| !v.is_finite()) {
                return Err(EngineError::NonFinite {
                    walker: k,
                    what: "proposed position",
                });
            }
        }

        let posterior = &self.posterior;
        let proposals_ref = &proposals;
        let new_blobs = pool.map(n_active, |row| {
            let y = proposals_ref.row(row);
            match y.as_slice() {
                Some(slice) => posterior.evaluate(slice),
                None => posterior.evaluate(&y.to_vec()),
            }
        });

        let mut accepted = 0;
        let state = self.state.as_mut().ok_or(EngineError::NotStarted)?;
        for (row, k) in active.enumerate() {
            let new = new_blobs[row];
            let new_lp = new.log_posterior();
            if new_lp.is_nan() {
                return Err(EngineError::NonFinite {
                    walker: k,
                    what: "log posterior",
                });
            }
            let old_lp = state.blobs[k].log_posterior();
            let log_ratio = (ndim as f64 - 1.0) * zs[row].ln() + new_lp - old_lp;
            let u: f64 = self.rng.gen();
            if log_ratio > u.ln() {
                state.positions.row_mut(k).assign(&proposals.row(row));
                state.blobs[k] = new;
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    fn current_step(&self, accepted: usize) -> Result<Step, EngineError> {
        let state = self.state.as_ref().ok_or(EngineError::NotStarted)?;
        Ok(Step::from_blobs(state.positions.clone(), &state.blobs, accepted))
    }
}

impl Engine for StretchEngine {
    fn nwalkers(&self) -> usize {
        self.nwalkers
    }

    fn ndim(&self) -> usize {
        self.ndim
    }

    fn start(&mut self, p0: Array2<f64>, pool: &WorkerPool) -> Result<(), EngineError> {
        if p0.dim() != (self.nwalkers, self.ndim) {
            return Err(EngineError::InvalidInputs(format!(
                "initial positions have shape {:?}, expected [{}, {}]",
                p0.shape(),
                self.nwalkers,
                self.ndim
            )));
        }
        if self.nwalkers < 2 || self.nwalkers % 2 != 0 {
            return Err(EngineError::InvalidInputs(format!(
                "the stretch move needs an even number of walkers, got {}",
                self.nwalkers
            )));
        }
        if let Some((walker, _)) = p0
            .outer_iter()
            .enumerate()
            .find(|(_, row)| row.iter().any(|v| !v.is_finite()))
        {
            return Err(EngineError::NonFinite {
                walker,
                what: "initial position",
            });
        }

        let posterior = &self.posterior;
        let p0_ref = &p0;
        let blobs = pool.map(self.nwalkers, |k| posterior.evaluate(&p0_ref.row(k).to_vec()));
        if let Some(walker) = blobs.iter().position(|b| b.log_posterior().is_nan()) {
            return Err(EngineError::NonFinite {
                walker,
                what: "initial log posterior",
            });
        }
        self.state = Some(EnsembleState {
            positions: p0,
            blobs,
        });
        Ok(())
    }

    fn step(&mut self, pool: &WorkerPool) -> Result<Step, EngineError> {
        let half = self.nwalkers / 2;
        let first = 0..half;
        let second = half..self.nwalkers;
        let mut accepted = self.update_half(first.clone(), second.clone(), pool)?;
        accepted += self.update_half(second, first, pool)?;
        self.current_step(accepted)
    }

    fn burnin(
        &mut self,
        settings: &BurninSettings,
        pool: &WorkerPool,
    ) -> Result<Vec<Step>, EngineError> {
        if settings.test_steps * self.nwalkers < MIN_SAMPLE_SIZE {
            return Err(EngineError::InvalidInputs(format!(
                "burn-in batches of {} steps with {} walkers are too small to compare",
                settings.test_steps, self.nwalkers
            )));
        }
        let max_steps = settings.max_steps.unwrap_or(usize::MAX);
        let mut steps: Vec<Step> = Vec::new();
        let mut previous: Option<Vec<f64>> = None;

        while steps.len() < max_steps {
            let batch_len = settings.test_steps.min(max_steps - steps.len());
            let batch = self
                .sample(batch_len, pool)
                .collect::<Result<Vec<Step>, EngineError>>()?;
            let current: Vec<f64> = batch
                .iter()
                .flat_map(|step| step.log_posterior().to_vec())
                .collect();
            steps.extend(batch);

            // A batch cut short by max_steps is kept but not tested.
            if current.len() < MIN_SAMPLE_SIZE {
                break;
            }
            if let Some(mut prev) = previous.take() {
                let mut compared = current.clone();
                let result = two_sample_ks_test(&mut prev, &mut compared, settings.critical_pval)?;
                if settings.verbose {
                    info!(
                        iteration = steps.len(),
                        p_value = result.p_value,
                        statistic = result.statistic,
                        "burn-in test"
                    );
                }
                if result.p_value >= settings.critical_pval {
                    debug!(iterations = steps.len(), "burn-in pre-pass converged");
                    return Ok(steps);
                }
            }
            previous = Some(current);
        }
        warn!(
            iterations = steps.len(),
            "burn-in pre-pass reached max_steps before the log posterior settled"
        );
        Ok(steps)
    }
}
