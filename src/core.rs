//! Engine contract shared by every wrapped sampler, and the worker pool engines
//! evaluate walkers on.

use std::sync::Arc;

use ndarray::{Array1, Array2};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

use crate::config::Configuration;
use crate::error::{ConfigError, EngineError};
use crate::posterior::Blob;

/// One ensemble iteration as produced by an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Walker positions, `[nwalkers, ndim]`.
    pub positions: Array2<f64>,
    /// Log-likelihood per walker.
    pub log_likelihood: Array1<f64>,
    /// Log-prior per walker.
    pub log_prior: Array1<f64>,
    /// Number of walkers whose proposal was accepted in this iteration.
    pub accepted: usize,
}

impl Step {
    pub fn from_blobs(positions: Array2<f64>, blobs: &[Blob], accepted: usize) -> Self {
        Self {
            positions,
            log_likelihood: blobs.iter().map(|b| b.log_likelihood).collect(),
            log_prior: blobs.iter().map(|b| b.log_prior).collect(),
            accepted,
        }
    }

    pub fn nwalkers(&self) -> usize {
        self.positions.nrows()
    }

    /// Log posterior per walker.
    pub fn log_posterior(&self) -> Array1<f64> {
        self.log_likelihood
            .iter()
            .zip(self.log_prior.iter())
            .map(|(&log_likelihood, &log_prior)| {
                Blob {
                    log_likelihood,
                    log_prior,
                }
                .log_posterior()
            })
            .collect()
    }

    pub fn acceptance_fraction(&self) -> f64 {
        if self.nwalkers() == 0 {
            return 0.0;
        }
        self.accepted as f64 / self.nwalkers() as f64
    }
}

/// Parameters of an engine's own burn-in pre-pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BurninSettings {
    /// Iterations per test batch.
    pub test_steps: usize,
    /// Batches are considered equal once the KS p-value reaches this level.
    pub critical_pval: f64,
    /// Upper bound on pre-pass iterations.
    pub max_steps: Option<usize>,
    /// Log every batch test.
    pub verbose: bool,
}

impl BurninSettings {
    /// Reads `test_steps`, `critical_pval`, `max_steps` and `burnin_verbose`.
    pub fn from_config(config: &Configuration) -> Result<Self, ConfigError> {
        let settings = Self {
            test_steps: config.count("test_steps")?,
            critical_pval: config.float("critical_pval")?,
            max_steps: config.optional_count("max_steps")?,
            verbose: config.flag("burnin_verbose")?,
        };
        if settings.test_steps == 0 {
            return Err(ConfigError::Constraint(
                "test_steps must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&settings.critical_pval) {
            return Err(ConfigError::Constraint(format!(
                "critical_pval must lie in [0, 1], got {}",
                settings.critical_pval
            )));
        }
        Ok(settings)
    }
}

/// A sampling engine advancing an ensemble of walkers.
///
/// Engines never own the worker pool; it is handed to every call that
/// evaluates the posterior.
pub trait Engine: Send {
    fn nwalkers(&self) -> usize;

    fn ndim(&self) -> usize;

    /// Places the walkers at `p0` (`[nwalkers, ndim]`) and evaluates them.
    fn start(&mut self, p0: Array2<f64>, pool: &WorkerPool) -> Result<(), EngineError>;

    /// Advances every walker by one iteration.
    fn step(&mut self, pool: &WorkerPool) -> Result<Step, EngineError>;

    /// Runs the engine's burn-in pre-pass, returning the iterations it consumed.
    fn burnin(
        &mut self,
        _settings: &BurninSettings,
        _pool: &WorkerPool,
    ) -> Result<Vec<Step>, EngineError> {
        Err(EngineError::Unsupported("a burn-in pre-pass"))
    }

    /// Evidence estimate and its error, for engines that compute one.
    fn evidence(&self) -> Option<(f64, f64)> {
        None
    }

    /// Iterator over the next `iterations` steps.
    fn sample<'a>(&'a mut self, iterations: usize, pool: &'a WorkerPool) -> Samples<'a, Self>
    where
        Self: Sized,
    {
        Samples {
            engine: self,
            pool,
            remaining: iterations,
        }
    }
}

/// Iterator returned by [`Engine::sample`]. Stops after the first error.
pub struct Samples<'a, E: Engine> {
    engine: &'a mut E,
    pool: &'a WorkerPool,
    remaining: usize,
}

impl<E: Engine> Iterator for Samples<'_, E> {
    type Item = Result<Step, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let step = self.engine.step(self.pool);
        if step.is_err() {
            self.remaining = 0;
        }
        Some(step)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

/// Worker threads for posterior evaluation; serial when no pool is attached.
#[derive(Clone, Default)]
pub struct WorkerPool {
    inner: Option<Arc<ThreadPool>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .finish()
    }
}

impl WorkerPool {
    pub fn serial() -> Self {
        Self::default()
    }

    /// Builds a dedicated pool of `threads` workers; one thread means serial.
    pub fn with_threads(threads: usize) -> Result<Self, ThreadPoolBuildError> {
        if threads <= 1 {
            return Ok(Self::serial());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("mcmc-worker-{i}"))
            .build()?;
        Ok(Self::from_pool(Arc::new(pool)))
    }

    /// Wraps a pool owned by the caller.
    pub fn from_pool(pool: Arc<ThreadPool>) -> Self {
        Self { inner: Some(pool) }
    }

    pub fn threads(&self) -> usize {
        self.inner.as_ref().map_or(1, |p| p.current_num_threads())
    }

    /// Evaluates `f(0..n)`, in parallel when a pool is attached.
    pub fn map<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Send + Sync,
    {
        match &self.inner {
            Some(pool) => pool.install(|| (0..n).into_par_iter().map(&f).collect()),
            None => (0..n).map(f).collect(),
        }
    }

    /// Maps `f` over every item by mutable reference, in parallel when a pool is
    /// attached. Output order follows item order.
    pub fn map_mut<T, R, F>(&self, items: &mut [T], f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(usize, &mut T) -> R + Send + Sync,
    {
        match &self.inner {
            Some(pool) => pool.install(|| {
                items
                    .par_iter_mut()
                    .enumerate()
                    .map(|(i, item)| f(i, item))
                    .collect()
            }),
            None => items
                .iter_mut()
                .enumerate()
                .map(|(i, item)| f(i, item))
                .collect(),
        }
    }
}
