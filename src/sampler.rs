/*!
# Sampler Lifecycle

A [`Sampler`] drives one run of a wrapped engine through a fixed lifecycle:

1. [`Sampler::configure`] translates keyword arguments against the engine's
   schema and checks every constraint before anything is allocated.
2. [`Sampler::resume_check`] decides whether a checkpoint should be continued.
3. [`Sampler::initialize`] builds the engine, either from scratch or from the
   tail of the checkpointed chain, and runs the engine's burn-in pre-pass when
   `autoburnin` is requested.
4. [`Sampler::advance`] runs one batch and atomically rewrites the checkpoint.
5. [`Sampler::finalize`] trims burn-in and assembles the [`SamplerResult`].

[`Sampler::run`] chains these together, and [`run_sampler`] picks the engine by
name.

## Example Usage

```rust,no_run
use mcmc_harness::distributions::{GaussianLikelihood, Prior, PriorDict};
use mcmc_harness::kwargs;
use mcmc_harness::sampler::run_sampler;

let priors = PriorDict::new()
    .with("x", Prior::uniform(-10.0, 10.0)).unwrap()
    .with("y", Prior::uniform(-10.0, 10.0)).unwrap();
let likelihood = GaussianLikelihood::new(vec![1.0, -1.0], vec![0.5, 2.0]);

let result = run_sampler(
    "emcee",
    likelihood,
    priors,
    kwargs! { "nwalkers" => 32, "nsteps" => 1000, "outdir" => "outdir", "label" => "demo" },
).unwrap();
println!("posterior mean: {}", result.posterior_mean());
```
*/

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, info, info_span, warn, Span};

use crate::burnin::{BurnIn, BurnInEstimator, BurnInMethod};
use crate::chain::Chain;
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::config::{Configuration, Kwargs, Schema};
use crate::core::{BurninSettings, Engine, Step, WorkerPool};
use crate::distributions::PriorDict;
use crate::ensemble::Ensemble;
use crate::error::{ConfigError, SamplerError};
use crate::metropolis::Metropolis;
use crate::posterior::{Likelihood, LogPosterior, Posterior};
use crate::result::{assemble, ResultMeta, SamplerResult};
use crate::stats::RhatMulti;

/// Iterations appended by one call to [`Sampler::advance`].
pub type ChainDelta = Chain;

/// Binds an engine to the sampler lifecycle.
///
/// Adapters are stateless: everything they need arrives through the translated
/// [`Configuration`].
pub trait EngineAdapter {
    type Engine: Engine;

    /// Name used in logs, errors and result metadata.
    const NAME: &'static str;

    /// Whether [`Engine::burnin`] is implemented.
    const SUPPORTS_AUTOBURNIN: bool = false;

    /// Declared engine options.
    fn schema() -> &'static Schema;

    /// Rewrites accepted-but-ignored options to the values that take effect.
    fn normalize(_config: &mut Configuration) {}

    /// Checks cross-option constraints for a problem of dimension `ndim`.
    fn validate(config: &Configuration, ndim: usize) -> Result<(), ConfigError>;

    /// Builds a fresh engine. The worker pool is not part of the engine.
    fn build(
        posterior: Arc<dyn LogPosterior>,
        ndim: usize,
        config: &Configuration,
        seed: Option<u64>,
    ) -> Result<Self::Engine, ConfigError>;
}

/// A live engine together with the chain accumulated so far.
pub struct EngineHandle<E> {
    engine: E,
    chain: Chain,
    nburn: Option<usize>,
    resumed: bool,
    target: usize,
    monitor: Monitor,
}

impl<E: Engine> EngineHandle<E> {
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Every iteration so far, pre-pass included.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Burn-in decided by the engine's pre-pass.
    pub fn engine_burnin(&self) -> Option<usize> {
        self.nburn
    }

    /// The run continues a checkpoint.
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    pub fn completed(&self) -> usize {
        self.chain.len()
    }

    /// Iterations still to run before the budget is spent.
    pub fn remaining(&self) -> usize {
        self.target.saturating_sub(self.chain.len())
    }

    fn checkpoint_record(&self) -> CheckpointRecord {
        CheckpointRecord::new(self.chain.clone(), self.nburn)
    }
}

/// One run of engine `A` against likelihood `L`.
pub struct Sampler<A, L> {
    posterior: Arc<Posterior<L>>,
    config: Configuration,
    store: CheckpointStore,
    pool: WorkerPool,
    initial_positions: Option<Array2<f64>>,
    span: Span,
    _adapter: PhantomData<A>,
}

impl<A, L> Sampler<A, L>
where
    A: EngineAdapter,
    L: Likelihood + 'static,
{
    /// Translates `kwargs` for a problem of dimension `ndim`.
    ///
    /// Every configuration error is raised here, before an engine exists.
    pub fn configure(kwargs: Kwargs, ndim: usize) -> Result<Configuration, ConfigError> {
        let mut config = Configuration::translate(A::schema(), kwargs)?;
        A::normalize(&mut config);
        let settings = config.settings();
        if settings.autoburnin {
            if !A::SUPPORTS_AUTOBURNIN {
                return Err(ConfigError::Unsupported {
                    option: "autoburnin",
                    engine: A::NAME,
                });
            }
            if settings.nburn.is_some() {
                return Err(ConfigError::Constraint(
                    "`nburn` cannot be combined with `autoburnin`".into(),
                ));
            }
        }
        A::validate(&config, ndim)?;
        Ok(config)
    }

    pub fn new(likelihood: L, priors: PriorDict, kwargs: Kwargs) -> Result<Self, SamplerError> {
        priors.check_sampleable()?;
        let config = Self::configure(kwargs, priors.ndim())?;
        let settings = config.settings();
        let store = CheckpointStore::new(&settings.outdir, &settings.label);
        let pool = WorkerPool::with_threads(settings.npool)?;
        let span = info_span!("sampler", engine = A::NAME, label = %settings.label);
        Ok(Self {
            posterior: Arc::new(Posterior::new(likelihood, priors)),
            config,
            store,
            pool,
            initial_positions: None,
            span,
            _adapter: PhantomData,
        })
    }

    /// Evaluates walkers on `pool` instead of the one built from `npool`.
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    /// Starts a fresh run at `p0` (`[nwalkers, ndim]`) instead of prior draws.
    pub fn with_initial_positions(mut self, p0: Array2<f64>) -> Self {
        self.initial_positions = Some(p0);
        self
    }

    /// Emits every event of this run inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn posterior(&self) -> &Posterior<L> {
        &self.posterior
    }

    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.store
    }

    /// True iff resuming is enabled and a checkpoint file is present.
    pub fn resume_check(&self) -> bool {
        self.config.settings().resume && self.store.exists()
    }

    /// The checkpoint to continue and its last walker positions, if any.
    fn load_checkpoint(
        &self,
        nwalkers: usize,
        ndim: usize,
    ) -> Option<(CheckpointRecord, Array2<f64>)> {
        if !self.resume_check() {
            return None;
        }
        let record = match self.store.read() {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "ignoring unreadable checkpoint; starting a fresh run");
                return None;
            }
        };
        let chain = &record.chain;
        let p0 = chain
            .last_positions()
            .filter(|_| chain.nwalkers() == nwalkers && chain.ndim() == ndim);
        let Some(p0) = p0 else {
            warn!(
                path = %self.store.path().display(),
                checkpoint_walkers = chain.nwalkers(),
                checkpoint_ndim = chain.ndim(),
                checkpoint_iterations = chain.len(),
                nwalkers,
                ndim,
                "checkpoint does not match this run; starting a fresh run"
            );
            return None;
        };
        Some((record, p0))
    }

    fn initial_positions(
        &self,
        nwalkers: usize,
        ndim: usize,
        seed: Option<u64>,
    ) -> Result<Array2<f64>, SamplerError> {
        if let Some(p0) = &self.initial_positions {
            if p0.dim() != (nwalkers, ndim) {
                return Err(SamplerError::InitialPositions {
                    expected: [nwalkers, ndim],
                    found: p0.shape().to_vec(),
                });
            }
            return Ok(p0.clone());
        }
        let mut rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed.rotate_left(32)),
            None => SmallRng::from_entropy(),
        };
        Ok(self.posterior.priors().sample_walkers(nwalkers, &mut rng))
    }

    /// Builds the engine and places its walkers.
    ///
    /// A fresh run starts from the caller's positions or from prior draws and
    /// runs the burn-in pre-pass when requested. A resumed run starts from the
    /// last checkpointed positions and keeps the checkpointed pre-pass length
    /// whether or not `autoburnin` is still set.
    pub fn initialize(&self) -> Result<EngineHandle<A::Engine>, SamplerError> {
        let _entered = self.span.enter();
        let settings = self.config.settings();
        let ndim = self.posterior.priors().ndim();
        let nwalkers = self.config.nwalkers()?;
        let iterations = self.config.iterations()?;

        let record = self.load_checkpoint(nwalkers, ndim);
        let resumed = record.is_some();
        let completed = record.as_ref().map_or(0, |(r, _)| r.iteration);
        let seed = settings
            .seed
            .map(|seed| seed.wrapping_add(completed as u64));

        let posterior: Arc<dyn LogPosterior> = self.posterior.clone();
        let mut engine = A::build(posterior, ndim, &self.config, seed)?;

        let (chain, nburn) = match record {
            Some((record, p0)) => {
                info!(
                    iteration = record.iteration,
                    path = %self.store.path().display(),
                    "resuming from checkpoint"
                );
                engine.start(p0, &self.pool)?;
                // The pre-pass already sits at the head of the chain.
                let nburn = match (record.nburn, settings.autoburnin) {
                    (Some(nburn), false) => {
                        info!(nburn, "keeping the checkpointed burn-in pre-pass");
                        Some(nburn)
                    }
                    (None, true) => {
                        warn!(
                            "checkpoint holds no burn-in pre-pass and one cannot run on a \
                             resumed chain; the burn-in will be estimated"
                        );
                        None
                    }
                    (nburn, _) => nburn,
                };
                (record.chain, nburn)
            }
            None => {
                info!(nwalkers, ndim, iterations, "starting a fresh run");
                let p0 = self.initial_positions(nwalkers, ndim, seed)?;
                engine.start(p0, &self.pool)?;
                if settings.autoburnin {
                    let burnin = BurninSettings::from_config(&self.config)?;
                    let steps = engine.burnin(&burnin, &self.pool)?;
                    let chain = Chain::from_steps(nwalkers, ndim, &steps)?;
                    info!(nburn = steps.len(), "engine burn-in pre-pass finished");
                    let nburn = Some(steps.len());
                    self.store
                        .write(&CheckpointRecord::new(chain.clone(), nburn))?;
                    (chain, nburn)
                } else {
                    (Chain::empty(nwalkers, ndim), None)
                }
            }
        };

        let target = nburn.unwrap_or(0) + iterations;
        let monitor = Monitor::new(
            settings.progress,
            A::NAME,
            target,
            chain.len(),
            nwalkers,
            ndim,
        );
        Ok(EngineHandle {
            engine,
            chain,
            nburn,
            resumed,
            target,
            monitor,
        })
    }

    /// Runs `n_steps` iterations, appends them and rewrites the checkpoint.
    ///
    /// Nothing is appended when the engine fails part-way through the batch.
    pub fn advance(
        &self,
        handle: &mut EngineHandle<A::Engine>,
        n_steps: usize,
    ) -> Result<ChainDelta, SamplerError> {
        let _entered = self.span.enter();
        let EngineHandle {
            engine,
            monitor,
            chain,
            ..
        } = handle;
        let mut delta = Chain::empty(chain.nwalkers(), chain.ndim());
        for step in engine.sample(n_steps, &self.pool) {
            let step = step?;
            monitor.observe(&step);
            delta.push_step(&step)?;
        }
        handle.chain.extend(&delta)?;
        self.store.write(&handle.checkpoint_record())?;
        debug!(
            iteration = handle.chain.len(),
            path = %self.store.path().display(),
            "checkpoint written"
        );
        Ok(delta)
    }

    /// Trims burn-in and packages the chain.
    pub fn finalize(&self, handle: EngineHandle<A::Engine>) -> Result<SamplerResult, SamplerError> {
        let _entered = self.span.enter();
        handle.monitor.finish();
        let settings = self.config.settings();

        let burn = match (handle.nburn, settings.nburn) {
            (Some(nburn), _) => BurnIn {
                nburn,
                method: BurnInMethod::Engine,
                max_tau: None,
            },
            (None, Some(nburn)) => BurnIn {
                nburn,
                method: BurnInMethod::Fixed,
                max_tau: None,
            },
            (None, None) => BurnInEstimator::from_settings(settings)
                .with_span(self.span.clone())
                .estimate(handle.chain.positions()),
        };

        let meta = ResultMeta {
            sampler: A::NAME.to_owned(),
            label: settings.label.clone(),
            parameter_labels: self
                .posterior
                .priors()
                .search_keys()
                .into_iter()
                .map(str::to_owned)
                .collect(),
            nwalkers: handle.chain.nwalkers(),
            iterations: handle.chain.len(),
            burn_in_method: burn.method,
            max_autocorrelation_time: burn.max_tau,
            num_likelihood_evaluations: self.posterior.evaluations(),
            resumed: handle.resumed,
            config: self.config.to_map(),
        };
        let result = assemble(&handle.chain, burn, handle.engine.evidence(), meta)?;
        info!(
            nburn = result.nburn,
            samples = result.samples.nrows(),
            method = ?result.meta.burn_in_method,
            "run finished"
        );
        Ok(result)
    }

    /// Runs the whole lifecycle in batches of `checkpoint_interval` iterations
    /// and writes the result next to the checkpoint.
    pub fn run(&self) -> Result<SamplerResult, SamplerError> {
        let mut handle = self.initialize()?;
        let interval = self.config.settings().checkpoint_interval;
        while handle.remaining() > 0 {
            let n_steps = interval.min(handle.remaining());
            self.advance(&mut handle, n_steps)?;
        }
        let result = self.finalize(handle)?;

        let settings = self.config.settings();
        let path = SamplerResult::default_path(&settings.outdir, &settings.label);
        result.save_to_file(&path)?;
        let _entered = self.span.enter();
        info!(path = %path.display(), "result saved");
        Ok(result)
    }
}

/// Progress bar plus the running diagnostics shown in its message.
struct Monitor {
    bar: ProgressBar,
    rhat: RhatMulti,
    window: VecDeque<f64>,
}

impl Monitor {
    const WINDOW: usize = 100;

    fn new(
        enabled: bool,
        name: &'static str,
        total: usize,
        done: usize,
        nwalkers: usize,
        ndim: usize,
    ) -> Self {
        let bar = if enabled {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) =
            ProgressStyle::default_bar().template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_prefix(name);
        bar.set_position(done as u64);
        Self {
            bar,
            rhat: RhatMulti::new(nwalkers, ndim),
            window: VecDeque::with_capacity(Self::WINDOW),
        }
    }

    fn observe(&mut self, step: &Step) {
        self.window.push_front(step.acceptance_fraction());
        if self.window.len() > Self::WINDOW {
            self.window.pop_back();
        }
        self.rhat.step(step.positions.view());
        let accept = self.window.iter().sum::<f64>() / self.window.len() as f64;
        let message = match self.rhat.max() {
            Some(rhat) => format!("p(accept)≈{accept:.2} max(rhat)≈{rhat:.2}"),
            None => format!("p(accept)≈{accept:.2}"),
        };
        self.bar.set_message(message);
        self.bar.inc(1);
    }

    fn finish(&self) {
        self.bar.finish_with_message("Done!");
    }
}

/// Engines selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    /// Goodman–Weare stretch-move ensemble.
    Ensemble,
    /// Independent random-walk Metropolis walkers.
    Metropolis,
}

impl FromStr for SamplerKind {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "ensemble" | "emcee" | "stretch" => Ok(SamplerKind::Ensemble),
            "metropolis" | "mh" => Ok(SamplerKind::Metropolis),
            _ => Err(ConfigError::UnknownSampler(name.to_owned())),
        }
    }
}

/// Runs the engine registered under `name` to completion.
pub fn run_sampler<L: Likelihood + 'static>(
    name: &str,
    likelihood: L,
    priors: PriorDict,
    kwargs: Kwargs,
) -> Result<SamplerResult, SamplerError> {
    match name.parse::<SamplerKind>()? {
        SamplerKind::Ensemble => Sampler::<Ensemble, L>::new(likelihood, priors, kwargs)?.run(),
        SamplerKind::Metropolis => {
            Sampler::<Metropolis, L>::new(likelihood, priors, kwargs)?.run()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{GaussianLikelihood, Prior};
    use crate::kwargs;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    fn priors() -> PriorDict {
        PriorDict::new()
            .with("x", Prior::uniform(-10.0, 10.0))
            .unwrap()
            .with("y", Prior::uniform(-10.0, 10.0))
            .unwrap()
    }

    fn likelihood() -> GaussianLikelihood {
        GaussianLikelihood::new(vec![1.0, -1.0], vec![1.0, 0.5])
    }

    fn outdir_kwargs(dir: &std::path::Path, label: &str) -> Kwargs {
        kwargs! {
            "outdir" => dir.to_string_lossy().into_owned(),
            "label" => label,
            "progress" => false,
            "seed" => 5,
        }
    }

    #[test]
    fn test_sampler_kind_from_name() {
        assert_eq!("emcee".parse::<SamplerKind>().unwrap(), SamplerKind::Ensemble);
        assert_eq!("Stretch".parse::<SamplerKind>().unwrap(), SamplerKind::Ensemble);
        assert_eq!("mh".parse::<SamplerKind>().unwrap(), SamplerKind::Metropolis);
        assert_eq!(
            "dynesty".parse::<SamplerKind>(),
            Err(ConfigError::UnknownSampler("dynesty".into()))
        );
    }

    #[test]
    fn test_autoburnin_needs_engine_support() {
        let err = Sampler::<Metropolis, GaussianLikelihood>::configure(
            kwargs! { "autoburnin" => true },
            2,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Unsupported {
                option: "autoburnin",
                engine: "metropolis"
            }
        );
    }

    #[test]
    fn test_autoburnin_excludes_fixed_nburn() {
        let err = Sampler::<Ensemble, GaussianLikelihood>::configure(
            kwargs! { "nwalkers" => 10, "iterations" => 50, "autoburnin" => true, "nburn" => 5 },
            2,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Constraint(_)));
    }

    #[test]
    fn test_processes_is_reset() {
        let config = Sampler::<Ensemble, GaussianLikelihood>::configure(
            kwargs! { "nwalkers" => 10, "iterations" => 50, "processes" => 4 },
            2,
        )
        .unwrap();
        assert_eq!(config.count("processes").unwrap(), 1);
    }

    #[test]
    fn test_fixed_nburn_run() {
        let dir = tempdir().unwrap();
        let mut kw = outdir_kwargs(dir.path(), "fixed");
        kw.extend(kwargs! { "n_chains" => 4, "n_collect" => 60, "nburn" => 10, "checkpoint_interval" => 25 });
        let sampler = Sampler::<Metropolis, _>::new(likelihood(), priors(), kw).unwrap();
        let result = sampler.run().unwrap();

        assert_eq!(result.nburn, 10);
        assert_eq!(result.meta.burn_in_method, BurnInMethod::Fixed);
        assert_eq!(result.samples.shape(), &[50 * 4, 2]);
        assert_eq!(result.walkers.shape(), &[4, 60, 2]);
        assert_eq!(result.meta.parameter_labels, vec!["x", "y"]);
        assert!(result.meta.num_likelihood_evaluations > 0);
        assert!(!result.meta.resumed);
        assert!(sampler.checkpoint_store().exists());
        assert!(SamplerResult::default_path(dir.path(), "fixed").is_file());
    }

    #[test]
    fn test_too_large_nburn_is_not_converged() {
        let dir = tempdir().unwrap();
        let mut kw = outdir_kwargs(dir.path(), "burn");
        kw.extend(kwargs! { "nwalkers" => 4, "iterations" => 20, "nburn" => 20 });
        let sampler = Sampler::<Metropolis, _>::new(likelihood(), priors(), kw).unwrap();
        assert!(matches!(
            sampler.run(),
            Err(SamplerError::NotConverged { nburn: 20, nsteps: 20 })
        ));
    }

    #[test]
    fn test_initial_positions_shape_is_checked() {
        let dir = tempdir().unwrap();
        let mut kw = outdir_kwargs(dir.path(), "p0");
        kw.extend(kwargs! { "nwalkers" => 4, "iterations" => 20 });
        let sampler = Sampler::<Metropolis, _>::new(likelihood(), priors(), kw)
            .unwrap()
            .with_initial_positions(Array2::zeros((3, 2)));
        assert!(matches!(
            sampler.initialize(),
            Err(SamplerError::InitialPositions { expected: [4, 2], .. })
        ));
    }

    #[test]
    fn test_mismatched_checkpoint_starts_fresh() {
        let dir = tempdir().unwrap();
        let mut kw = outdir_kwargs(dir.path(), "shape");
        kw.extend(kwargs! { "nwalkers" => 4, "iterations" => 30 });
        let first = Sampler::<Metropolis, _>::new(likelihood(), priors(), kw.clone()).unwrap();
        let mut handle = first.initialize().unwrap();
        first.advance(&mut handle, 10).unwrap();

        kw.insert("nwalkers".into(), 6.into());
        let second = Sampler::<Metropolis, _>::new(likelihood(), priors(), kw).unwrap();
        assert!(second.resume_check());
        let handle = second.initialize().unwrap();
        assert!(!handle.resumed());
        assert_eq!(handle.completed(), 0);
        assert_eq!(handle.remaining(), 30);
    }

    #[test]
    fn test_autoburnin_is_recorded_and_reused() {
        let dir = tempdir().unwrap();
        let mut kw = outdir_kwargs(dir.path(), "auto");
        kw.extend(kwargs! {
            "nwalkers" => 16,
            "iterations" => 40,
            "autoburnin" => true,
            "test_steps" => 8,
            "max_steps" => 32,
        });
        let sampler = Sampler::<Ensemble, _>::new(likelihood(), priors(), kw.clone()).unwrap();
        let handle = sampler.initialize().unwrap();
        let nburn = handle.engine_burnin().unwrap();
        // The first KS comparison needs two batches.
        assert!((16..=32).contains(&nburn));
        assert_eq!(handle.completed(), nburn);
        assert_eq!(handle.remaining(), 40);

        let resumed = Sampler::<Ensemble, _>::new(likelihood(), priors(), kw).unwrap();
        let handle = resumed.initialize().unwrap();
        assert!(handle.resumed());
        assert_eq!(handle.engine_burnin(), Some(nburn));

        let result = resumed.run().unwrap();
        assert_eq!(result.nburn, nburn);
        assert_eq!(result.meta.burn_in_method, BurnInMethod::Engine);
        assert_eq!(result.walkers.shape()[1], nburn + 40);
        assert_eq!(result.samples.nrows(), 40 * 16);
        assert_abs_diff_eq!(result.posterior_mean()[0], 1.0, epsilon = 0.5);
    }

    fn autoburnin_kwargs(dir: &std::path::Path, label: &str, autoburnin: bool) -> Kwargs {
        let mut kw = outdir_kwargs(dir, label);
        kw.extend(kwargs! {
            "nwalkers" => 16,
            "iterations" => 40,
            "autoburnin" => autoburnin,
            "test_steps" => 8,
            "max_steps" => 32,
        });
        kw
    }

    #[test]
    fn test_checkpointed_burnin_survives_disabling_autoburnin() {
        let dir = tempdir().unwrap();
        let kw = autoburnin_kwargs(dir.path(), "keep", true);
        let first = Sampler::<Ensemble, _>::new(likelihood(), priors(), kw).unwrap();
        let mut handle = first.initialize().unwrap();
        let nburn = handle.engine_burnin().unwrap();
        first.advance(&mut handle, 10).unwrap();

        let kw = autoburnin_kwargs(dir.path(), "keep", false);
        let second = Sampler::<Ensemble, _>::new(likelihood(), priors(), kw).unwrap();
        let handle = second.initialize().unwrap();
        assert!(handle.resumed());
        assert_eq!(handle.engine_burnin(), Some(nburn));
        assert_eq!(handle.completed(), nburn + 10);
        assert_eq!(handle.remaining(), 30);

        let result = second.run().unwrap();
        assert_eq!(result.nburn, nburn);
        assert_eq!(result.meta.burn_in_method, BurnInMethod::Engine);
        assert_eq!(result.samples.nrows(), 40 * 16);
    }

    #[test]
    fn test_autoburnin_on_resume_without_prepass_estimates() {
        let dir = tempdir().unwrap();
        let kw = autoburnin_kwargs(dir.path(), "late", false);
        let first = Sampler::<Ensemble, _>::new(likelihood(), priors(), kw).unwrap();
        let mut handle = first.initialize().unwrap();
        first.advance(&mut handle, 10).unwrap();

        let kw = autoburnin_kwargs(dir.path(), "late", true);
        let second = Sampler::<Ensemble, _>::new(likelihood(), priors(), kw).unwrap();
        let handle = second.initialize().unwrap();
        assert!(handle.resumed());
        assert_eq!(handle.engine_burnin(), None);
        assert_eq!(handle.remaining(), 30);

        let result = second.run().unwrap();
        assert_ne!(result.meta.burn_in_method, BurnInMethod::Engine);
        assert_eq!(result.walkers.shape(), &[16, 40, 2]);
    }

    #[test]
    fn test_autoburnin_with_truncated_last_batch() {
        let dir = tempdir().unwrap();
        let mut kw = outdir_kwargs(dir.path(), "short");
        kw.extend(kwargs! {
            "nwalkers" => 4,
            "iterations" => 20,
            "autoburnin" => true,
            "test_steps" => 16,
            "max_steps" => 17,
            "critical_pval" => 1.0,
        });
        let sampler = Sampler::<Ensemble, _>::new(likelihood(), priors(), kw).unwrap();
        let handle = sampler.initialize().unwrap();
        let nburn = handle.engine_burnin().unwrap();
        assert_eq!(nburn, 17);
        let result = sampler.run().unwrap();
        assert_eq!(result.samples.nrows(), 20 * 4);
    }
}
