//! Configuration translation and resume detection through the public lifecycle.

use mcmc_harness::config::Value;
use mcmc_harness::distributions::{GaussianLikelihood, Prior, PriorDict};
use mcmc_harness::ensemble::Ensemble;
use mcmc_harness::error::{ConfigError, PriorError};
use mcmc_harness::metropolis::Metropolis;
use mcmc_harness::{kwargs, run_sampler, Sampler, SamplerError};
use tempfile::tempdir;

fn priors() -> PriorDict {
    PriorDict::new()
        .with("a", Prior::uniform(-5.0, 5.0))
        .unwrap()
        .with("b", Prior::gaussian(0.0, 2.0))
        .unwrap()
}

fn likelihood() -> GaussianLikelihood {
    GaussianLikelihood::new(vec![0.0, 0.0], vec![1.0, 1.0])
}

#[test]
fn test_nsteps_becomes_iterations() {
    let config = Sampler::<Ensemble, GaussianLikelihood>::configure(
        kwargs! { "nsteps" => 200, "nwalkers" => 20 },
        2,
    )
    .unwrap();
    assert_eq!(config.get("iterations"), Some(&Value::Int(200)));
    assert!(config.get("nsteps").is_none());
    assert!(config.keys().all(|k| k != "nsteps"));
}

#[test]
fn test_walkers_must_be_fewer_than_iterations() {
    let err = Sampler::<Ensemble, GaussianLikelihood>::new(
        likelihood(),
        priors(),
        kwargs! { "nwalkers" => 500, "iterations" => 100 },
    )
    .err()
    .unwrap();
    assert!(matches!(err, SamplerError::Config(ConfigError::Constraint(_))));
}

#[test]
fn test_odd_walkers_and_small_ensembles_are_rejected() {
    for kw in [
        kwargs! { "nwalkers" => 11, "iterations" => 100 },
        kwargs! { "nwalkers" => 2, "iterations" => 100 },
        kwargs! { "nwalkers" => 10, "iterations" => 100, "a" => 0.5 },
    ] {
        let err = Sampler::<Ensemble, GaussianLikelihood>::configure(kw, 2).unwrap_err();
        assert!(matches!(err, ConfigError::Constraint(_)), "{err}");
    }
}

#[test]
fn test_unknown_and_conflicting_keys() {
    let err = Sampler::<Metropolis, GaussianLikelihood>::configure(kwargs! { "a" => 2.0 }, 2)
        .unwrap_err();
    assert_eq!(
        err,
        ConfigError::UnknownKey {
            key: "a".into(),
            engine: "metropolis"
        }
    );

    let err = Sampler::<Metropolis, GaussianLikelihood>::configure(
        kwargs! { "n_steps" => 10, "nsteps" => 20 },
        2,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Conflict {
            canonical: "iterations",
            ..
        }
    ));
}

#[test]
fn test_resume_check_on_empty_outdir() {
    let dir = tempdir().unwrap();
    let sampler = Sampler::<Ensemble, _>::new(
        likelihood(),
        priors(),
        kwargs! {
            "nwalkers" => 10,
            "iterations" => 100,
            "outdir" => dir.path().to_string_lossy().into_owned(),
            "label" => "empty",
        },
    )
    .unwrap();
    assert!(!sampler.resume_check());
}

#[test]
fn test_resume_disabled_ignores_checkpoint() {
    let dir = tempdir().unwrap();
    let kw = kwargs! {
        "nwalkers" => 4,
        "iterations" => 20,
        "outdir" => dir.path().to_string_lossy().into_owned(),
        "label" => "fresh",
        "progress" => false,
    };
    let first = Sampler::<Metropolis, _>::new(likelihood(), priors(), kw.clone()).unwrap();
    let mut handle = first.initialize().unwrap();
    first.advance(&mut handle, 5).unwrap();
    assert!(first.resume_check());

    let mut kw = kw;
    kw.insert("resume".into(), false.into());
    let second = Sampler::<Metropolis, _>::new(likelihood(), priors(), kw).unwrap();
    assert!(!second.resume_check());
    let handle = second.initialize().unwrap();
    assert!(!handle.resumed());
    assert_eq!(handle.completed(), 0);
    // The previous checkpoint is left in place.
    assert!(second.checkpoint_store().exists());
}

#[test]
fn test_unknown_sampler_name() {
    let err = run_sampler("dynesty", likelihood(), priors(), kwargs! {}).unwrap_err();
    assert!(matches!(
        err,
        SamplerError::Config(ConfigError::UnknownSampler(name)) if name == "dynesty"
    ));
}

#[test]
fn test_all_fixed_priors_are_rejected() {
    let priors = PriorDict::new()
        .with("a", Prior::delta_function(1.0))
        .unwrap();
    let err = Sampler::<Metropolis, _>::new(likelihood(), priors, kwargs! {})
        .err()
        .unwrap();
    assert!(matches!(err, SamplerError::Prior(PriorError::NothingToSample)));
}
