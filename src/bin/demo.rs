//! Samples an uncorrelated 2D Gaussian with the stretch-move ensemble, resuming
//! from `outdir/demo_checkpoint.bin` when a previous run was interrupted.

use std::error::Error;

use mcmc_harness::distributions::{GaussianLikelihood, Prior, PriorDict};
use mcmc_harness::{kwargs, logging, run_sampler};
use tracing::info;

fn main() -> Result<(), Box<dyn Error>> {
    logging::init(1);

    let priors = PriorDict::new()
        .with("m", Prior::uniform(-10.0, 10.0))?
        .with("c", Prior::gaussian(0.0, 5.0))?
        .with("sigma", Prior::delta_function(1.0))?;
    let likelihood = GaussianLikelihood::new(vec![2.0, -1.0], vec![0.5, 1.5]);

    let result = run_sampler(
        "emcee",
        likelihood,
        priors,
        kwargs! {
            "nwalkers" => 32,
            "nsteps" => 2000,
            "checkpoint_interval" => 250,
            "outdir" => "outdir",
            "label" => "demo",
            "npool" => 4,
        },
    )?;

    let mean = result.posterior_mean();
    info!(
        samples = result.samples.nrows(),
        nburn = result.nburn,
        max_tau = ?result.meta.max_autocorrelation_time,
        "sampling finished"
    );
    for (label, value) in result.meta.parameter_labels.iter().zip(mean.iter()) {
        println!("{label}: {value:.3}");
    }
    Ok(())
}
