/*!
The canonical output record of a run.

[`assemble`] turns a chain and its burn-in into a [`SamplerResult`]: samples
after burn-in are flattened iteration-major into `[n_samples, ndim]`, the
matching blobs become the log-likelihood and log-prior arrays, and the whole
chain is kept per walker as `[walker, iteration, dim]`.
*/

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::burnin::{BurnIn, BurnInMethod};
use crate::chain::Chain;
use crate::config::Value;
use crate::error::SamplerError;

/// Run metadata stored alongside the samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    /// Engine name.
    pub sampler: String,
    pub label: String,
    /// Names of the sampled parameters, in column order.
    pub parameter_labels: Vec<String>,
    pub nwalkers: usize,
    /// Iterations in the full chain, burn-in included.
    pub iterations: usize,
    pub burn_in_method: BurnInMethod,
    pub max_autocorrelation_time: Option<f64>,
    pub num_likelihood_evaluations: u64,
    /// The run continued from a checkpoint.
    pub resumed: bool,
    /// Flattened configuration, run keys prefixed with `run.`.
    pub config: BTreeMap<String, Value>,
}

/// Samples and diagnostics of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerResult {
    /// Post burn-in samples, `[n_samples, ndim]`.
    pub samples: Array2<f64>,
    pub log_likelihood_evaluations: Array1<f64>,
    pub log_prior_evaluations: Array1<f64>,
    /// Full trajectory of every walker, `[walker, iteration, dim]`.
    pub walkers: Array3<f64>,
    pub nburn: usize,
    pub log_evidence: Option<f64>,
    pub log_evidence_err: Option<f64>,
    pub meta: ResultMeta,
}

/// Packages `chain` after discarding `burn.nburn` iterations.
///
/// Fails with [`SamplerError::NotConverged`] when nothing would remain.
pub fn assemble(
    chain: &Chain,
    burn: BurnIn,
    evidence: Option<(f64, f64)>,
    mut meta: ResultMeta,
) -> Result<SamplerResult, SamplerError> {
    let nsteps = chain.len();
    if burn.nburn >= nsteps {
        return Err(SamplerError::NotConverged {
            nburn: burn.nburn,
            nsteps,
        });
    }
    let kept = chain.tail(burn.nburn);
    let n_samples = kept.len() * kept.nwalkers();

    let samples = kept
        .positions()
        .to_owned()
        .into_shape_with_order((n_samples, kept.ndim()))?;
    let blobs = kept.blobs().to_owned().into_shape_with_order((n_samples, 2))?;
    let walkers = chain
        .positions()
        .permuted_axes([1, 0, 2])
        .as_standard_layout()
        .into_owned();

    meta.iterations = nsteps;
    meta.nwalkers = chain.nwalkers();
    meta.burn_in_method = burn.method;
    meta.max_autocorrelation_time = burn.max_tau;

    Ok(SamplerResult {
        samples,
        log_likelihood_evaluations: blobs.column(0).to_owned(),
        log_prior_evaluations: blobs.column(1).to_owned(),
        walkers,
        nburn: burn.nburn,
        log_evidence: evidence.map(|(z, _)| z),
        log_evidence_err: evidence.map(|(_, err)| err),
        meta,
    })
}

impl SamplerResult {
    /// `<outdir>/<label>_result.json`.
    pub fn default_path(outdir: impl AsRef<Path>, label: &str) -> PathBuf {
        outdir.as_ref().join(format!("{label}_result.json"))
    }

    pub fn ndim(&self) -> usize {
        self.samples.ncols()
    }

    /// Mean of the post burn-in samples per parameter.
    pub fn posterior_mean(&self) -> Array1<f64> {
        self.samples
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::from_elem(self.ndim(), f64::NAN))
    }

    /// Samples of one parameter by name.
    pub fn parameter(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let idx = self.meta.parameter_labels.iter().position(|l| l == name)?;
        Some(self.samples.column(idx))
    }

    /// Writes the result as JSON, creating parent directories.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), SamplerError> {
        let path = path.as_ref();
        let io_err = |source| SamplerError::ResultIo {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = File::create(path).map_err(io_err)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, SamplerError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SamplerError::ResultIo {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}
