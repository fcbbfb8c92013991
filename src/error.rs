//! Error types for every fallible stage of a sampling run.

use std::path::PathBuf;

/// Raised while translating caller keyword arguments into a [`crate::config::Configuration`].
///
/// Every variant is produced before any engine resources are allocated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The key is neither a run setting nor understood by the engine.
    #[error("unknown option `{key}` for the {engine} sampler")]
    UnknownKey {
        /// The rejected key, as supplied.
        key: String,
        /// Name of the engine schema that was consulted.
        engine: &'static str,
    },

    /// Several supplied keys resolve to the same canonical option.
    #[error("options {supplied:?} all refer to `{canonical}`; supply only one")]
    Conflict {
        /// Canonical option name.
        canonical: &'static str,
        /// The keys supplied by the caller that map onto it.
        supplied: Vec<String>,
    },

    /// The value does not match the declared type of the option.
    #[error("option `{key}` expects {expected}, got {found}")]
    InvalidValue {
        /// Canonical option name.
        key: &'static str,
        /// Human readable description of the accepted type.
        expected: &'static str,
        /// Rendering of the rejected value.
        found: String,
    },

    /// A cross-option rule was violated.
    #[error("{0}")]
    Constraint(String),

    /// The option exists but the selected engine cannot honour it.
    #[error("the {engine} sampler does not support `{option}`")]
    Unsupported {
        /// Canonical option name.
        option: &'static str,
        /// Engine name.
        engine: &'static str,
    },

    /// No engine is registered under the requested name.
    #[error("unknown sampler `{0}`")]
    UnknownSampler(String),
}

/// Failure raised from inside a sampling engine.
///
/// These are passed to the caller unchanged; progress that was already
/// checkpointed stays valid for a later resume.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The engine was handed inputs it cannot work with.
    #[error("invalid engine inputs: {0}")]
    InvalidInputs(String),

    /// A walker position or its log posterior is not a number.
    #[error("walker {walker} produced a non-finite value: {what}")]
    NonFinite {
        /// Index of the offending walker.
        walker: usize,
        /// What went wrong.
        what: &'static str,
    },

    /// The engine does not implement the requested procedure.
    #[error("the engine does not implement {0}")]
    Unsupported(&'static str),

    /// `step` was called before `start`.
    #[error("engine has not been started")]
    NotStarted,

    /// The burn-in pre-pass could not evaluate its stopping test.
    #[error("burn-in test failed: {0}")]
    BurnIn(#[from] KsError),
}

/// Reading or writing the checkpoint file failed.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// No checkpoint exists at the expected location.
    #[error("no checkpoint at {0}")]
    NotFound(PathBuf),

    /// The filesystem refused the operation.
    #[error("checkpoint I/O failed for {path}: {source}")]
    Io {
        /// Checkpoint (or temporary) file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not hold a consistent record.
    #[error("checkpoint at {path} is corrupt: {reason}")]
    Corrupt {
        /// Checkpoint file.
        path: PathBuf,
        /// Description of the inconsistency.
        reason: String,
    },

    /// The record could not be encoded.
    #[error("could not encode checkpoint: {0}")]
    Encode(#[from] bincode::Error),
}

/// The integrated autocorrelation time could not be estimated reliably.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AutocorrError {
    /// Fewer iterations than the estimator needs.
    #[error("chain has {n_steps} iterations, at least {required} are needed")]
    TooShort {
        /// Iterations available.
        n_steps: usize,
        /// Iterations needed.
        required: usize,
    },

    /// The estimate exceeds the trust threshold `n_steps / tol`.
    #[error(
        "the chain is shorter than {tol} times the integrated autocorrelation time \
         for {n_unreliable} parameter(s); current estimate: {tau:?}"
    )]
    Unreliable {
        /// Per-dimension estimates.
        tau: Vec<f64>,
        /// Threshold factor that was applied.
        tol: f64,
        /// Number of dimensions failing the check.
        n_unreliable: usize,
    },

    /// A dimension has zero variance or non-finite samples.
    #[error("dimension {dim} is constant or contains non-finite values")]
    Degenerate {
        /// Offending dimension.
        dim: usize,
    },
}

/// Invalid input to the two-sample Kolmogorov–Smirnov test.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KsError {
    /// One of the samples is empty.
    #[error("sample {0} is empty")]
    EmptySample(usize),

    /// The asymptotic p-value needs more than seven observations per sample.
    #[error("samples of size {n1} and {n2} are too small; both need more than 7 values")]
    TooSmall {
        /// First sample size.
        n1: usize,
        /// Second sample size.
        n2: usize,
    },

    /// The statistic fell outside the support of the KS distribution.
    #[error("bad z = {0} for the KS distribution")]
    BadStatistic(f64),
}

/// Invalid prior specification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PriorError {
    /// Lower bound not strictly below the upper bound.
    #[error("prior `{name}` needs minimum < maximum, got [{minimum}, {maximum}]")]
    InvalidBounds {
        /// Parameter name.
        name: String,
        /// Lower bound.
        minimum: f64,
        /// Upper bound.
        maximum: f64,
    },

    /// Scale parameter is not strictly positive.
    #[error("prior `{name}` needs a positive width, got {value}")]
    InvalidScale {
        /// Parameter name.
        name: String,
        /// Offending value.
        value: f64,
    },

    /// Every parameter is fixed; there is nothing to sample.
    #[error("no parameter has a non-fixed prior")]
    NothingToSample,
}

/// Top-level error returned by the sampler lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    /// See [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The burn-in length leaves no usable samples.
    #[error(
        "the run has finished, but the chain is not burned in: nburn ({nburn}) must be \
         smaller than the {nsteps} sampled iterations; try increasing the number of steps"
    )]
    NotConverged {
        /// Burn-in length that was computed or configured.
        nburn: usize,
        /// Iterations in the chain.
        nsteps: usize,
    },

    /// See [`EngineError`].
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Persisting progress failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// See [`PriorError`].
    #[error(transparent)]
    Prior(#[from] PriorError),

    /// Caller supplied initial positions of the wrong shape.
    #[error("initial positions have shape {found:?}, expected {expected:?}")]
    InitialPositions {
        /// Expected `[nwalkers, ndim]`.
        expected: [usize; 2],
        /// Supplied shape.
        found: Vec<usize>,
    },

    /// The worker pool could not be created.
    #[error("could not build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// Writing or reading a result file failed.
    #[error("result file {path}: {source}")]
    ResultIo {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A result file could not be (de)serialized.
    #[error("result serialization failed: {0}")]
    ResultFormat(#[from] serde_json::Error),

    /// Array reshaping failed while assembling output.
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}
