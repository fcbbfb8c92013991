/*!
Checkpointed, resumable orchestration of ensemble MCMC samplers.

A run goes through [`sampler::Sampler`]: keyword options are translated against
the engine's declared schema ([`config`]), the chain is advanced in batches and
persisted after each one ([`checkpoint`]), burn-in is estimated from the
integrated autocorrelation time ([`burnin`]) and the post burn-in samples are
packaged as a [`result::SamplerResult`].

Two engines are bundled: the affine-invariant stretch-move ensemble
([`ensemble`]) and independent random-walk Metropolis walkers ([`metropolis`]).
*/

pub mod burnin;
pub mod chain;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod distributions;
pub mod ensemble;
pub mod error;
pub mod io;
pub mod logging;
pub mod metropolis;
pub mod posterior;
pub mod result;
pub mod sampler;
pub mod stats;

pub use crate::config::{Kwargs, Value};
pub use crate::error::SamplerError;
pub use crate::result::SamplerResult;
pub use crate::sampler::{run_sampler, Sampler, SamplerKind};
