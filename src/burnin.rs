//! Burn-in length estimation from the integrated autocorrelation time.

use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn, Span};

use crate::config::RunSettings;
use crate::error::AutocorrError;
use crate::stats::{integrated_time, max_finite};

/// How the burn-in length of a run was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnInMethod {
    /// `burn_in_act` times the largest autocorrelation time.
    Autocorrelation,
    /// Fallback fraction of the chain.
    Fraction,
    /// Fixed by configuration.
    Fixed,
    /// Decided by the engine's own pre-pass.
    Engine,
}

/// Result of burn-in estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurnIn {
    pub nburn: usize,
    pub method: BurnInMethod,
    /// Largest per-dimension autocorrelation time, when it could be computed.
    pub max_tau: Option<f64>,
}

/// Discards `burn_in_act` autocorrelation times, falling back to a fraction of
/// the chain when the estimate cannot be trusted.
#[derive(Debug, Clone)]
pub struct BurnInEstimator {
    pub burn_in_act: f64,
    pub burn_in_fraction: f64,
    pub c: f64,
    pub tol: f64,
    span: Span,
}

impl BurnInEstimator {
    pub fn new(burn_in_act: f64, burn_in_fraction: f64, c: f64, tol: f64) -> Self {
        Self {
            burn_in_act,
            burn_in_fraction,
            c,
            tol,
            span: Span::none(),
        }
    }

    pub fn from_settings(settings: &RunSettings) -> Self {
        Self::new(
            settings.burn_in_act,
            settings.burn_in_fraction,
            settings.autocorr_c,
            settings.autocorr_tol,
        )
    }

    /// Emits diagnostics inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Estimates the burn-in of a `[iteration, walker, dim]` chain. Never fails.
    pub fn estimate(&self, chain: ArrayView3<f64>) -> BurnIn {
        let _entered = self.span.enter();
        let n_steps = chain.len_of(ndarray::Axis(0));

        match integrated_time(chain, self.c, self.tol) {
            Ok(tau) => {
                let max_tau = max_finite(tau.view());
                if let Some(max_tau) = max_tau {
                    let nburn = (self.burn_in_act * max_tau).floor() as usize;
                    debug!(max_tau, nburn, "autocorrelation-based burn-in");
                    return BurnIn {
                        nburn,
                        method: BurnInMethod::Autocorrelation,
                        max_tau: Some(max_tau),
                    };
                }
                self.fallback(n_steps, "no finite autocorrelation time", None)
            }
            Err(err) => {
                let max_tau = match &err {
                    AutocorrError::Unreliable { tau, .. } => {
                        max_finite(ndarray::ArrayView1::from(tau.as_slice()))
                    }
                    _ => None,
                };
                self.fallback(n_steps, &err.to_string(), max_tau)
            }
        }
    }

    fn fallback(&self, n_steps: usize, reason: &str, max_tau: Option<f64>) -> BurnIn {
        let nburn = (self.burn_in_fraction * n_steps as f64).floor() as usize;
        warn!(
            reason,
            nburn,
            burn_in_fraction = self.burn_in_fraction,
            "autocorrelation time unavailable; discarding a fixed fraction of the chain"
        );
        BurnIn {
            nburn,
            method: BurnInMethod::Fraction,
            max_tau,
        }
    }
}
