//! Accumulated ensemble history.

use ndarray::prelude::*;
use ndarray::ShapeError;
use serde::{Deserialize, Serialize};

use crate::core::Step;

/// Walker positions `[iteration, walker, dim]` and blobs `[iteration, walker, 2]`.
///
/// The blob axis holds `(log_likelihood, log_prior)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    positions: Array3<f64>,
    blobs: Array3<f64>,
}

impl Chain {
    pub fn empty(nwalkers: usize, ndim: usize) -> Self {
        Self {
            positions: Array3::zeros((0, nwalkers, ndim)),
            blobs: Array3::zeros((0, nwalkers, 2)),
        }
    }

    /// Builds a chain from consecutive steps.
    pub fn from_steps(nwalkers: usize, ndim: usize, steps: &[Step]) -> Result<Self, ShapeError> {
        let mut chain = Self::empty(nwalkers, ndim);
        for step in steps {
            chain.push_step(step)?;
        }
        Ok(chain)
    }

    /// Reassembles a chain from raw arrays, checking that they agree.
    pub fn from_parts(positions: Array3<f64>, blobs: Array3<f64>) -> Result<Self, String> {
        let chain = Self { positions, blobs };
        chain.check()?;
        Ok(chain)
    }

    pub(crate) fn check(&self) -> Result<(), String> {
        let (n, w, _) = self.positions.dim();
        let expected = (n, w, 2);
        if self.blobs.dim() != expected {
            return Err(format!(
                "blob array has shape {:?}, expected {:?}",
                self.blobs.shape(),
                expected
            ));
        }
        Ok(())
    }

    /// Number of iterations stored.
    pub fn len(&self) -> usize {
        self.positions.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nwalkers(&self) -> usize {
        self.positions.len_of(Axis(1))
    }

    pub fn ndim(&self) -> usize {
        self.positions.len_of(Axis(2))
    }

    pub fn positions(&self) -> ArrayView3<'_, f64> {
        self.positions.view()
    }

    pub fn blobs(&self) -> ArrayView3<'_, f64> {
        self.blobs.view()
    }

    pub fn log_likelihood(&self) -> ArrayView2<'_, f64> {
        self.blobs.index_axis(Axis(2), 0)
    }

    pub fn log_prior(&self) -> ArrayView2<'_, f64> {
        self.blobs.index_axis(Axis(2), 1)
    }

    /// Appends one iteration.
    pub fn push_step(&mut self, step: &Step) -> Result<(), ShapeError> {
        self.positions.push(Axis(0), step.positions.view())?;
        let blob = ndarray::stack(
            Axis(1),
            &[step.log_likelihood.view(), step.log_prior.view()],
        )?;
        self.blobs.push(Axis(0), blob.view())
    }

    /// Appends every iteration of `other`.
    pub fn extend(&mut self, other: &Chain) -> Result<(), ShapeError> {
        self.positions.append(Axis(0), other.positions.view())?;
        self.blobs.append(Axis(0), other.blobs.view())
    }

    /// Walker positions of the final iteration.
    pub fn last_positions(&self) -> Option<Array2<f64>> {
        let n = self.len();
        (n > 0).then(|| self.positions.index_axis(Axis(0), n - 1).to_owned())
    }

    /// Iterations `start..`, as a new chain.
    pub fn tail(&self, start: usize) -> Chain {
        let start = start.min(self.len());
        Chain {
            positions: self.positions.slice(s![start.., .., ..]).to_owned(),
            blobs: self.blobs.slice(s![start.., .., ..]).to_owned(),
        }
    }
}
