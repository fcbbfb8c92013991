//! Atomic on-disk persistence of in-progress chains.
//!
//! A run owns a single file, `<outdir>/<label>_checkpoint.bin`, replaced after
//! every completed batch: the record is written to a temporary file in the same
//! directory, synced, then renamed over the previous checkpoint.

use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::chain::Chain;
use crate::error::CheckpointError;

/// Everything needed to continue a run: the chain so far and its burn-in, if
/// an engine pre-pass decided it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Completed iterations, pre-pass included.
    pub iteration: usize,
    pub chain: Chain,
    /// Burn-in length chosen by an engine pre-pass.
    pub nburn: Option<usize>,
}

impl CheckpointRecord {
    pub fn new(chain: Chain, nburn: Option<usize>) -> Self {
        Self {
            iteration: chain.len(),
            chain,
            nburn,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.iteration != self.chain.len() {
            return Err(format!(
                "iteration count {} does not match the {} stored iterations",
                self.iteration,
                self.chain.len()
            ));
        }
        self.chain.check()?;
        if let Some(nburn) = self.nburn {
            if nburn > self.iteration {
                return Err(format!(
                    "burn-in {nburn} exceeds the {} stored iterations",
                    self.iteration
                ));
            }
        }
        Ok(())
    }
}

/// The checkpoint file of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(outdir: impl AsRef<Path>, label: &str) -> Self {
        Self {
            path: outdir.as_ref().join(format!("{label}_checkpoint.bin")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Atomically replaces the checkpoint with `record`.
    pub fn write(&self, record: &CheckpointRecord) -> Result<(), CheckpointError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|source| CheckpointError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let bytes = bincode::serialize(record)?;
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path)
            .map_err(|err| io_err(err.error))?;
        Ok(())
    }

    /// Loads the checkpoint.
    pub fn read(&self) -> Result<CheckpointRecord, CheckpointError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(self.path.clone()))
            }
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let record: CheckpointRecord = bincode::deserialize_from(BufReader::new(file))
            .map_err(|err| CheckpointError::Corrupt {
                path: self.path.clone(),
                reason: err.to_string(),
            })?;
        record.validate().map_err(|reason| CheckpointError::Corrupt {
            path: self.path.clone(),
            reason,
        })?;
        Ok(record)
    }
}
