//! Crate error taxonomy.
//!
//! A single [`TrainError`] enum spans every fallible seam in the crate, with
//! [`Result`] as the crate-wide alias. The variants mirror the taxonomy in the
//! design: configuration problems, per-device execution failures, the three
//! distinct checkpoint conditions (not-found / corrupt / I/O), and data
//! decoding failures.

use std::path::PathBuf;

use thiserror::Error;

use crate::tensor::TensorError;

/// Crate-wide result alias over [`TrainError`].
pub type Result<T> = std::result::Result<T, TrainError>;

/// The error taxonomy shared by every fallible operation in the crate.
#[derive(Debug, Error)]
pub enum TrainError {
    /// Invalid or inconsistent configuration supplied by the caller.
    #[error("configuration error: {0}")]
    Config(String),

    /// A batch could not be produced or decoded by the data source.
    #[error("data error: {0}")]
    Data(String),

    /// A scattering replica failed while executing on a specific device slot.
    #[error("device {device} execution failed: {reason}")]
    DeviceExecution {
        /// Zero-based device slot whose replica failed.
        device: usize,
        /// Human-readable cause of the failure.
        reason: String,
    },

    /// A checkpoint file was expected but does not exist.
    #[error("checkpoint not found: {path}")]
    CheckpointNotFound {
        /// Path that was probed.
        path: PathBuf,
    },

    /// A checkpoint file exists but could not be parsed into a record.
    #[error("checkpoint at {path} is corrupt: {reason}")]
    CheckpointCorrupt {
        /// Path of the offending file.
        path: PathBuf,
        /// Why the record could not be reconstructed.
        reason: String,
    },

    /// A filesystem operation against a checkpoint path failed.
    #[error("checkpoint I/O error at {path}: {source}")]
    CheckpointIo {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl From<TensorError> for TrainError {
    /// Tensor shape and bounds failures surface as configuration errors, per
    /// the spec: a caller supplying a mismatched shape is a configuration
    /// problem, not a distinct error class.
    fn from(err: TensorError) -> Self {
        TrainError::Config(err.to_string())
    }
}
