//! Checkpoint persistence.
//!
//! One [`TrainCheckpoint`] record per save, serialized with `safetensors`:
//! parameter snapshots become rank-1 tensors under `model.`/`optim.` key
//! prefixes, the scalar fields travel in the safetensors metadata map.
//!
//! Two files per run directory:
//!
//! - `checkpoint` - the latest record, replaced atomically as a whole
//!   (write to a temp file, then rename).
//! - `model_best` - a byte-identical file-level copy of some prior
//!   `checkpoint` write. Never a second serialization, so best and latest
//!   cannot diverge when they represent the same epoch.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::error::{Result, TrainError};
use crate::model::StateDict;
use crate::tensor::Tensor;

const LATEST_FILE: &str = "checkpoint";
const BEST_FILE: &str = "model_best";
const MODEL_PREFIX: &str = "model.";
const OPTIM_PREFIX: &str = "optim.";

/// A durable snapshot of training progress.
#[derive(Debug, Clone)]
pub struct TrainCheckpoint {
    /// Next epoch to run on resume; −1 marks the pre-training smoke-test
    /// write.
    pub epoch: i64,
    /// Architecture identifier the weights belong to.
    pub arch: String,
    /// Model parameter snapshot.
    pub model_state: StateDict,
    /// Optimizer state snapshot; absent on the smoke-test write.
    pub optimizer_state: Option<StateDict>,
    /// Best validation top-1 accuracy seen so far.
    pub best_metric: f64,
}

/// Persists and restores [`TrainCheckpoint`] records in a run directory.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Opens (and creates, if needed) the run directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| TrainError::CheckpointIo {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    /// Path of the latest record.
    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(LATEST_FILE)
    }

    /// Path of the best-by-validation record.
    pub fn best_path(&self) -> PathBuf {
        self.dir.join(BEST_FILE)
    }

    /// Serializes `record` to the latest location, replacing any prior
    /// latest atomically. When `is_best`, the just-written file is then
    /// duplicated to the best location.
    pub fn save(&self, record: &TrainCheckpoint, is_best: bool) -> Result<()> {
        let bytes = serialize_record(record)
            .map_err(|reason| self.io_error(&self.latest_path(), reason))?;

        let latest = self.latest_path();
        let tmp = self.dir.join(format!("{LATEST_FILE}.tmp"));
        fs::write(&tmp, &bytes).map_err(|e| TrainError::CheckpointIo {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &latest).map_err(|e| TrainError::CheckpointIo {
            path: latest.clone(),
            source: e,
        })?;

        if is_best {
            let best = self.best_path();
            let best_tmp = self.dir.join(format!("{BEST_FILE}.tmp"));
            fs::copy(&latest, &best_tmp).map_err(|e| TrainError::CheckpointIo {
                path: best_tmp.clone(),
                source: e,
            })?;
            fs::rename(&best_tmp, &best).map_err(|e| TrainError::CheckpointIo {
                path: best.clone(),
                source: e,
            })?;
        }

        tracing::debug!(
            epoch = record.epoch,
            is_best,
            path = %latest.display(),
            "saved checkpoint"
        );
        Ok(())
    }

    /// Deserializes a record from `path`.
    ///
    /// # Errors
    ///
    /// A missing file is [`TrainError::CheckpointNotFound`]; a file that
    /// exists but lacks required fields is
    /// [`TrainError::CheckpointCorrupt`]. The two are never conflated.
    pub fn load(path: impl AsRef<Path>) -> Result<TrainCheckpoint> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrainError::CheckpointNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(TrainError::CheckpointIo {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        let record = deserialize_record(&bytes).map_err(|reason| TrainError::CheckpointCorrupt {
            path: path.to_path_buf(),
            reason,
        })?;
        tracing::debug!(epoch = record.epoch, path = %path.display(), "loaded checkpoint");
        Ok(record)
    }

    fn io_error(&self, path: &Path, reason: String) -> TrainError {
        TrainError::CheckpointIo {
            path: path.to_path_buf(),
            source: std::io::Error::other(reason),
        }
    }
}

fn serialize_record(record: &TrainCheckpoint) -> std::result::Result<Vec<u8>, String> {
    let mut metadata = HashMap::new();
    metadata.insert("epoch".to_string(), record.epoch.to_string());
    metadata.insert("arch".to_string(), record.arch.clone());
    metadata.insert("best_metric".to_string(), record.best_metric.to_string());

    // Collect (name, bytes, shape) rows first; TensorView borrows the bytes.
    let mut rows: Vec<(String, Vec<u8>, Vec<usize>)> = Vec::new();
    push_state(&mut rows, MODEL_PREFIX, &record.model_state);
    if let Some(optim) = &record.optimizer_state {
        push_state(&mut rows, OPTIM_PREFIX, optim);
    }

    let mut views = Vec::with_capacity(rows.len());
    for (name, bytes, shape) in &rows {
        let view = TensorView::new(Dtype::F32, shape.clone(), bytes)
            .map_err(|e| format!("building tensor view for '{name}': {e:?}"))?;
        views.push((name.clone(), view));
    }

    safetensors::serialize(views, &Some(metadata)).map_err(|e| format!("serialize failed: {e:?}"))
}

fn push_state(rows: &mut Vec<(String, Vec<u8>, Vec<usize>)>, prefix: &str, state: &StateDict) {
    for (name, tensor) in state {
        let bytes = tensor
            .data()
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect::<Vec<u8>>();
        rows.push((
            format!("{prefix}{name}"),
            bytes,
            tensor.shape().to_vec(),
        ));
    }
}

fn deserialize_record(bytes: &[u8]) -> std::result::Result<TrainCheckpoint, String> {
    let (_, header) =
        SafeTensors::read_metadata(bytes).map_err(|e| format!("unreadable header: {e:?}"))?;
    let metadata = header
        .metadata()
        .as_ref()
        .ok_or_else(|| "missing metadata block".to_string())?;

    let epoch = metadata
        .get("epoch")
        .ok_or_else(|| "missing field 'epoch'".to_string())?
        .parse::<i64>()
        .map_err(|e| format!("field 'epoch' is not an integer: {e}"))?;
    let arch = metadata
        .get("arch")
        .ok_or_else(|| "missing field 'arch'".to_string())?
        .clone();
    let best_metric = metadata
        .get("best_metric")
        .ok_or_else(|| "missing field 'best_metric'".to_string())?
        .parse::<f64>()
        .map_err(|e| format!("field 'best_metric' is not a number: {e}"))?;

    let tensors =
        SafeTensors::deserialize(bytes).map_err(|e| format!("unreadable tensors: {e:?}"))?;

    let mut model_state = StateDict::new();
    let mut optimizer_state = StateDict::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(format!("tensor '{name}' has dtype {:?}, expected F32", view.dtype()));
        }
        let data: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let len = data.len();
        let tensor =
            Tensor::new(data, [len]).map_err(|e| format!("tensor '{name}' is malformed: {e}"))?;

        if let Some(stripped) = name.strip_prefix(MODEL_PREFIX) {
            model_state.insert(stripped.to_string(), tensor);
        } else if let Some(stripped) = name.strip_prefix(OPTIM_PREFIX) {
            optimizer_state.insert(stripped.to_string(), tensor);
        } else {
            return Err(format!("unexpected tensor '{name}' in checkpoint"));
        }
    }

    Ok(TrainCheckpoint {
        epoch,
        arch,
        model_state,
        optimizer_state: (!optimizer_state.is_empty()).then_some(optimizer_state),
        best_metric,
    })
}
