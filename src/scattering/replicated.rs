//! Device-replicated execution of the fixed transform.
//!
//! The trainable model has its own distribution layer; the scattering
//! transform does not belong to it (no parameters, nothing to all-reduce).
//! [`ReplicatedScattering`] is its standalone pipeline:
//!
//! 1. **Scatter** - the batch is split into `len(devices)` contiguous
//!    shards of `ceil(len / devices)` rows; shard *i* goes to device *i*.
//! 2. **Concurrent apply** - every device runs its own replica on its own
//!    shard, all at once. The calling thread blocks on the full barrier;
//!    there is no partial completion.
//! 3. **No gather** - results stay device-resident as [`ShardResult`]s in
//!    device-slot order. Whether and when to reconcile devices is the
//!    caller's decision, not this layer's.
//!
//! Replicas are created once at construction, bound to one slot each, and
//! never migrate. No locking: each replica is touched only by its own
//! device's execution, and the replicas themselves are stateless between
//! calls.

use crate::device::{DeviceId, DeviceSet};
use crate::error::{Result, TrainError};
use crate::scattering::ScatteringTransform;
use crate::tensor::Tensor;

/// The transform output for one shard, resident on the shard's device.
#[derive(Debug, Clone)]
pub struct ShardResult {
    device: DeviceId,
    batch_len: usize,
    features: Vec<Tensor<f32, 4>>,
}

impl ShardResult {
    /// The device this result lives on.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Number of examples in this shard.
    pub fn batch_len(&self) -> usize {
        self.batch_len
    }

    /// One feature map per scattering order.
    pub fn features(&self) -> &[Tensor<f32, 4>] {
        &self.features
    }
}

/// One transform replica per device, plus the scatter/apply plumbing.
pub struct ReplicatedScattering {
    devices: DeviceSet,
    // Slot i is bound to devices[i] for the process lifetime.
    replicas: Vec<ScatteringTransform>,
}

impl ReplicatedScattering {
    /// Instantiates one replica per device in `devices`.
    ///
    /// `DeviceSet` construction already rejects the empty set, so every
    /// `ReplicatedScattering` has at least one replica.
    pub fn new(scale: usize, devices: DeviceSet) -> Self {
        let replicas = devices
            .iter()
            .map(|_| ScatteringTransform::new(scale))
            .collect();
        Self { devices, replicas }
    }

    /// The device set this transform is replicated over.
    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    /// Feature maps produced per shard.
    pub fn num_orders(&self) -> usize {
        self.replicas[0].num_orders()
    }

    /// Shards `batch`, runs every device's replica concurrently, and
    /// returns the per-shard results in device-slot order.
    ///
    /// Shards that would be empty (batch smaller than the device count) are
    /// skipped, not an error. Each shard's transfer and execution happen on
    /// its device's worker; the call returns only when every device has
    /// finished.
    ///
    /// # Errors
    ///
    /// A failure on any device aborts the whole call with
    /// [`TrainError::DeviceExecution`] naming the failing slot - no partial
    /// results are returned.
    pub fn apply(&self, batch: &Tensor<f32, 4>) -> Result<Vec<ShardResult>> {
        let total = batch.shape()[0];
        let shard_size = total.div_ceil(self.devices.len());

        // (slot, start, len) for every non-empty shard.
        let plan: Vec<(usize, usize, usize)> = (0..self.devices.len())
            .map(|slot| {
                let start = (slot * shard_size).min(total);
                let len = shard_size.min(total - start);
                (slot, start, len)
            })
            .filter(|&(_, _, len)| len > 0)
            .collect();

        crossbeam::thread::scope(|s| {
            let handles: Vec<_> = plan
                .iter()
                .map(|&(slot, start, len)| {
                    let replica = &self.replicas[slot];
                    let handle = s.spawn(move |_| -> Result<Vec<Tensor<f32, 4>>> {
                        // Shard transfer happens here, on the device's own
                        // worker, so copies overlap across devices.
                        let shard = batch.narrow_batch(start, len)?;
                        Ok(replica.forward(&shard)?)
                    });
                    (slot, len, handle)
                })
                .collect();

            // Full barrier: join every device in slot order.
            handles
                .into_iter()
                .map(|(slot, len, handle)| {
                    let features = handle
                        .join()
                        .map_err(|_| TrainError::DeviceExecution {
                            device: slot,
                            reason: "transform replica panicked".to_string(),
                        })?
                        .map_err(|e| TrainError::DeviceExecution {
                            device: slot,
                            reason: e.to_string(),
                        })?;
                    Ok(ShardResult {
                        device: self.devices.get(slot).unwrap_or(DeviceId(slot)),
                        batch_len: len,
                        features,
                    })
                })
                .collect()
        })
        .expect("device workers are joined before the scope ends")
    }
}
