//! Trainable-model collaborator interface.
//!
//! The orchestrator never looks inside the network. It needs exactly this
//! much surface: mode switching, a forward pass over device-resident
//! scattering features, a backward pass from the loss gradient, and
//! parameter access for the optimizer and the checkpoint store.

use std::collections::HashMap;

use crate::error::Result;
use crate::scattering::ShardResult;
use crate::tensor::Tensor;

/// Flattened named parameter snapshot, the serialization currency shared by
/// models, optimizers and the checkpoint store. Rank 1 on purpose - the
/// owner is responsible for reshaping on load.
pub type StateDict = HashMap<String, Tensor<f32, 1>>;

/// A borrowed flat view of one trainable parameter and its gradient
/// accumulator. The views are handed to the optimizer for one update and
/// dropped; nothing holds them across batches.
pub struct Parameter<'a> {
    pub name: &'a str,
    pub value: &'a mut [f32],
    pub grad: &'a mut [f32],
}

/// The trainable network, as seen by the training orchestrator.
///
/// `forward` receives the ordered shard results produced by
/// [`ReplicatedScattering`](crate::scattering::ReplicatedScattering) - one
/// entry per non-empty shard, in device-slot order. The model's own
/// distribution layer decides how to reconcile devices; implementations
/// must rely on positional correspondence, not device identifiers.
pub trait Model: Send {
    /// Switches to training mode (activations cached for backward).
    fn train_mode(&mut self);

    /// Switches to evaluation mode (no caching, no gradient bookkeeping).
    fn eval_mode(&mut self);

    /// Computes class scores `[batch, classes]` for the given shard
    /// sequence. The batch dimension is the sum of the shard lengths.
    fn forward(&mut self, features: &[ShardResult]) -> Result<Tensor<f32, 2>>;

    /// Backpropagates `d(loss)/d(scores)` from the most recent training
    /// forward pass, accumulating into parameter gradients.
    fn backward(&mut self, score_grad: &Tensor<f32, 2>) -> Result<()>;

    /// Flat views of every trainable parameter, in a stable order with
    /// stable names across calls.
    fn parameters(&mut self) -> Vec<Parameter<'_>>;

    /// Snapshot of all parameters for checkpointing.
    fn state_dict(&self) -> StateDict;

    /// Restores parameters from a snapshot.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()>;
}
