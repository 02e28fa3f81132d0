//! Optimizers and learning rate schedules.

pub mod scheduler;
pub mod sgd;

pub use scheduler::{LRScheduler, StepDecay};
pub use sgd::Sgd;

use crate::error::Result;
use crate::model::{Parameter, StateDict};

/// One group of parameters sharing a learning rate. The schedule mutates
/// `lr` in place at the top of every epoch.
#[derive(Debug, Clone)]
pub struct ParamGroup {
    pub lr: f32,
}

/// A trait for optimizers.
///
/// The optimizer never owns parameters - it receives borrowed
/// [`Parameter`] views for each update and keeps only its own per-parameter
/// state (keyed by parameter name, so state survives checkpointing).
pub trait Optimizer {
    /// The parameter groups, each with a mutable learning-rate field.
    fn param_groups(&self) -> &[ParamGroup];

    fn param_groups_mut(&mut self) -> &mut [ParamGroup];

    /// Clears every gradient accumulator.
    fn zero_gradients(&self, params: &mut [Parameter<'_>]) {
        for param in params {
            param.grad.fill(0.0);
        }
    }

    /// Applies one update step to every parameter from its gradient.
    fn step(&mut self, params: &mut [Parameter<'_>]) -> Result<()>;

    /// Snapshot of optimizer state for checkpointing.
    fn state_dict(&self) -> StateDict;

    /// Restores optimizer state from a snapshot.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()>;
}
