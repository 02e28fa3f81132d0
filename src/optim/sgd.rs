//! Stochastic gradient descent with momentum and weight decay.

use std::collections::HashMap;

use rayon::prelude::*;

use super::{Optimizer, ParamGroup};
use crate::error::{Result, TrainError};
use crate::model::{Parameter, StateDict};
use crate::tensor::Tensor;

/// SGD with momentum and L2 weight decay folded into the gradient:
///
/// ```text
/// g = grad + weight_decay * param
/// v = momentum * v + g
/// param = param - lr * v
/// ```
///
/// Velocity buffers are lazily created per parameter name and carried in
/// the optimizer's state dict, so a resumed run continues with the same
/// momentum history.
pub struct Sgd {
    groups: Vec<ParamGroup>,
    momentum: f32,
    weight_decay: f32,
    velocity: HashMap<String, Vec<f32>>,
}

impl Sgd {
    pub fn new(lr: f32, momentum: f32, weight_decay: f32) -> Self {
        Self {
            groups: vec![ParamGroup { lr }],
            momentum,
            weight_decay,
            velocity: HashMap::new(),
        }
    }
}

const VELOCITY_PREFIX: &str = "velocity.";

impl Optimizer for Sgd {
    fn param_groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }

    fn step(&mut self, params: &mut [Parameter<'_>]) -> Result<()> {
        let lr = self.groups[0].lr;
        let momentum = self.momentum;
        let weight_decay = self.weight_decay;

        for param in params {
            let velocity = self
                .velocity
                .entry(param.name.to_string())
                .or_insert_with(|| vec![0.0; param.value.len()]);
            if velocity.len() != param.value.len() {
                return Err(TrainError::Config(format!(
                    "velocity buffer for '{}' has {} elements, parameter has {}",
                    param.name,
                    velocity.len(),
                    param.value.len()
                )));
            }

            param
                .value
                .par_iter_mut()
                .zip(param.grad.par_iter())
                .zip(velocity.par_iter_mut())
                .for_each(|((p, g), v)| {
                    let g = *g + weight_decay * *p;
                    *v = momentum * *v + g;
                    *p -= lr * *v;
                });
        }
        Ok(())
    }

    fn state_dict(&self) -> StateDict {
        self.velocity
            .iter()
            .map(|(name, v)| {
                let len = v.len();
                (
                    format!("{VELOCITY_PREFIX}{name}"),
                    Tensor::new(v.clone(), [len]).expect("velocity length matches its shape"),
                )
            })
            .collect()
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        self.velocity.clear();
        for (key, tensor) in state {
            let name = key.strip_prefix(VELOCITY_PREFIX).ok_or_else(|| {
                TrainError::Config(format!("unexpected optimizer state key '{key}'"))
            })?;
            self.velocity
                .insert(name.to_string(), tensor.data().to_vec());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_once(sgd: &mut Sgd, value: &mut [f32], grad: &mut [f32]) {
        let mut params = vec![Parameter {
            name: "w",
            value,
            grad,
        }];
        sgd.step(&mut params).unwrap();
    }

    #[test]
    fn test_plain_step() {
        let mut sgd = Sgd::new(0.1, 0.0, 0.0);
        let mut value = vec![1.0, 2.0];
        let mut grad = vec![0.5, -0.5];
        step_once(&mut sgd, &mut value, &mut grad);

        // param - lr * grad
        assert!((value[0] - 0.95).abs() < 1e-6);
        assert!((value[1] - 2.05).abs() < 1e-6);
    }

    #[test]
    fn test_momentum_accumulates() {
        let mut sgd = Sgd::new(1.0, 0.5, 0.0);
        let mut value = vec![0.0];
        let mut grad = vec![1.0];

        // v1 = 1.0 -> p = -1.0; v2 = 0.5 + 1.0 = 1.5 -> p = -2.5
        step_once(&mut sgd, &mut value, &mut grad);
        assert!((value[0] + 1.0).abs() < 1e-6);
        let mut grad = vec![1.0];
        step_once(&mut sgd, &mut value, &mut grad);
        assert!((value[0] + 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_weight_decay_pulls_toward_zero() {
        let mut sgd = Sgd::new(0.1, 0.0, 0.1);
        let mut value = vec![1.0];
        let mut grad = vec![0.0];
        step_once(&mut sgd, &mut value, &mut grad);
        // g = 0 + 0.1 * 1.0; p = 1.0 - 0.1 * 0.1
        assert!((value[0] - 0.99).abs() < 1e-6);
    }

    #[test]
    fn test_state_dict_round_trip() {
        let mut sgd = Sgd::new(0.1, 0.9, 0.0);
        let mut value = vec![1.0, 1.0];
        let mut grad = vec![0.25, -0.25];
        step_once(&mut sgd, &mut value, &mut grad);

        let state = sgd.state_dict();
        assert_eq!(state.len(), 1);

        let mut restored = Sgd::new(0.1, 0.9, 0.0);
        restored.load_state_dict(&state).unwrap();
        assert_eq!(restored.velocity.get("w"), sgd.velocity.get("w"));
    }

    #[test]
    fn test_load_rejects_foreign_keys() {
        let mut sgd = Sgd::new(0.1, 0.9, 0.0);
        let mut state = StateDict::new();
        state.insert("m.w".to_string(), Tensor::new(vec![0.0], [1]).unwrap());
        assert!(matches!(
            sgd.load_state_dict(&state),
            Err(TrainError::Config(_))
        ));
    }

    #[test]
    fn test_zero_gradients_default() {
        let sgd = Sgd::new(0.1, 0.0, 0.0);
        let mut value = vec![1.0];
        let mut grad = vec![3.0];
        let mut params = vec![Parameter {
            name: "w",
            value: &mut value,
            grad: &mut grad,
        }];
        sgd.zero_gradients(&mut params);
        assert_eq!(grad, vec![0.0]);
    }
}
