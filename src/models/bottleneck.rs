//! Bottleneck classifier head over scattering features.
//!
//! The reference trainable network: global-average-pools every scattering
//! order down to one value per channel, concatenates the orders into a flat
//! feature vector, and pushes it through a configurable stack of
//! linear+ReLU bottleneck stages to class scores. The stage widths and
//! depths come straight from the bottleneck spec in
//! [`TrainConfig`](crate::config::TrainConfig).
//!
//! Gradients are hand-rolled - a plain MLP backward over cached
//! activations. Real deployments swap in their own [`Model`]; the
//! orchestrator only sees the trait.

use rand::Rng;
use rayon::prelude::*;

use crate::error::{Result, TrainError};
use crate::model::{Model, Parameter, StateDict};
use crate::scattering::ShardResult;
use crate::tensor::Tensor;

struct DenseLayer {
    weight: Vec<f32>, // [out, in], row-major
    bias: Vec<f32>,
    weight_grad: Vec<f32>,
    bias_grad: Vec<f32>,
    weight_name: String,
    bias_name: String,
    in_dim: usize,
    out_dim: usize,
    relu: bool,
    // Caches from the last training-mode forward, consumed by backward.
    cached_input: Vec<f32>,
    cached_output: Vec<f32>,
}

impl DenseLayer {
    fn new(index: usize, in_dim: usize, out_dim: usize, relu: bool) -> Self {
        // Xavier-uniform init.
        let mut rng = rand::rng();
        let bound = (6.0 / (in_dim + out_dim) as f64).sqrt();
        let weight = (0..in_dim * out_dim)
            .map(|_| rng.random_range(-bound..bound) as f32)
            .collect();

        Self {
            weight,
            bias: vec![0.0; out_dim],
            weight_grad: vec![0.0; in_dim * out_dim],
            bias_grad: vec![0.0; out_dim],
            weight_name: format!("layers.{index}.weight"),
            bias_name: format!("layers.{index}.bias"),
            in_dim,
            out_dim,
            relu,
            cached_input: Vec::new(),
            cached_output: Vec::new(),
        }
    }

    fn forward(&mut self, input: &[f32], batch: usize, training: bool) -> Vec<f32> {
        let mut output = vec![0.0f32; batch * self.out_dim];
        let in_dim = self.in_dim;
        let out_dim = self.out_dim;
        let weight = &self.weight;
        let bias = &self.bias;
        let relu = self.relu;

        output
            .par_chunks_mut(out_dim)
            .enumerate()
            .for_each(|(b, row)| {
                let x = &input[b * in_dim..(b + 1) * in_dim];
                for (o, out) in row.iter_mut().enumerate() {
                    let w = &weight[o * in_dim..(o + 1) * in_dim];
                    let mut acc = bias[o];
                    for (xi, wi) in x.iter().zip(w) {
                        acc += xi * wi;
                    }
                    *out = if relu { acc.max(0.0) } else { acc };
                }
            });

        if training {
            self.cached_input = input.to_vec();
            self.cached_output = output.clone();
        }
        output
    }

    /// Consumes this layer's caches; returns the gradient w.r.t. its input.
    fn backward(&mut self, delta: &[f32], batch: usize) -> Result<Vec<f32>> {
        if self.cached_input.len() != batch * self.in_dim {
            return Err(TrainError::Config(
                "backward called without a matching training-mode forward".to_string(),
            ));
        }

        let mut delta = delta.to_vec();
        if self.relu {
            // Post-activation cache: zero output means the unit was clamped.
            for (d, &y) in delta.iter_mut().zip(&self.cached_output) {
                if y <= 0.0 {
                    *d = 0.0;
                }
            }
        }

        for b in 0..batch {
            let d = &delta[b * self.out_dim..(b + 1) * self.out_dim];
            let x = &self.cached_input[b * self.in_dim..(b + 1) * self.in_dim];
            for (o, &dv) in d.iter().enumerate() {
                self.bias_grad[o] += dv;
                let w_grad = &mut self.weight_grad[o * self.in_dim..(o + 1) * self.in_dim];
                for (g, &xv) in w_grad.iter_mut().zip(x) {
                    *g += dv * xv;
                }
            }
        }

        let mut input_grad = vec![0.0f32; batch * self.in_dim];
        for b in 0..batch {
            let d = &delta[b * self.out_dim..(b + 1) * self.out_dim];
            let gi = &mut input_grad[b * self.in_dim..(b + 1) * self.in_dim];
            for (o, &dv) in d.iter().enumerate() {
                let w = &self.weight[o * self.in_dim..(o + 1) * self.in_dim];
                for (g, &wv) in gi.iter_mut().zip(w) {
                    *g += dv * wv;
                }
            }
        }

        self.cached_input.clear();
        self.cached_output.clear();
        Ok(input_grad)
    }
}

/// The bottleneck classifier head.
pub struct BottleneckHead {
    layers: Vec<DenseLayer>,
    in_features: usize,
    training: bool,
    last_batch: usize,
}

impl BottleneckHead {
    /// Builds the stage stack: for each `(width, depth)` pair, `depth`
    /// linear+ReLU layers of that width, then a final linear projection to
    /// `num_classes`.
    ///
    /// `in_features` must equal `channels * num_orders` of the scattering
    /// transform feeding this head.
    ///
    /// # Errors
    ///
    /// Malformed stage specs - empty, length-mismatched, or zero-sized
    /// entries - are configuration errors.
    pub fn new(
        in_features: usize,
        widths: &[usize],
        depths: &[usize],
        num_classes: usize,
    ) -> Result<Self> {
        if widths.is_empty() || widths.len() != depths.len() {
            return Err(TrainError::Config(format!(
                "bottleneck spec needs matching non-empty width/depth lists, got {} widths and {} depths",
                widths.len(),
                depths.len()
            )));
        }
        if in_features == 0 || num_classes == 0 {
            return Err(TrainError::Config(
                "bottleneck head needs non-zero feature and class counts".to_string(),
            ));
        }
        if let Some(bad) = widths.iter().chain(depths.iter()).find(|&&v| v == 0) {
            return Err(TrainError::Config(format!(
                "bottleneck spec entries must be positive, got {bad}"
            )));
        }

        let mut layers = Vec::new();
        let mut prev = in_features;
        for (&width, &depth) in widths.iter().zip(depths) {
            for _ in 0..depth {
                layers.push(DenseLayer::new(layers.len(), prev, width, true));
                prev = width;
            }
        }
        layers.push(DenseLayer::new(layers.len(), prev, num_classes, false));

        Ok(Self {
            layers,
            in_features,
            training: false,
            last_batch: 0,
        })
    }

    /// Pools each shard's feature maps to per-channel means and stacks the
    /// shards, in slot order, into a flat `[batch, features]` buffer.
    fn pool_features(&self, features: &[ShardResult]) -> Result<(Vec<f32>, usize)> {
        if features.is_empty() {
            return Err(TrainError::Config(
                "model forward requires at least one shard result".to_string(),
            ));
        }

        let mut pooled = Vec::new();
        let mut batch = 0;
        for shard in features {
            let len = shard.batch_len();
            batch += len;
            for b in 0..len {
                for order in shard.features() {
                    let [_, channels, h, w] = *order.shape();
                    let area = (h * w) as f32;
                    let data = order.data();
                    for c in 0..channels {
                        let plane = &data[(b * channels + c) * h * w..][..h * w];
                        pooled.push(plane.iter().sum::<f32>() / area);
                    }
                }
            }
        }

        if pooled.len() != batch * self.in_features {
            return Err(TrainError::Config(format!(
                "scattering features provide {} values per example, head expects {}",
                pooled.len() / batch.max(1),
                self.in_features
            )));
        }
        Ok((pooled, batch))
    }
}

impl Model for BottleneckHead {
    fn train_mode(&mut self) {
        self.training = true;
    }

    fn eval_mode(&mut self) {
        self.training = false;
    }

    fn forward(&mut self, features: &[ShardResult]) -> Result<Tensor<f32, 2>> {
        let (mut activ, batch) = self.pool_features(features)?;
        let training = self.training;
        for layer in &mut self.layers {
            activ = layer.forward(&activ, batch, training);
        }
        self.last_batch = batch;
        let classes = activ.len() / batch;
        Ok(Tensor::new(activ, [batch, classes])?)
    }

    fn backward(&mut self, score_grad: &Tensor<f32, 2>) -> Result<()> {
        let [batch, _] = *score_grad.shape();
        if !self.training || batch != self.last_batch {
            return Err(TrainError::Config(
                "backward requires a training-mode forward on the same batch".to_string(),
            ));
        }
        let mut delta = score_grad.data().to_vec();
        for layer in self.layers.iter_mut().rev() {
            delta = layer.backward(&delta, batch)?;
        }
        Ok(())
    }

    fn parameters(&mut self) -> Vec<Parameter<'_>> {
        let mut params = Vec::with_capacity(self.layers.len() * 2);
        for layer in &mut self.layers {
            params.push(Parameter {
                name: &layer.weight_name,
                value: &mut layer.weight,
                grad: &mut layer.weight_grad,
            });
            params.push(Parameter {
                name: &layer.bias_name,
                value: &mut layer.bias,
                grad: &mut layer.bias_grad,
            });
        }
        params
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for layer in &self.layers {
            let w = layer.weight.clone();
            let b = layer.bias.clone();
            let w_len = w.len();
            let b_len = b.len();
            state.insert(
                layer.weight_name.clone(),
                Tensor::new(w, [w_len]).expect("weight length matches its shape"),
            );
            state.insert(
                layer.bias_name.clone(),
                Tensor::new(b, [b_len]).expect("bias length matches its shape"),
            );
        }
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        for layer in &mut self.layers {
            for (name, target) in [
                (&layer.weight_name, &mut layer.weight),
                (&layer.bias_name, &mut layer.bias),
            ] {
                let tensor = state.get(name).ok_or_else(|| {
                    TrainError::Config(format!("state dict is missing parameter '{name}'"))
                })?;
                if tensor.size() != target.len() {
                    return Err(TrainError::Config(format!(
                        "parameter '{}' has {} elements, expected {}",
                        name,
                        tensor.size(),
                        target.len()
                    )));
                }
                target.copy_from_slice(tensor.data());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSet;
    use crate::loss::cross_entropy;
    use crate::optim::{Optimizer, Sgd};
    use crate::scattering::ReplicatedScattering;

    fn features_for(batch: Tensor<f32, 4>, scale: usize, devices: usize) -> Vec<ShardResult> {
        let scat = ReplicatedScattering::new(scale, DeviceSet::new(devices).unwrap());
        scat.apply(&batch).unwrap()
    }

    #[test]
    fn test_forward_shape() {
        // 2 channels, scale 1 -> 2 orders -> 4 features per example.
        let mut head = BottleneckHead::new(4, &[8], &[2], 5).unwrap();
        let batch = Tensor::zeros([3, 2, 4, 4]);
        let scores = head.forward(&features_for(batch, 1, 2)).unwrap();
        assert_eq!(scores.shape(), &[3, 5]);
    }

    #[test]
    fn test_malformed_spec_rejected() {
        assert!(matches!(
            BottleneckHead::new(4, &[], &[], 5),
            Err(TrainError::Config(_))
        ));
        assert!(matches!(
            BottleneckHead::new(4, &[8, 16], &[2], 5),
            Err(TrainError::Config(_))
        ));
        assert!(matches!(
            BottleneckHead::new(4, &[8, 0], &[2, 2], 5),
            Err(TrainError::Config(_))
        ));
    }

    #[test]
    fn test_feature_width_mismatch_rejected() {
        let mut head = BottleneckHead::new(10, &[8], &[1], 5).unwrap();
        let batch = Tensor::zeros([2, 1, 4, 4]);
        // 1 channel x 2 orders = 2 features, head expects 10.
        let result = head.forward(&features_for(batch, 1, 1));
        assert!(matches!(result, Err(TrainError::Config(_))));
    }

    #[test]
    fn test_backward_requires_training_forward() {
        let mut head = BottleneckHead::new(2, &[4], &[1], 3).unwrap();
        let grad = Tensor::zeros([2, 3]);
        assert!(matches!(
            head.backward(&grad),
            Err(TrainError::Config(_))
        ));
    }

    #[test]
    fn test_state_dict_round_trip() {
        let head = BottleneckHead::new(4, &[8], &[2], 5).unwrap();
        let state = head.state_dict();

        let mut other = BottleneckHead::new(4, &[8], &[2], 5).unwrap();
        other.load_state_dict(&state).unwrap();
        // 3 layers (2 bottleneck + projection), weight + bias each.
        assert_eq!(state.len(), 6);
        assert_eq!(other.state_dict().get("layers.0.weight").unwrap().data(),
                   state.get("layers.0.weight").unwrap().data());
    }

    #[test]
    fn test_training_reduces_loss() {
        // Two trivially separable classes: constant-0 images vs constant-1
        // images. A few SGD steps must reduce the cross-entropy.
        let mut head = BottleneckHead::new(2, &[8], &[1], 2).unwrap();
        let mut sgd = Sgd::new(0.1, 0.0, 0.0);
        head.train_mode();

        let mut images = vec![0.0f32; 32];
        images[32 / 2..].fill(1.0);
        let batch = Tensor::new(images, [2, 1, 4, 4]).unwrap();
        let targets = vec![0usize, 1];
        let features = features_for(batch, 1, 1);

        let first = cross_entropy(&head.forward(&features).unwrap(), &targets)
            .unwrap()
            .loss;
        let mut last = first;
        for _ in 0..60 {
            let scores = head.forward(&features).unwrap();
            let out = cross_entropy(&scores, &targets).unwrap();
            last = out.loss;
            {
                let mut params = head.parameters();
                sgd.zero_gradients(&mut params);
            }
            head.backward(&out.score_grad).unwrap();
            let mut params = head.parameters();
            sgd.step(&mut params).unwrap();
        }
        assert!(
            last < first,
            "loss did not decrease: {first} -> {last}"
        );
    }
}
