//! Cross-entropy loss over class scores.

use crate::error::{Result, TrainError};
use crate::tensor::Tensor;

/// Output of [`cross_entropy`]: the scalar batch loss and the gradient of
/// that loss with respect to the scores, ready to feed into the model's
/// backward pass.
pub struct CrossEntropyOutput {
    /// Mean negative log-likelihood over the batch. Always a single scalar;
    /// there is no multi-element loss shape in this crate.
    pub loss: f32,
    /// `d(loss)/d(scores)`, shape `[batch, classes]`.
    pub score_grad: Tensor<f32, 2>,
}

/// Computes mean cross-entropy of `scores` (`[batch, classes]`, unnormalized
/// logits) against integer `targets`.
///
/// Softmax is computed with the row-max subtracted, the numerically stable
/// formulation: `log(sum(exp(s - max))) + max - s[target]`.
///
/// # Errors
///
/// Configuration errors for an empty batch, a target count that disagrees
/// with the batch dimension, or a target outside `0..classes`.
pub fn cross_entropy(scores: &Tensor<f32, 2>, targets: &[usize]) -> Result<CrossEntropyOutput> {
    let [batch, classes] = *scores.shape();
    if batch == 0 {
        return Err(TrainError::Config(
            "cross-entropy requires a non-empty batch".to_string(),
        ));
    }
    if targets.len() != batch {
        return Err(TrainError::Config(format!(
            "got {} targets for a batch of {}",
            targets.len(),
            batch
        )));
    }

    let data = scores.data();
    let mut grad = vec![0.0f32; batch * classes];
    let mut total = 0.0f64;
    let inv_batch = 1.0 / batch as f32;

    for (row, &target) in targets.iter().enumerate() {
        if target >= classes {
            return Err(TrainError::Config(format!(
                "target {} is out of range for {} classes",
                target, classes
            )));
        }
        let logits = &data[row * classes..(row + 1) * classes];
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let mut denom = 0.0f32;
        for &s in logits {
            denom += (s - max).exp();
        }
        total += (denom.ln() + max - logits[target]) as f64;

        // d(loss)/d(s) = (softmax(s) - onehot(target)) / batch
        let grad_row = &mut grad[row * classes..(row + 1) * classes];
        for (c, &s) in logits.iter().enumerate() {
            grad_row[c] = (s - max).exp() / denom * inv_batch;
        }
        grad_row[target] -= inv_batch;
    }

    Ok(CrossEntropyOutput {
        loss: (total / batch as f64) as f32,
        score_grad: Tensor::new(grad, [batch, classes])?,
    })
}
