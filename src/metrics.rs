//! Running metric accumulation and top-k accuracy.

use crate::error::{Result, TrainError};
use crate::tensor::Tensor;

/// Tracks the most recent value and the running weighted average of a
/// scalar quantity (loss, accuracy, timings).
///
/// One instance per metric per phase - train and validation each keep their
/// own meters so epochs never contaminate each other.
#[derive(Debug, Clone, Default)]
pub struct AverageMeter {
    /// Most recently observed value.
    pub val: f64,
    /// Weighted running sum.
    pub sum: f64,
    /// Total weight observed.
    pub count: f64,
    /// `sum / count`, or 0 before the first update.
    pub avg: f64,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes all four fields regardless of prior history.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Records `val` with weight `n` (typically the batch size).
    pub fn update(&mut self, val: f64, n: usize) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n as f64;
        self.avg = self.sum / self.count;
    }
}

/// Computes the top-k accuracy (in percent) of `scores` against integer
/// `targets`, for each k in `topk`.
///
/// An example counts for k if its true class is among the k highest-scoring
/// classes. Ties are broken deterministically: among equal scores, the lower
/// class index ranks first, so reruns over the same scores always agree.
///
/// # Errors
///
/// Configuration errors for an empty batch, a `targets` length that does not
/// match the batch dimension, a target outside `0..classes`, or any k larger
/// than the number of classes.
pub fn topk_accuracy(
    scores: &Tensor<f32, 2>,
    targets: &[usize],
    topk: &[usize],
) -> Result<Vec<f64>> {
    let [batch, classes] = *scores.shape();
    if batch == 0 {
        return Err(TrainError::Config(
            "top-k accuracy requires a non-empty batch".to_string(),
        ));
    }
    if targets.len() != batch {
        return Err(TrainError::Config(format!(
            "got {} targets for a batch of {}",
            targets.len(),
            batch
        )));
    }
    if let Some(&k) = topk.iter().find(|&&k| k == 0 || k > classes) {
        return Err(TrainError::Config(format!(
            "k={} is out of range for {} classes",
            k, classes
        )));
    }

    let data = scores.data();
    let mut correct = vec![0usize; topk.len()];

    for (row, &target) in targets.iter().enumerate() {
        if target >= classes {
            return Err(TrainError::Config(format!(
                "target {} is out of range for {} classes",
                target, classes
            )));
        }
        let row = &data[row * classes..(row + 1) * classes];
        let target_score = row[target];

        // Rank of the true class: classes scored strictly higher, plus
        // equal-scored classes with a lower index (the stable tie-break).
        let rank = row
            .iter()
            .enumerate()
            .filter(|&(c, &s)| s > target_score || (s == target_score && c < target))
            .count();

        for (slot, &k) in topk.iter().enumerate() {
            if rank < k {
                correct[slot] += 1;
            }
        }
    }

    Ok(correct
        .iter()
        .map(|&c| c as f64 * 100.0 / batch as f64)
        .collect())
}
