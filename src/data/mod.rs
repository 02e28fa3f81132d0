//! Data loading for labeled image batches.
//!
//! The training core consumes a restartable sequence of
//! `(image-batch, label-batch)` pairs per phase. [`DataLoader`] produces
//! that sequence from any [`Dataset`] of (image, class index) items, where
//! an image is `[channels, height, width]`: a sampler picks the visit
//! order, the loader batches and collates. `iter()` can be called once per
//! epoch - each call
//! restarts the sequence (and reshuffles, for the random sampler).

use rand::seq::SliceRandom;
use std::sync::Arc;

use crate::error::{Result, TrainError};
use crate::tensor::Tensor;

/// A collated batch: images `[batch, channels, height, width]` and one
/// class index per example.
pub type Batch = (Tensor<f32, 4>, Vec<usize>);

/// A collection of labeled images accessible by index.
pub trait Dataset: Send + Sync {
    /// Total number of items.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the item at `index`.
    ///
    /// # Errors
    ///
    /// Decoding failures surface as [`TrainError::Data`]; the training core
    /// performs no retry and treats them as fatal.
    fn get(&self, index: usize) -> Result<(Tensor<f32, 3>, usize)>;
}

/// A trait for determining the order of data access.
pub trait Sampler: Send + Sync {
    fn sample(&self, len: usize) -> Vec<usize>;
}

/// Visits elements in index order, every epoch the same.
pub struct SequentialSampler;

impl Sampler for SequentialSampler {
    fn sample(&self, len: usize) -> Vec<usize> {
        (0..len).collect()
    }
}

/// Visits elements in a fresh random order each epoch.
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn sample(&self, len: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(&mut rand::rng());
        indices
    }
}

/// Combines a dataset and a sampler into a restartable batch sequence.
pub struct DataLoader<D: Dataset> {
    dataset: Arc<D>,
    batch_size: usize,
    sampler: Box<dyn Sampler>,
}

impl<D: Dataset + 'static> DataLoader<D> {
    /// Creates a sequential loader.
    ///
    /// # Errors
    ///
    /// A zero batch size is a configuration error.
    pub fn new(dataset: D, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(TrainError::Config(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            dataset: Arc::new(dataset),
            batch_size,
            sampler: Box::new(SequentialSampler),
        })
    }

    /// Switches between random and sequential visiting order.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.sampler = if shuffle {
            Box::new(RandomSampler)
        } else {
            Box::new(SequentialSampler)
        };
        self
    }

    /// Number of batches one pass yields.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Starts one pass over the dataset.
    pub fn iter(&self) -> DataLoaderIter<D> {
        DataLoaderIter {
            dataset: self.dataset.clone(),
            indices: self.sampler.sample(self.dataset.len()),
            batch_size: self.batch_size,
            cursor: 0,
        }
    }
}

/// Iterator over one epoch's batches.
pub struct DataLoaderIter<D: Dataset> {
    dataset: Arc<D>,
    indices: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl<D: Dataset> DataLoaderIter<D> {
    fn collate(&self, batch_indices: &[usize]) -> Result<Batch> {
        let mut images: Vec<f32> = Vec::new();
        let mut labels = Vec::with_capacity(batch_indices.len());
        let mut item_shape: Option<[usize; 3]> = None;

        for &idx in batch_indices {
            let (image, label) = self.dataset.get(idx)?;
            match item_shape {
                None => item_shape = Some(*image.shape()),
                Some(shape) if shape != *image.shape() => {
                    return Err(TrainError::Data(format!(
                        "item {} has shape {:?}, batch expects {:?}",
                        idx,
                        image.shape(),
                        shape
                    )));
                }
                Some(_) => {}
            }
            images.extend_from_slice(image.data());
            labels.push(label);
        }

        let [c, h, w] = item_shape.expect("collate is called with a non-empty index slice");
        let batch = Tensor::new(images, [batch_indices.len(), c, h, w])?;
        Ok((batch, labels))
    }
}

impl<D: Dataset> Iterator for DataLoaderIter<D> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.indices.len() {
            return None;
        }
        let take = (self.indices.len() - self.cursor).min(self.batch_size);
        let batch_indices: Vec<usize> = self.indices[self.cursor..self.cursor + take].to_vec();
        self.cursor += take;
        Some(self.collate(&batch_indices))
    }
}
