//! Minimal CPU tensor.
//!
//! A `Tensor` here is a flat `Vec<T>` plus a compile-time-ranked shape,
//! stored row-major. That is all the training core needs: image batches are
//! rank 4 (`[batch, channels, height, width]`), class scores are rank 2,
//! and flattened parameter snapshots are rank 1.
//!
//! There is deliberately no stride machinery, no views, and no device type
//! parameter - accelerator placement is modeled at the pool level by
//! [`DeviceSet`](crate::device::DeviceSet), not per tensor.

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

/// Error type for tensor operations.
#[derive(Error, Debug)]
pub enum TensorError {
    /// The shape of the data does not match the expected shape.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// A batch sub-range does not fit the leading dimension.
    #[error("range {start}..{end} out of bounds for leading dimension of size {len}")]
    RangeOutOfBounds {
        start: usize,
        end: usize,
        len: usize,
    },
    /// The requested operation is not supported for this shape.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;

/// Trait bound for elements that can be stored in a `Tensor`.
///
/// `Send + Sync` is required because shards are handed to per-device worker
/// threads; the numeric bounds come from `num-traits`.
pub trait TensorElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> TensorElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}

/// An N-dimensional array with row-major `Vec` storage.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor<T: TensorElem, const RANK: usize> {
    data: Vec<T>,
    shape: [usize; RANK],
}

impl<T: TensorElem, const RANK: usize> Tensor<T, RANK> {
    /// Creates a tensor from flat data and a shape.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `data.len()` is not the product of `shape`.
    pub fn new(data: Vec<T>, shape: [usize; RANK]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(TensorError::ShapeMismatch {
                expected: vec![expected],
                got: vec![data.len()],
            });
        }
        Ok(Self { data, shape })
    }

    /// Creates a tensor filled with zeros.
    pub fn zeros(shape: [usize; RANK]) -> Self {
        let size = shape.iter().product();
        Self {
            data: vec![T::zero(); size],
            shape,
        }
    }

    /// Returns the shape.
    pub fn shape(&self) -> &[usize; RANK] {
        &self.shape
    }

    /// Returns the total number of elements.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns the flat data as a slice.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Returns the flat data as a mutable slice.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consumes the tensor and returns its flat data.
    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Copies a contiguous sub-range `start..start + len` of the leading
    /// dimension into a new tensor. This is the shard-transfer primitive:
    /// each device receives its own copy of its batch rows.
    ///
    /// # Errors
    ///
    /// Returns `RangeOutOfBounds` if the range does not fit the leading
    /// dimension.
    pub fn narrow_batch(&self, start: usize, len: usize) -> Result<Self> {
        let total = self.shape[0];
        let end = start + len;
        if end > total {
            return Err(TensorError::RangeOutOfBounds {
                start,
                end,
                len: total,
            });
        }
        let row: usize = self.shape[1..].iter().product();
        let mut shape = self.shape;
        shape[0] = len;
        Ok(Self {
            data: self.data[start * row..end * row].to_vec(),
            shape,
        })
    }
}
