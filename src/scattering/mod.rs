//! The fixed multi-scale scattering transform.
//!
//! This is the feature extractor that runs *in front of* the trainable
//! network. It has no learnable parameters, which is exactly why it is not
//! registered with the model's own distribution layer - there is nothing to
//! synchronize. [`replicated`] gives it its own minimal
//! scatter → concurrent-apply → no-gather pipeline instead.
//!
//! One [`ScatteringTransform`] instance is one replica's worth of state.
//! `forward` maps an image batch `[batch, channels, height, width]` to one
//! feature map per scale order `j = 0..=J`: the input box-filtered and
//! decimated by `2^j`. The output is a list of tensors, not a single
//! concatenated tensor, because downstream consumers treat each order
//! separately.

pub mod replicated;

pub use replicated::{ReplicatedScattering, ShardResult};

use crate::tensor::{Result, Tensor, TensorError};

/// One replica of the fixed transform, parameterized by the maximum dyadic
/// scale `J`.
#[derive(Clone, Debug)]
pub struct ScatteringTransform {
    scale: usize,
}

impl ScatteringTransform {
    /// Creates a transform computing orders `0..=scale`.
    pub fn new(scale: usize) -> Self {
        Self { scale }
    }

    /// The maximum dyadic scale `J`.
    pub fn scale(&self) -> usize {
        self.scale
    }

    /// Number of feature maps produced per input: one per order.
    pub fn num_orders(&self) -> usize {
        self.scale + 1
    }

    /// Applies the transform to an image batch.
    ///
    /// For each order `j`, the `[batch, channels, height, width]` input is
    /// averaged over non-overlapping `2^j x 2^j` windows, producing a
    /// `[batch, channels, height >> j, width >> j]` feature map. Purely a
    /// function of the input - same batch in, same features out.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` if the spatial dimensions are smaller than the
    /// coarsest window (`2^scale`).
    pub fn forward(&self, input: &Tensor<f32, 4>) -> Result<Vec<Tensor<f32, 4>>> {
        let [batch, channels, height, width] = *input.shape();
        let coarsest = 1usize << self.scale;
        if height < coarsest || width < coarsest {
            return Err(TensorError::Unsupported(format!(
                "spatial size {}x{} is below the coarsest scattering window {}",
                height, width, coarsest
            )));
        }

        let mut orders = Vec::with_capacity(self.num_orders());
        for j in 0..=self.scale {
            let window = 1usize << j;
            let out_h = height / window;
            let out_w = width / window;
            let area = (window * window) as f32;

            let mut out = Tensor::zeros([batch, channels, out_h, out_w]);
            let src = input.data();
            let dst = out.data_mut();

            let in_stride_c = height * width;
            let in_stride_b = channels * in_stride_c;
            let out_stride_c = out_h * out_w;
            let out_stride_b = channels * out_stride_c;

            for b in 0..batch {
                for c in 0..channels {
                    let src = &src[b * in_stride_b + c * in_stride_c..][..in_stride_c];
                    let dst = &mut dst[b * out_stride_b + c * out_stride_c..][..out_stride_c];
                    for oy in 0..out_h {
                        for ox in 0..out_w {
                            let mut sum = 0.0f32;
                            for ky in 0..window {
                                for kx in 0..window {
                                    sum += src[(oy * window + ky) * width + ox * window + kx];
                                }
                            }
                            dst[oy * out_w + ox] = sum / area;
                        }
                    }
                }
            }
            orders.push(out);
        }
        Ok(orders)
    }
}
