//! # scatnet-rs
//!
//! Training infrastructure for image classifiers whose inputs pass through
//! a fixed (non-trainable) multi-scale scattering transform before the
//! trainable network. The transform is expensive enough to deserve its own
//! pool of accelerator devices, replicated and driven independently of how
//! the model itself is parallelized.
//!
//! ## Modules
//!
//! - [`scattering`]: the fixed transform and its device-replicated
//!   scatter → concurrent-apply → no-gather pipeline.
//! - [`device`]: the fixed, ordered accelerator inventory.
//! - [`trainer`]: the epoch loop - learning-rate schedule, train/validate
//!   passes, metric meters, checkpointing, resume.
//! - [`checkpoint`]: atomic latest/best checkpoint records.
//! - [`model`] / [`optim`] / [`data`]: the collaborator seams (trainable
//!   network, optimizer, batch source) plus reference implementations.
//! - [`metrics`] / [`loss`]: running meters, top-k accuracy, cross-entropy.
//!
//! ## Example
//!
//! ```no_run
//! use scatnet::config::TrainConfig;
//! use scatnet::data::DataLoader;
//! use scatnet::device::DeviceSet;
//! use scatnet::models::BottleneckHead;
//! use scatnet::optim::Sgd;
//! use scatnet::trainer::Trainer;
//!
//! # fn run(train_set: Vec<(scatnet::tensor::Tensor<f32, 3>, usize)>,
//! #        val_set: Vec<(scatnet::tensor::Tensor<f32, 3>, usize)>)
//! #        -> scatnet::error::Result<()> {
//! # struct S(Vec<(scatnet::tensor::Tensor<f32, 3>, usize)>);
//! # impl scatnet::data::Dataset for S {
//! #     fn len(&self) -> usize { self.0.len() }
//! #     fn get(&self, i: usize) -> scatnet::error::Result<(scatnet::tensor::Tensor<f32, 3>, usize)> {
//! #         Ok(self.0[i].clone())
//! #     }
//! # }
//! let config = TrainConfig::default();
//! let devices = DeviceSet::enumerate();
//! let model = BottleneckHead::new(
//!     3 * (config.scattering_scale + 1),
//!     &config.bottleneck_width,
//!     &config.bottleneck_depth,
//!     1000,
//! )?;
//! let optimizer = Sgd::new(config.learning_rate, config.momentum, config.weight_decay);
//!
//! let train_loader = DataLoader::new(S(train_set), config.batch_size)?.shuffle(true);
//! let val_loader = DataLoader::new(S(val_set), config.batch_size)?;
//!
//! let mut trainer = Trainer::new(config, devices, model, optimizer)?;
//! let summary = trainer.run(&train_loader, &val_loader)?;
//! println!("best top-1: {:.3}", summary.best_top1);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod models;
pub mod optim;
pub mod scattering;
pub mod tensor;
pub mod trainer;

pub use checkpoint::{CheckpointStore, TrainCheckpoint};
pub use config::TrainConfig;
pub use device::{DeviceId, DeviceSet};
pub use error::{Result, TrainError};
pub use metrics::AverageMeter;
pub use model::Model;
pub use optim::{Optimizer, Sgd};
pub use scattering::{ReplicatedScattering, ScatteringTransform, ShardResult};
pub use tensor::Tensor;
pub use trainer::Trainer;
