//! Reference model architectures.

pub mod bottleneck;

pub use bottleneck::BottleneckHead;
