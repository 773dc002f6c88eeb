//! Machine learning building blocks for training and inference.
//!
//! Everything here is plain Rust over `f32` slices; the network is small
//! enough that no tensor library is needed.

pub mod metrics;
pub mod mlp;
