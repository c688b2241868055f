#![warn(missing_docs)]
//! Device placement for `epibatch` episode batches, backed by candle.
//!
//! The storage core keeps all data host-resident; this crate mirrors an
//! episode batch (typically a replay sample) as [`candle_core::Tensor`]s
//! on a compute device for the learner's forward and backward passes.
mod tensor_batch;

pub use candle_core::Device;
pub use tensor_batch::TensorBatch;
