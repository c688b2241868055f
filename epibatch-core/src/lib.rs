#![warn(missing_docs)]
//! Schema-driven episodic batch storage and replay sampling.
//!
//! The crate stores fixed-shape, fixed-dtype fields produced by repeated
//! environment rollouts as dense batched arrays addressable by
//! `(episode, timestep)`, and serves uniformly sampled minibatches of
//! whole episodes to a learner:
//!
//! - [`scheme`] validates field specifications and group sizes and
//!   compiles them into concrete per-field storage layouts;
//! - [`episode_batch`] owns the storage blocks and the filled mask and
//!   handles bounds-checked writes, reads and borrowing windows;
//! - [`transform`] derives secondary fields (one-hot action encodings)
//!   at write time;
//! - [`replay_buffer`] accumulates completed episodes circularly and
//!   draws training minibatches.
//!
//! Device placement lives in the companion `epibatch-candle` crate; this
//! crate is backend-free and keeps all data host-resident.
pub mod episode_batch;
pub mod error;
pub mod replay_buffer;
pub mod scheme;
pub mod transform;
pub mod value;

pub use episode_batch::{EpisodeBatch, EpisodeSlice, EpisodeSliceMut};
pub use error::StoreError;
pub use replay_buffer::{EpisodeReplayBuffer, ReplayBufferConfig};
pub use scheme::{compile, CompiledField, CompiledScheme, Dtype, FieldSpec, SchemeConfig};
pub use transform::{OneHot, Preprocess, Transform};
pub use value::Value;
