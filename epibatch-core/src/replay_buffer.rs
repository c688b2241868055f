//! Circular, capacity-bounded replay over whole episodes.
use crate::episode_batch::EpisodeBatch;
use crate::error::StoreError;
use crate::scheme::CompiledScheme;
use anyhow::Result;
use log::trace;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    ops::Range,
    path::Path,
    sync::Arc,
};

/// Configuration for [`EpisodeReplayBuffer`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ReplayBufferConfig {
    /// Maximum number of episodes resident at once. Once full, the
    /// oldest episodes are overwritten.
    pub capacity: usize,

    /// Seed for the sampling RNG, for reproducible draws.
    pub seed: u64,
}

impl Default for ReplayBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 5000,
            seed: 42,
        }
    }
}

impl ReplayBufferConfig {
    /// Sets the capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the sampling seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Constructs a configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// A replay buffer over whole episodes.
///
/// The backing store is an [`EpisodeBatch`] whose `batch_size` equals
/// the buffer capacity. Completed episode batches are copied in at a
/// circular write cursor, overwriting the oldest episodes once the
/// buffer saturates; training minibatches are drawn uniformly at random
/// over the currently valid episodes.
///
/// Insertion and sampling are assumed to alternate on one control flow;
/// the buffer provides no internal locking.
pub struct EpisodeReplayBuffer {
    store: EpisodeBatch,
    capacity: usize,
    /// Next slot to overwrite.
    i: usize,
    /// Valid episode count, saturating at capacity.
    size: usize,
    rng: StdRng,
}

impl EpisodeReplayBuffer {
    /// Builds a buffer for the given scheme and horizon.
    pub fn build(
        scheme: Arc<CompiledScheme>,
        horizon: usize,
        config: &ReplayBufferConfig,
    ) -> Self {
        Self {
            store: EpisodeBatch::new(scheme, config.capacity, horizon),
            capacity: config.capacity,
            i: 0,
            size: 0,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Number of valid episodes currently resident.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether no episode has been inserted yet.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Maximum number of episodes resident at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The backing store.
    pub fn store(&self) -> &EpisodeBatch {
        &self.store
    }

    /// Copies a completed episode batch into the buffer at the write
    /// cursor, splitting into two contiguous copies when it wraps around
    /// the capacity boundary.
    ///
    /// The batch must share the backing store's scheme layout and
    /// horizon; its `batch_size` must not exceed the capacity.
    pub fn insert_episode_batch(&mut self, batch: &EpisodeBatch) -> Result<(), StoreError> {
        if !batch.scheme().same_layout(self.store.scheme()) {
            return Err(StoreError::Scheme(
                "inserted episode batch was compiled from a different scheme".into(),
            ));
        }
        if batch.horizon() != self.store.horizon() {
            return Err(StoreError::Scheme(format!(
                "inserted episode batch has horizon {}, buffer expects {}",
                batch.horizon(),
                self.store.horizon()
            )));
        }
        let b = batch.batch_size();
        if b > self.capacity {
            return Err(StoreError::Capacity {
                requested: b,
                capacity: self.capacity,
            });
        }

        if self.i + b <= self.capacity {
            self.copy_in(self.i..self.i + b, batch, 0..b)?;
        } else {
            let first = self.capacity - self.i;
            self.copy_in(self.i..self.capacity, batch, 0..first)?;
            self.copy_in(0..b - first, batch, first..b)?;
        }

        self.i = (self.i + b) % self.capacity;
        self.size = (self.size + b).min(self.capacity);
        trace!(
            "inserted {} episode(s); cursor={}, valid={}",
            b,
            self.i,
            self.size
        );
        Ok(())
    }

    /// Whether `n` episodes can be sampled.
    pub fn can_sample(&self, n: usize) -> bool {
        self.size >= n
    }

    /// Draws `n` distinct episodes uniformly at random over the valid
    /// episodes and returns them as a copied batch, so the caller keeps
    /// its data even after the buffer overwrites those slots.
    pub fn sample(&mut self, n: usize) -> Result<EpisodeBatch, StoreError> {
        if !self.can_sample(n) {
            return Err(StoreError::Capacity {
                requested: n,
                capacity: self.size,
            });
        }
        let ixs = rand::seq::index::sample(&mut self.rng, self.size, n).into_vec();
        trace!("sampled episodes {:?}", ixs);
        self.store.select(&ixs)
    }

    fn copy_in(
        &mut self,
        dst: Range<usize>,
        batch: &EpisodeBatch,
        src: Range<usize>,
    ) -> Result<(), StoreError> {
        self.store.copy_slots_from(dst, batch, src)
    }
}
