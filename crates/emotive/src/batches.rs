//! Index batching over a prepared split.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::collate::{Batch, CollateError, PaddingCollator};
use crate::extract::ProcessedRecord;

#[derive(Debug, Clone)]
pub struct BatchSampler {
    indices: Vec<usize>,
    batch_size: usize,
    shuffle: bool,
    pos: usize,
}

impl BatchSampler {
    /// Sampler over `len` records. `shuffle = false` keeps dataset order (eval).
    pub fn new(len: usize, batch_size: usize, shuffle: bool) -> Self {
        Self {
            indices: (0..len).collect(),
            batch_size: batch_size.max(1),
            shuffle,
            pos: 0,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    /// Rewind for a new epoch; shuffling samplers reorder with `seed + epoch`.
    pub fn start_epoch(&mut self, seed: u64, epoch: usize) {
        if self.shuffle {
            self.indices.sort_unstable();
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
            self.indices.shuffle(&mut rng);
        }
        self.pos = 0;
    }

    /// Next slice of record indices, or None once the epoch is exhausted.
    pub fn next_indices(&mut self) -> Option<&[usize]> {
        let n = self.indices.len();
        if self.pos >= n {
            return None;
        }
        let start = self.pos;
        self.pos = (start + self.batch_size).min(n);
        Some(&self.indices[start..self.pos])
    }

    /// Next padded batch drawn from `records`.
    pub fn next_batch(
        &mut self,
        records: &[ProcessedRecord],
        collator: &PaddingCollator,
    ) -> Option<Result<Batch, CollateError>> {
        let picked: Vec<&ProcessedRecord> = self
            .next_indices()?
            .iter()
            .filter_map(|&i| records.get(i))
            .collect();
        Some(collator.collate(&picked))
    }
}
