//! Loaders yielding minibatches to the training loop.

use std::sync::atomic::{AtomicU64, Ordering};

use burn::data::dataset::Dataset;
use burn::prelude::*;
use classif_core::{Error, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::batch::{ClassifierBatch, ClassifierBatcher, ClassifierItem};

/// One pass over a loader
pub type BatchStream<'a, B> = Box<dyn Iterator<Item = Result<ClassifierBatch<B>>> + 'a>;

/// Restartable source of minibatches.
///
/// Every call to [`BatchLoader::iter`] starts a fresh pass; `len` is the
/// number of batches one pass yields.
pub trait BatchLoader<B: Backend> {
    fn iter(&self) -> BatchStream<'_, B>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Loader over batches that are already materialised
#[derive(Clone, Debug)]
pub struct InMemoryLoader<B: Backend> {
    batches: Vec<ClassifierBatch<B>>,
}

impl<B: Backend> InMemoryLoader<B> {
    pub fn new(batches: Vec<ClassifierBatch<B>>) -> Self {
        Self { batches }
    }
}

impl<B: Backend> BatchLoader<B> for InMemoryLoader<B> {
    fn iter(&self) -> BatchStream<'_, B> {
        Box::new(self.batches.iter().cloned().map(Ok))
    }

    fn len(&self) -> usize {
        self.batches.len()
    }
}

/// Loader that batches a Burn [`Dataset`] on demand
pub struct DatasetLoader<B: Backend, D> {
    dataset: D,
    batcher: ClassifierBatcher<B>,
    batch_size: usize,
    shuffle_seed: Option<u64>,
    passes: AtomicU64,
}

impl<B, D> DatasetLoader<B, D>
where
    B: Backend,
    D: Dataset<ClassifierItem>,
{
    pub fn new(dataset: D, batch_size: usize, device: B::Device) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".to_string()));
        }
        Ok(Self {
            dataset,
            batcher: ClassifierBatcher::new(device),
            batch_size,
            shuffle_seed: None,
            passes: AtomicU64::new(0),
        })
    }

    /// Reshuffle sample order on every pass, deterministically from `seed`
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn num_items(&self) -> usize {
        self.dataset.len()
    }

    fn pass_indices(&self) -> Vec<usize> {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed);
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(pass));
            indices.shuffle(&mut rng);
        }
        indices
    }

    fn load_batch(&self, chunk: &[usize]) -> Result<ClassifierBatch<B>> {
        let items = chunk
            .iter()
            .map(|&index| {
                self.dataset
                    .get(index)
                    .ok_or_else(|| {
                        Error::Dataset(format!(
                            "Failed to load sample {}, batch aborted (cause logged by the dataset)",
                            index
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        self.batcher.batch(items)
    }
}

impl<B, D> BatchLoader<B> for DatasetLoader<B, D>
where
    B: Backend,
    D: Dataset<ClassifierItem>,
{
    fn iter(&self) -> BatchStream<'_, B> {
        let indices = self.pass_indices();
        let chunks: Vec<Vec<usize>> = indices
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        Box::new(chunks.into_iter().map(move |chunk| self.load_batch(&chunk)))
    }

    fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }
}
