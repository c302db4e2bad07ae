use anyhow::{bail, Result};
use burn::data::dataset::Dataset;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::PathBuf;

use crate::data::caption::{CaptionEncoder, EncodedCaption};
use crate::data::manifest::JsonManifest;
use crate::domain::pair::{PairRecord, RetrievalTask};

/// The positive side of a triplet.
#[derive(Debug, Clone)]
pub enum Positive {
    Caption(EncodedCaption),
    Image(PathBuf),
}

/// One (anchor, positive, negative) training example.
/// Images are paths; the batcher decodes them.
#[derive(Debug, Clone)]
pub struct TripletSample {
    pub anchor:   PathBuf,
    pub positive: Positive,
    /// Absent for evaluation datasets
    pub negative: Option<PathBuf>,
}

pub struct TripletDataset {
    samples: Vec<TripletSample>,
}

impl TripletDataset {
    /// Resolve paths, tokenise captions once and draw negatives.
    ///
    /// `encoder` is required for image2text and ignored for image2image.
    pub fn build(
        pairs:          &[PairRecord],
        manifest:       &JsonManifest,
        task:           RetrievalTask,
        encoder:        Option<&CaptionEncoder>,
        with_negatives: bool,
        seed:           u64,
    ) -> Result<Self> {
        if with_negatives && pairs.len() < 2 {
            bail!("Need at least 2 pairs to draw negatives, got {}", pairs.len());
        }

        let mut samples = Vec::with_capacity(pairs.len());
        for (i, pair) in pairs.iter().enumerate() {
            let positive = match task {
                RetrievalTask::ImageToImage => Positive::Image(manifest.resolve(&pair.positive)),
                RetrievalTask::ImageToText => {
                    let Some(encoder) = encoder else {
                        bail!("image2text dataset needs a caption encoder");
                    };
                    Positive::Caption(encoder.encode(&pair.positive)?)
                }
            };
            let negative = with_negatives
                .then(|| manifest.resolve(&pairs[negative_index(i, pairs.len(), seed)].anchor));

            samples.push(TripletSample {
                anchor: manifest.resolve(&pair.anchor),
                positive,
                negative,
            });
        }

        Ok(Self { samples })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Drop the trailing partial batch. Errors if not even one full
    /// batch remains.
    pub fn drop_last(mut self, batch_size: usize) -> Result<Self> {
        let full = full_batch_len(self.samples.len(), batch_size);
        if full == 0 {
            bail!(
                "Dataset has {} samples, fewer than one batch of {}",
                self.samples.len(),
                batch_size
            );
        }
        if full < self.samples.len() {
            tracing::debug!("Dropping {} samples of the last partial batch", self.samples.len() - full);
        }
        self.samples.truncate(full);
        Ok(self)
    }
}

impl Dataset<TripletSample> for TripletDataset {
    fn get(&self, index: usize) -> Option<TripletSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Groups consecutive triplets into batch-sized items.
///
/// The DataLoader splits its dataset across workers and each worker
/// batches its own slice, so batching at sample level would cut
/// batches at worker boundaries. Handing out whole batches as items
/// (loaded with a loader batch size of 1) keeps every batch intact.
/// Only the last item can be short, and only when the samples were
/// not passed through `drop_last` first.
pub struct BatchedDataset {
    samples:    Vec<TripletSample>,
    batch_size: usize,
}

impl BatchedDataset {
    pub fn new(dataset: TripletDataset, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        Ok(Self { samples: dataset.samples, batch_size })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl Dataset<Vec<TripletSample>> for BatchedDataset {
    fn get(&self, index: usize) -> Option<Vec<TripletSample>> {
        let start = index.checked_mul(self.batch_size)?;
        if start >= self.samples.len() {
            return None;
        }
        let end = (start + self.batch_size).min(self.samples.len());
        Some(self.samples[start..end].to_vec())
    }

    fn len(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }
}

/// Index of another row to use as the negative for row `i`.
/// Deterministic for a given (seed, i); never `i` itself when `len > 1`.
pub fn negative_index(i: usize, len: usize, seed: u64) -> usize {
    if len < 2 {
        return i;
    }
    let mut rng = StdRng::seed_from_u64(seed ^ (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    let j = rng.gen_range(0..len - 1);
    if j >= i { j + 1 } else { j }
}

pub fn full_batch_len(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    len / batch_size * batch_size
}
