// ============================================================
// Layer 4 — Triplet Batcher
// ============================================================
// Implements Burn's Batcher trait: Vec<TripletSample> → tensors.
//
// Image decoding happens here, so it runs on the DataLoader's
// worker threads.
//
//   anchors:   [B, 3, S, S]
//   positive:  Text  → tokens [B, L] (Int) + eot_mask [B, L]
//              Image → [B, 3, S, S]
//   negatives: [B, 3, S, S]  (training datasets only)
//
// eot_mask is one-hot on each row's EOT position; the text tower
// multiplies by it and sums over L to pool the EOT feature.
//
// Loader items are whole batches (see BatchedDataset), so the
// DataLoader runs with a batch size of 1 and the batcher flattens.

use anyhow::Result;
use burn::{
    data::dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
    prelude::*,
};
use std::{path::Path, sync::Arc};

use crate::data::caption::EncodedCaption;
use crate::data::dataset::{BatchedDataset, Positive, TripletDataset, TripletSample};
use crate::data::preprocessor::ImagePreprocessor;

#[derive(Debug, Clone)]
pub enum PositiveBatch<B: Backend> {
    Text {
        tokens:   Tensor<B, 2, Int>,
        eot_mask: Tensor<B, 2>,
    },
    Image(Tensor<B, 4>),
}

#[derive(Debug, Clone)]
pub struct TripletBatch<B: Backend> {
    pub anchors:   Tensor<B, 4>,
    pub positive:  PositiveBatch<B>,
    pub negatives: Option<Tensor<B, 4>>,
}

#[derive(Clone, Debug)]
pub struct TripletBatcher<B: Backend> {
    pub device:       B::Device,
    pub preprocessor: ImagePreprocessor,
}

impl<B: Backend> TripletBatcher<B> {
    pub fn new(device: B::Device, preprocessor: ImagePreprocessor) -> Self {
        Self { device, preprocessor }
    }

    fn load_image(&self, path: &Path) -> Vec<f32> {
        let mut rng = rand::thread_rng();
        match self.preprocessor.load(path, &mut rng) {
            Ok(pixels) => pixels,
            Err(e) => {
                tracing::error!("{e:#}; substituting a blank image");
                self.preprocessor.blank()
            }
        }
    }

    fn images<'a>(&self, paths: impl Iterator<Item = &'a Path>) -> Tensor<B, 4> {
        let size = self.preprocessor.image_size();
        let mut flat = Vec::new();
        let mut n    = 0usize;
        for path in paths {
            flat.extend(self.load_image(path));
            n += 1;
        }
        Tensor::<B, 1>::from_floats(flat.as_slice(), &self.device).reshape([n, 3, size, size])
    }
}

/// Stack encoded captions into (tokens, eot one-hot mask).
pub fn caption_tensors<B: Backend>(
    captions: &[&EncodedCaption],
    device:   &B::Device,
) -> (Tensor<B, 2, Int>, Tensor<B, 2>) {
    let batch   = captions.len();
    let seq_len = captions.first().map(|c| c.ids.len()).unwrap_or(0);

    let ids: Vec<i32> = captions
        .iter()
        .flat_map(|c| c.ids.iter().map(|&id| id as i32))
        .collect();

    let mut mask = vec![0.0f32; batch * seq_len];
    for (row, c) in captions.iter().enumerate() {
        mask[row * seq_len + c.eot] = 1.0;
    }

    let tokens = Tensor::<B, 1, Int>::from_ints(ids.as_slice(), device).reshape([batch, seq_len]);
    let eot    = Tensor::<B, 1>::from_floats(mask.as_slice(), device).reshape([batch, seq_len]);
    (tokens, eot)
}

impl<B: Backend> Batcher<Vec<TripletSample>, TripletBatch<B>> for TripletBatcher<B> {
    fn batch(&self, items: Vec<Vec<TripletSample>>) -> TripletBatch<B> {
        self.stack(items.into_iter().flatten().collect())
    }
}

impl<B: Backend> TripletBatcher<B> {
    /// Stack one batch worth of triplets into tensors.
    pub fn stack(&self, items: Vec<TripletSample>) -> TripletBatch<B> {
        let anchors = self.images(items.iter().map(|s| s.anchor.as_path()));

        let captions: Vec<&EncodedCaption> = items
            .iter()
            .filter_map(|s| match &s.positive {
                Positive::Caption(c) => Some(c),
                Positive::Image(_) => None,
            })
            .collect();

        // a dataset holds a single task, so positives are all one kind
        let positive = if captions.len() == items.len() {
            let (tokens, eot_mask) = caption_tensors(&captions, &self.device);
            PositiveBatch::Text { tokens, eot_mask }
        } else {
            PositiveBatch::Image(self.images(items.iter().filter_map(|s| match &s.positive {
                Positive::Image(p) => Some(p.as_path()),
                Positive::Caption(_) => None,
            })))
        };

        let negatives = if items.iter().all(|s| s.negative.is_some()) {
            Some(self.images(items.iter().filter_map(|s| s.negative.as_deref())))
        } else {
            None
        };

        TripletBatch { anchors, positive, negatives }
    }
}

/// DataLoader over whole batches of `batch_size` triplets.
///
/// Every batch keeps `batch_size` rows whatever `num_workers` is; only
/// the final batch can be short, when `dataset` was not trimmed with
/// `drop_last`. `shuffle` reorders batches with the given seed.
pub fn triplet_loader<B: Backend>(
    dataset:      TripletDataset,
    batch_size:   usize,
    preprocessor: ImagePreprocessor,
    device:       B::Device,
    num_workers:  usize,
    shuffle:      Option<u64>,
) -> Result<Arc<dyn DataLoader<TripletBatch<B>>>> {
    let batches = BatchedDataset::new(dataset, batch_size)?;
    let mut builder = DataLoaderBuilder::new(TripletBatcher::<B>::new(device, preprocessor))
        .batch_size(1)
        .num_workers(num_workers.max(1));
    if let Some(seed) = shuffle {
        builder = builder.shuffle(seed);
    }
    Ok(builder.build(batches))
}
