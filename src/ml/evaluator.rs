// ============================================================
// Layer 5 — Evaluator
// ============================================================
// Scores each test batch in-batch:
//
//   probs = softmax(100 · norm(anchor) · norm(positive)ᵀ)   [n, n]
//
// Row i is anchor image i against every positive of the batch.
// Row i is a hit when its largest probability sits on column i.
//
// Generic over the backend; eval builds the model straight on the
// plain WGPU backend, so no autodiff graph is recorded.

use anyhow::{bail, Result};
use burn::{data::dataset::Dataset, prelude::*};

use crate::data::{
    batcher::triplet_loader,
    dataset::TripletDataset,
    preprocessor::ImagePreprocessor,
};
use crate::domain::pair::Split;
use crate::ml::loss::similarity_probs;
use crate::ml::model::PromptedClip;

#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub samples:           usize,
    /// Fraction of anchors whose own positive ranks first in the batch
    pub top1:              f64,
    /// Mean probability assigned to the matching positive
    pub mean_matched_prob: f64,
}

pub struct Evaluator<B: Backend> {
    model:       PromptedClip<B>,
    device:      B::Device,
    image_size:  usize,
    batch_size:  usize,
    num_workers: usize,
}

impl<B: Backend> Evaluator<B> {
    pub fn new(
        model:       PromptedClip<B>,
        device:      B::Device,
        image_size:  usize,
        batch_size:  usize,
        num_workers: usize,
    ) -> Self {
        Self { model, device, image_size, batch_size, num_workers }
    }

    pub fn evaluate(&self, dataset: TripletDataset) -> Result<EvalReport> {
        if dataset.is_empty() {
            bail!("Test set is empty");
        }
        let loader = triplet_loader::<B>(
            dataset,
            self.batch_size,
            ImagePreprocessor::new(self.image_size, Split::Test),
            self.device.clone(),
            self.num_workers,
            None,
        )?;

        let mut samples = 0usize;
        let mut hits    = 0usize;
        let mut matched = 0.0f64;

        for (i, batch) in loader.iter().enumerate() {
            let n        = batch.anchors.dims()[0];
            let anchor   = self.model.encode_image(batch.anchors);
            let positive = self.model.encode_positive(batch.positive);
            let probs    = similarity_probs(anchor, positive);
            tracing::debug!("batch {} probs: {}", i, probs);

            let values: Vec<f32> = probs
                .into_data()
                .convert::<f32>()
                .to_vec()
                .map_err(|e| anyhow::anyhow!("Cannot read probabilities: {e:?}"))?;
            let score = score_rows(&values, n);

            samples += n;
            hits    += score.hits;
            matched += score.matched_prob_sum;
            tracing::info!(
                "batch {}: top-1 {}/{} ({:.1}%)",
                i, score.hits, n, 100.0 * score.hits as f64 / n as f64
            );
        }

        if samples == 0 {
            bail!("Test loader produced no batches");
        }
        Ok(EvalReport {
            samples,
            top1:              hits as f64 / samples as f64,
            mean_matched_prob: matched / samples as f64,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowScore {
    pub hits:             usize,
    pub matched_prob_sum: f64,
}

/// Score a row-major [n, n] probability matrix.
pub fn score_rows(probs: &[f32], n: usize) -> RowScore {
    let mut hits = 0;
    let mut sum  = 0.0f64;
    for (row, values) in probs.chunks(n).take(n).enumerate() {
        let best = values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(col, _)| col);
        if best == Some(row) {
            hits += 1;
        }
        sum += values.get(row).copied().unwrap_or(0.0) as f64;
    }
    RowScore { hits, matched_prob_sum: sum }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::caption::CaptionEncoder;
    use crate::data::manifest::JsonManifest;
    use crate::domain::pair::{PairRecord, PromptKind, RetrievalTask};
    use crate::infra::tokenizer_store::word_level_tokenizer;
    use crate::ml::model::tests::tiny_config;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    type TB = NdArray;

    #[test]
    fn test_score_rows_counts_diagonal_hits() {
        let probs = [
            0.7, 0.2, 0.1,
            0.5, 0.3, 0.2, // miss
            0.1, 0.1, 0.8,
        ];
        let s = score_rows(&probs, 3);
        assert_eq!(s.hits, 2);
        assert!((s.matched_prob_sum - 1.8).abs() < 1e-6);
    }

    #[test]
    fn test_evaluate_image_to_text() {
        let dir = tempfile::tempdir().unwrap();
        let captions = ["a red square", "a green square", "a blue square"];
        let pairs: Vec<PairRecord> = captions
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut colour = [0u8; 3];
                colour[i] = 255;
                RgbImage::from_pixel(8, 8, Rgb(colour))
                    .save(dir.path().join(format!("{i}.png")))
                    .unwrap();
                PairRecord::new(format!("{i}.png"), *c)
            })
            .collect();

        let cfg    = tiny_config(PromptKind::Deep);
        let texts: Vec<String> = captions.iter().map(|c| c.to_string()).collect();
        let tok    = word_level_tokenizer(&texts, cfg.clip.vocab_size).unwrap();
        let enc    = CaptionEncoder::new(tok, cfg.clip.context_length).unwrap();
        let task   = RetrievalTask::ImageToText;
        let man    = JsonManifest::new(dir.path(), dir.path().join("unused.json"), task);
        let data   = TripletDataset::build(&pairs, &man, task, Some(&enc), false, 0).unwrap();

        let device = Default::default();
        let model  = cfg.init::<TB>(&device).unwrap();
        let report = Evaluator::new(model, device, cfg.clip.image_size, 2, 1)
            .evaluate(data)
            .unwrap();

        assert_eq!(report.samples, 3);
        assert!((0.0..=1.0).contains(&report.top1));
        assert!(report.mean_matched_prob > 0.0 && report.mean_matched_prob <= 1.0);
    }

    #[test]
    fn test_worker_count_does_not_change_scores() {
        let dir  = tempfile::tempdir().unwrap();
        let task = RetrievalTask::ImageToImage;
        let pairs: Vec<PairRecord> = (0..4u8)
            .map(|i| {
                for (side, colour) in [("q", [i * 60, 30, 200]), ("t", [200, i * 60, 30])] {
                    RgbImage::from_pixel(8, 8, Rgb(colour))
                        .save(dir.path().join(format!("{side}{i}.png")))
                        .unwrap();
                }
                PairRecord::new(format!("q{i}.png"), format!("t{i}.png"))
            })
            .collect();
        let man = JsonManifest::new(dir.path(), dir.path().join("unused.json"), task);

        let cfg    = tiny_config(PromptKind::Shallow);
        let device = Default::default();
        let model  = cfg.init::<TB>(&device).unwrap();

        let score = |workers: usize| {
            let data = TripletDataset::build(&pairs, &man, task, None, false, 0).unwrap();
            Evaluator::new(model.clone(), device.clone(), cfg.clip.image_size, 4, workers)
                .evaluate(data)
                .unwrap()
        };
        let single = score(1);
        let multi  = score(4);

        assert_eq!(single.samples, 4);
        assert_eq!(multi.samples, 4);
        assert_eq!(single.top1, multi.top1);
        assert!((single.mean_matched_prob - multi.mean_matched_prob).abs() < 1e-5);
    }
}
