// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a training run in order:
//
//   Step 1: Validate the run config
//   Step 2: Load annotation pairs        (Layer 4 - data)
//   Step 3: Load / build tokenizer       (Layer 6 - infra, image2text)
//   Step 4: Build the triplet dataset    (Layer 4 - data)
//   Step 5: Save config for eval         (Layer 6 - infra)
//   Step 6: Run training loop            (Layer 5 - ml)
//
// Reference: Burn Book §5 (Training)

use anyhow::{bail, Result};
use std::path::Path;

use crate::application::config::RunConfig;
use crate::data::{
    caption::CaptionEncoder,
    dataset::TripletDataset,
    manifest::JsonManifest,
};
use crate::domain::pair::{PairRecord, RetrievalTask};
use crate::domain::traits::PairSource;
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::MetricsLogger,
    tokenizer_store::TokenizerStore,
};
use crate::ml::trainer::{run_training, TrainReport};

pub struct TrainUseCase {
    config: RunConfig,
}

impl TrainUseCase {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainReport> {
        let cfg = &self.config;

        // ── Step 1 ────────────────────────────────────────────────────────────
        cfg.validate()?;

        // ── Step 2: Annotation pairs ──────────────────────────────────────────
        let manifest = JsonManifest::new(&cfg.train_dataset_path, &cfg.train_json_path, cfg.task);
        let pairs    = manifest.load_pairs()?;

        // ── Step 3: Tokenizer (captions only) ─────────────────────────────────
        let encoder = caption_encoder(cfg, &cfg.output_dir(), &pairs)?;

        // ── Step 4: Dataset with negatives, full batches only ─────────────────
        let dataset = TripletDataset::build(
            &pairs,
            &manifest,
            cfg.task,
            encoder.as_ref(),
            true,
            cfg.seed,
        )?
        .drop_last(cfg.batch_size)?;
        tracing::info!(
            "Training on {} triplets ({} batches of {})",
            dataset.sample_count(),
            dataset.sample_count() / cfg.batch_size,
            cfg.batch_size
        );

        // ── Step 5: Persist the config ────────────────────────────────────────
        let ckpt    = CheckpointManager::new(cfg.output_dir())?;
        ckpt.save_config(cfg)?;
        let metrics = MetricsLogger::new(cfg.output_dir())?;

        // ── Step 6: Train ─────────────────────────────────────────────────────
        let report = run_training(cfg, dataset, &ckpt, &metrics)?;
        tracing::info!("Loss history written to '{}'", metrics.csv_path().display());
        Ok(report)
    }
}

/// Caption encoder for image2text runs, `None` for image2image.
///
/// The tokenizer comes from --tokenizer, else `<store_dir>/tokenizer.json`,
/// else it is built from the captions in `pairs` and saved there.
pub(crate) fn caption_encoder(
    cfg:       &RunConfig,
    store_dir: &Path,
    pairs:     &[PairRecord],
) -> Result<Option<CaptionEncoder>> {
    if cfg.task != RetrievalTask::ImageToText {
        return Ok(None);
    }
    let captions: Vec<String> = pairs.iter().map(|p| p.positive.clone()).collect();
    let tokenizer = TokenizerStore::new(store_dir).resolve(
        cfg.tokenizer_path().as_deref(),
        &captions,
        cfg.model.clip.vocab_size,
    )?;

    let encoder = CaptionEncoder::new(tokenizer, cfg.model.clip.context_length)?;
    if encoder.vocab_size() > cfg.model.clip.vocab_size {
        bail!(
            "Tokenizer has {} entries but the text tower only embeds {} (--vocab-size)",
            encoder.vocab_size(),
            cfg.model.clip.vocab_size
        );
    }
    Ok(Some(encoder))
}
