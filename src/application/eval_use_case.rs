// ============================================================
// Layer 2 — EvalUseCase
// ============================================================
// Scores a checkpoint on the test split:
//
//   Step 1: Adopt the model shape saved beside --resume, if any
//   Step 2: Load annotation pairs + tokenizer
//   Step 3: Build the test dataset (no negatives)
//   Step 4: Build the model and load the checkpoint
//   Step 5: Run the evaluator
//
// Evaluation runs on the plain WGPU backend, no autodiff.

use anyhow::Result;
use burn::{backend::Wgpu, prelude::*};

use crate::application::config::RunConfig;
use crate::application::train_use_case::caption_encoder;
use crate::data::{dataset::TripletDataset, manifest::JsonManifest};
use crate::domain::traits::PairSource;
use crate::infra::{
    checkpoint::{load_config_beside, restore},
    device::parse_device,
};
use crate::ml::evaluator::{EvalReport, Evaluator};

type EvalBackend = Wgpu;

pub struct EvalUseCase {
    config: RunConfig,
}

impl EvalUseCase {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<EvalReport> {
        // ── Step 1: Model shape ───────────────────────────────────────────────
        let mut cfg = self.config.clone();
        let resume  = cfg.resume_path();
        if let Some(checkpoint) = &resume {
            if let Some(saved) = load_config_beside(checkpoint)? {
                tracing::info!("Using model config saved beside '{}'", checkpoint.display());
                cfg.model = saved.model;
                if cfg.tokenizer.is_none() {
                    cfg.tokenizer = saved.tokenizer;
                }
            }
        }
        cfg.validate()?;

        // Tokenizer built during training lives beside the checkpoint
        let store_dir = resume
            .as_ref()
            .and_then(|p| p.parent().map(|d| d.to_path_buf()))
            .unwrap_or_else(|| cfg.output_dir());

        // ── Step 2 ────────────────────────────────────────────────────────────
        let manifest = JsonManifest::new(&cfg.test_dataset_path, &cfg.test_json_path, cfg.task);
        let pairs    = manifest.load_pairs()?;
        let encoder  = caption_encoder(&cfg, &store_dir, &pairs)?;

        // ── Step 3 ────────────────────────────────────────────────────────────
        let dataset = TripletDataset::build(&pairs, &manifest, cfg.task, encoder.as_ref(), false, cfg.seed)?;
        tracing::info!("Evaluating {} {} pairs", dataset.sample_count(), cfg.task);

        // ── Step 4 ────────────────────────────────────────────────────────────
        let device = parse_device(&cfg.device)?;
        tracing::info!("Using WGPU device: {:?}", device);
        EvalBackend::seed(cfg.seed);

        if resume.is_none() {
            tracing::warn!("No --resume checkpoint given; evaluating an untuned prompt");
        }
        let model = cfg.model.init::<EvalBackend>(&device)?;
        let model = restore(model, cfg.backbone_path().as_deref(), resume.as_deref(), &device)?;

        // ── Step 5 ────────────────────────────────────────────────────────────
        Evaluator::new(model, device, cfg.model.clip.image_size, cfg.batch_size, cfg.num_workers)
            .evaluate(dataset)
    }
}
