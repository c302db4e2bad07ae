// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Triplet-loss training of the visual prompt (and the backbone
// layer norms) using Burn's DataLoader and two Adam optimisers.
//
// Per batch:
//   anchor   = encode_image(anchors)
//   positive = encode_text(captions) | encode_image(positives)
//   negative = encode_image(negatives)
//   loss     = triplet_margin_loss(anchor, positive, negative)
//
// Gradients are split by module: the prompt steps with
// prompt_lr, the backbone (only its layer norms carry
// gradients) with clip_ln_lr.
//
// Per epoch:
//   mean batch loss (rounded to 6 decimals) → EarlyStopping;
//   improvement writes epoch_{n} + best, every epoch appends a
//   row to losses.csv. Epochs are numbered from 0.

use anyhow::{bail, Result};
use burn::{
    backend::{wgpu::WgpuDevice, Autodiff, Wgpu},
    data::dataset::Dataset,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::application::config::RunConfig;
use crate::data::{
    batcher::{triplet_loader, TripletBatch},
    dataset::TripletDataset,
    preprocessor::ImagePreprocessor,
};
use crate::domain::pair::Split;
use crate::infra::{
    checkpoint::{restore, CheckpointManager},
    device::parse_device,
    metrics::{EpochLoss, MetricsLogger},
};
use crate::ml::early_stopping::{epoch_loss, EarlyStopping};
use crate::ml::loss::triplet_margin_loss;
use crate::ml::model::PromptedClip;

pub type TrainBackend = Autodiff<Wgpu>;

/// What a finished run looked like.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub epochs_run:    usize,
    pub best_loss:     f64,
    /// Epoch of the last checkpoint written, if any
    pub best_epoch:    Option<usize>,
    pub stopped_early: bool,
}

pub fn run_training(
    cfg:     &RunConfig,
    dataset: TripletDataset,
    ckpt:    &CheckpointManager,
    metrics: &MetricsLogger,
) -> Result<TrainReport> {
    let device: WgpuDevice = parse_device(&cfg.device)?;
    tracing::info!("Using WGPU device: {:?}", device);
    TrainBackend::seed(cfg.seed);

    let model = cfg.model.init::<TrainBackend>(&device)?;
    let model = restore(
        model,
        cfg.backbone_path().as_deref(),
        cfg.resume_path().as_deref(),
        &device,
    )?;
    tracing::info!(
        "Model ready: {} prompt, {} vision layers, {} text layers",
        cfg.model.prompt.kind,
        cfg.model.clip.vision_layers,
        cfg.model.clip.text_layers,
    );

    let (_, report) = train_loop(cfg, model, dataset, &device, ckpt, metrics)?;
    Ok(report)
}

pub fn train_loop<B: AutodiffBackend>(
    cfg:     &RunConfig,
    model:   PromptedClip<B>,
    dataset: TripletDataset,
    device:  &B::Device,
    ckpt:    &CheckpointManager,
    metrics: &MetricsLogger,
) -> Result<(PromptedClip<B>, TrainReport)> {
    let batches_per_epoch = dataset.len() / cfg.batch_size;
    if batches_per_epoch == 0 {
        bail!("Training set has no full batch of {}", cfg.batch_size);
    }

    // ── Data loader ───────────────────────────────────────────────────────────
    let loader = triplet_loader::<B>(
        dataset,
        cfg.batch_size,
        ImagePreprocessor::new(cfg.model.clip.image_size, Split::Train),
        device.clone(),
        cfg.num_workers,
        cfg.shuffle.then_some(cfg.seed),
    )?;

    // ── Optimisers ────────────────────────────────────────────────────────────
    let mut prompt_optim = AdamConfig::new().init();
    let mut ln_optim     = AdamConfig::new().init();

    // ── Progress bars ─────────────────────────────────────────────────────────
    let bars  = MultiProgress::new();
    let style = ProgressStyle::default_bar()
        .template("{prefix:>10} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
        .progress_chars("#>-");
    let epoch_bar = bars.add(ProgressBar::new(cfg.epochs as u64));
    epoch_bar.set_style(style.clone());
    epoch_bar.set_prefix("epochs");

    let mut stopper    = EarlyStopping::new(cfg.patience, cfg.min_loss);
    let mut model      = model;
    let mut best_epoch = None;
    let mut epochs_run = 0;
    let mut stopped    = false;

    for epoch in 0..cfg.epochs {
        let batch_bar = bars.add(ProgressBar::new(batches_per_epoch as u64));
        batch_bar.set_style(style.clone());
        batch_bar.set_prefix(format!("epoch {epoch}"));

        let mut batch_losses = Vec::with_capacity(batches_per_epoch);
        for batch in loader.iter() {
            let loss = batch_loss(&model, batch, cfg.margin)?;
            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
            batch_losses.push(loss_val);
            batch_bar.set_message(format!("loss: {loss_val:.6}"));
            batch_bar.inc(1);
            tracing::debug!("loss: {:.6}", loss_val);

            // Backward pass, then one step per parameter group
            let mut grads     = loss.backward();
            let prompt_grads  = GradientsParams::from_module(&mut grads, &model.prompt);
            let ln_grads      = GradientsParams::from_module(&mut grads, &model.backbone);
            let PromptedClip { backbone, prompt } = model;
            model = PromptedClip {
                prompt:   prompt_optim.step(cfg.prompt_lr, prompt, prompt_grads),
                backbone: ln_optim.step(cfg.clip_ln_lr, backbone, ln_grads),
            };
        }
        batch_bar.finish_and_clear();
        epochs_run += 1;

        let Some(loss) = epoch_loss(&batch_losses) else {
            bail!("Epoch {epoch} produced no batches");
        };
        let verdict = stopper.observe(loss);
        tracing::info!("epoch_{} loss is {}", epoch, loss);

        if verdict.improved {
            let path = ckpt.save_model(&model, epoch)?;
            best_epoch = Some(epoch);
            tracing::info!("Saved '{}'", path.display());
        }
        metrics.log(&EpochLoss {
            epoch,
            loss,
            best_loss: stopper.best(),
            improved:  verdict.improved,
        })?;

        epoch_bar.set_message(format!("best: {:.6}", stopper.best()));
        epoch_bar.inc(1);

        if verdict.stop {
            tracing::info!(
                "Stopping after epoch {}: best loss {} ({} epochs without improvement)",
                epoch,
                stopper.best(),
                stopper.epochs_since_best(),
            );
            stopped = epoch + 1 < cfg.epochs;
            break;
        }
    }
    epoch_bar.finish_with_message(format!("best: {:.6}", stopper.best()));

    let report = TrainReport {
        epochs_run,
        best_loss: stopper.best(),
        best_epoch,
        stopped_early: stopped,
    };
    Ok((model, report))
}

/// Triplet loss of one training batch.
fn batch_loss<B: Backend>(
    model:  &PromptedClip<B>,
    batch:  TripletBatch<B>,
    margin: f64,
) -> Result<Tensor<B, 1>> {
    let Some(negatives) = batch.negatives else {
        bail!("Training batch has no negatives");
    };
    let anchor   = model.encode_image(batch.anchors);
    let positive = model.encode_positive(batch.positive);
    let negative = model.encode_image(negatives);
    Ok(triplet_margin_loss(anchor, positive, negative, margin))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::manifest::JsonManifest;
    use crate::domain::pair::{PairRecord, PromptKind, RetrievalTask};
    use crate::ml::model::tests::tiny_config;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    type TB = Autodiff<NdArray>;

    fn image_pairs(dir: &Path, n: usize) -> Vec<PairRecord> {
        (0..n)
            .map(|i| {
                let shade = (i * 60) as u8;
                for side in ["q", "t"] {
                    let colour = if side == "q" { [shade, 0, 255 - shade] } else { [0, shade, 128] };
                    RgbImage::from_pixel(10, 10, Rgb(colour))
                        .save(dir.join(format!("{side}{i}.png")))
                        .unwrap();
                }
                PairRecord::new(format!("q{i}.png"), format!("t{i}.png"))
            })
            .collect()
    }

    fn test_config(out: &Path, epochs: usize) -> RunConfig {
        RunConfig {
            output_dir:  out.display().to_string(),
            task:        RetrievalTask::ImageToImage,
            batch_size:  2,
            epochs,
            num_workers: 1,
            // large margin keeps every triplet active
            margin:      100.0,
            prompt_lr:   1e-2,
            clip_ln_lr:  1e-2,
            model:       tiny_config(PromptKind::Shallow),
            ..RunConfig::default()
        }
    }

    fn values<const D: usize>(t: Tensor<NdArray, D>) -> Vec<f32> {
        t.into_data().to_vec().unwrap()
    }

    fn changed(before: &[f32], after: &[f32]) -> bool {
        before.iter().zip(after).any(|(a, b)| (a - b).abs() > 1e-6)
    }

    #[test]
    fn test_training_updates_prompt_and_layer_norms_only() {
        let data = tempfile::tempdir().unwrap();
        let out  = tempfile::tempdir().unwrap();
        let cfg  = test_config(out.path(), 2);

        let pairs    = image_pairs(data.path(), 4);
        let manifest = JsonManifest::new(data.path(), data.path().join("unused.json"), cfg.task);
        let dataset  = TripletDataset::build(&pairs, &manifest, cfg.task, None, true, cfg.seed)
            .unwrap()
            .drop_last(cfg.batch_size)
            .unwrap();

        let device  = Default::default();
        let model   = cfg.model.init::<TB>(&device).unwrap();
        let prompt0 = values(model.prompt.pixels.as_ref().unwrap().val().inner());
        let conv0   = values(model.backbone.visual.conv1.weight.val().inner());
        let ln0     = values(model.backbone.visual.ln_post.gamma.val().inner());

        let ckpt    = CheckpointManager::new(out.path()).unwrap();
        let metrics = MetricsLogger::new(out.path()).unwrap();
        let (model, report) = train_loop(&cfg, model, dataset, &device, &ckpt, &metrics).unwrap();

        let prompt1 = values(model.prompt.pixels.as_ref().unwrap().val().inner());
        let conv1   = values(model.backbone.visual.conv1.weight.val().inner());
        let ln1     = values(model.backbone.visual.ln_post.gamma.val().inner());
        assert!(changed(&prompt0, &prompt1));
        assert!(changed(&ln0, &ln1));
        assert_eq!(conv0, conv1);

        assert_eq!(report.epochs_run, 2);
        assert_eq!(report.best_epoch.map(|e| ckpt.epoch_path(e).exists()), Some(true));
        assert!(ckpt.best_path().exists());

        let csv = std::fs::read_to_string(metrics.csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_caption_training_updates_text_layer_norm() {
        use crate::data::caption::CaptionEncoder;
        use crate::infra::tokenizer_store::word_level_tokenizer;

        let data = tempfile::tempdir().unwrap();
        let out  = tempfile::tempdir().unwrap();
        let cfg  = RunConfig {
            task:        RetrievalTask::ImageToText,
            num_workers: 2,
            ..test_config(out.path(), 1)
        };

        let captions = ["red square", "green square", "blue square", "dark square"];
        let pairs: Vec<PairRecord> = image_pairs(data.path(), 4)
            .into_iter()
            .zip(captions)
            .map(|(p, c)| PairRecord::new(p.anchor, c))
            .collect();
        let texts: Vec<String> = captions.iter().map(|c| c.to_string()).collect();
        let tok = word_level_tokenizer(&texts, cfg.model.clip.vocab_size).unwrap();
        let enc = CaptionEncoder::new(tok, cfg.model.clip.context_length).unwrap();

        let manifest = JsonManifest::new(data.path(), data.path().join("unused.json"), cfg.task);
        let dataset  = TripletDataset::build(&pairs, &manifest, cfg.task, Some(&enc), true, cfg.seed)
            .unwrap()
            .drop_last(cfg.batch_size)
            .unwrap();

        let device = Default::default();
        let model  = cfg.model.init::<TB>(&device).unwrap();
        let ln0    = values(model.backbone.text.ln_final.gamma.val().inner());
        let emb0   = values(model.backbone.text.token_embedding.weight.val().inner());

        let ckpt    = CheckpointManager::new(out.path()).unwrap();
        let metrics = MetricsLogger::new(out.path()).unwrap();
        let (model, report) = train_loop(&cfg, model, dataset, &device, &ckpt, &metrics).unwrap();

        assert_eq!(report.epochs_run, 1);
        assert!(changed(&ln0, &values(model.backbone.text.ln_final.gamma.val().inner())));
        assert_eq!(emb0, values(model.backbone.text.token_embedding.weight.val().inner()));
    }

    #[test]
    fn test_zero_margin_stops_on_tiny_loss() {
        let data = tempfile::tempdir().unwrap();
        let out  = tempfile::tempdir().unwrap();
        // identical images everywhere: every distance is equal,
        // so with no margin the loss is exactly zero
        let pairs: Vec<PairRecord> = (0..4)
            .map(|i| {
                RgbImage::from_pixel(10, 10, Rgb([90, 90, 90]))
                    .save(data.path().join(format!("same{i}.png")))
                    .unwrap();
                PairRecord::new(format!("same{i}.png"), format!("same{i}.png"))
            })
            .collect();
        let cfg = RunConfig { margin: 0.0, ..test_config(out.path(), 10) };

        let manifest = JsonManifest::new(data.path(), data.path().join("unused.json"), cfg.task);
        let dataset  = TripletDataset::build(&pairs, &manifest, cfg.task, None, true, cfg.seed).unwrap();

        let device  = Default::default();
        let model   = cfg.model.init::<TB>(&device).unwrap();
        let ckpt    = CheckpointManager::new(out.path()).unwrap();
        let metrics = MetricsLogger::new(out.path()).unwrap();
        let (_, report) = train_loop(&cfg, model, dataset, &device, &ckpt, &metrics).unwrap();

        assert_eq!(report.epochs_run, 1);
        assert!(report.stopped_early);
        assert_eq!(report.best_epoch, Some(0));
        assert_eq!(report.best_loss, 0.0);
    }

    #[test]
    fn test_too_small_dataset_is_rejected() {
        let data = tempfile::tempdir().unwrap();
        let out  = tempfile::tempdir().unwrap();
        let cfg  = RunConfig { batch_size: 8, ..test_config(out.path(), 1) };

        let pairs    = image_pairs(data.path(), 3);
        let manifest = JsonManifest::new(data.path(), data.path().join("unused.json"), cfg.task);
        let dataset  = TripletDataset::build(&pairs, &manifest, cfg.task, None, true, cfg.seed).unwrap();

        let device  = Default::default();
        let model   = cfg.model.init::<TB>(&device).unwrap();
        let ckpt    = CheckpointManager::new(out.path()).unwrap();
        let metrics = MetricsLogger::new(out.path()).unwrap();
        assert!(train_loop(&cfg, model, dataset, &device, &ckpt, &metrics).is_err());
    }
}
