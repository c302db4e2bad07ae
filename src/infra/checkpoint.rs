// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights as gzipped MessagePack records
// in half precision (Burn's NamedMpkGzFileRecorder).
//
// Files in the output directory:
//
//   output/
//     epoch_0.mpk.gz     ← written whenever the epoch loss improves
//     epoch_3.mpk.gz
//     best.mpk.gz        ← copy of the latest improvement
//     best_epoch.json    ← epoch number of best.mpk.gz
//     run_config.json    ← flags of the run, incl. model shape
//
// Paths passed to --resume / --backbone-weights may include or
// omit the .mpk.gz (or .mpk) suffix; the recorder adds .mpk.gz back.

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    prelude::*,
    record::{HalfPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};

use crate::application::config::RunConfig;
use crate::ml::model::PromptedClip;

type CheckpointRecorder = NamedMpkGzFileRecorder<HalfPrecisionSettings>;

const RECORD_SUFFIX: &str = ".mpk.gz";
const PLAIN_SUFFIX: &str = ".mpk";
const BEST_NAME: &str = "best";
const BEST_EPOCH_FILE: &str = "best_epoch.json";
pub const CONFIG_FILE: &str = "run_config.json";

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Record path (with suffix) of the checkpoint for `epoch`
    pub fn epoch_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("epoch_{epoch}{RECORD_SUFFIX}"))
    }

    pub fn best_path(&self) -> PathBuf {
        self.dir.join(format!("{BEST_NAME}{RECORD_SUFFIX}"))
    }

    /// Write epoch_{n} and best, then point best_epoch.json at `epoch`.
    pub fn save_model<B: Backend>(&self, model: &PromptedClip<B>, epoch: usize) -> Result<PathBuf> {
        let recorder = CheckpointRecorder::new();
        for stem in [format!("epoch_{epoch}"), BEST_NAME.to_string()] {
            let path = self.dir.join(stem);
            recorder
                .record(model.clone().into_record(), path.clone())
                .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;
        }

        let pointer = self.dir.join(BEST_EPOCH_FILE);
        fs::write(&pointer, serde_json::to_string(&epoch)?)
            .with_context(|| format!("Failed to write '{}'", pointer.display()))?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(self.epoch_path(epoch))
    }

    /// Must be called before training so eval can rebuild the model.
    pub fn save_config(&self, cfg: &RunConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved run config to '{}'", path.display());
        Ok(())
    }
}

/// The run config saved next to a checkpoint file, if there is one.
pub fn load_config_beside(checkpoint: &Path) -> Result<Option<RunConfig>> {
    let dir = checkpoint.parent().unwrap_or_else(|| Path::new("."));
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(&path)
        .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
    let cfg = serde_json::from_str(&json)
        .with_context(|| format!("'{}' is not a valid run config", path.display()))?;
    Ok(Some(cfg))
}

/// Strip a trailing .mpk.gz or .mpk so the recorder does not double it.
pub fn record_stem(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text
        .strip_suffix(RECORD_SUFFIX)
        .or_else(|| text.strip_suffix(PLAIN_SUFFIX))
    {
        Some(stem) => PathBuf::from(stem),
        None => path.to_path_buf(),
    }
}

/// Load a full PromptedClip record (prompt + backbone).
pub fn load_model<B: Backend>(
    model:  PromptedClip<B>,
    path:   &Path,
    device: &B::Device,
) -> Result<PromptedClip<B>> {
    let stem = record_stem(path);
    let record = CheckpointRecorder::new()
        .load(stem.clone(), device)
        .with_context(|| format!("Cannot load checkpoint '{}{RECORD_SUFFIX}'", stem.display()))?;
    tracing::info!("Loaded checkpoint '{}{RECORD_SUFFIX}'", stem.display());
    Ok(model.load_record(record).refreeze())
}

/// Load only the backbone weights (e.g. converted pretrained CLIP weights).
pub fn load_backbone<B: Backend>(
    model:  PromptedClip<B>,
    path:   &Path,
    device: &B::Device,
) -> Result<PromptedClip<B>> {
    let stem = record_stem(path);
    let record = CheckpointRecorder::new()
        .load(stem.clone(), device)
        .with_context(|| format!("Cannot load backbone weights '{}{RECORD_SUFFIX}'", stem.display()))?;
    tracing::info!("Loaded backbone weights '{}{RECORD_SUFFIX}'", stem.display());
    let PromptedClip { backbone, prompt } = model;
    Ok(PromptedClip { backbone: backbone.load_record(record), prompt }.refreeze())
}

/// Apply --backbone-weights then --resume, whichever are given.
pub fn restore<B: Backend>(
    mut model:        PromptedClip<B>,
    backbone_weights: Option<&Path>,
    resume:           Option<&Path>,
    device:           &B::Device,
) -> Result<PromptedClip<B>> {
    if let Some(path) = backbone_weights {
        model = load_backbone(model, path, device)?;
    }
    if let Some(path) = resume {
        model = load_model(model, path, device)?;
    }
    Ok(model)
}
