// ============================================================
// Layer 2 — Run Configuration
// ============================================================
// Every setting of a train or eval run, independent of clap.
// Saved to <output_dir>/run_config.json before training so an
// eval run can rebuild the exact model shape.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::pair::{PromptKind, RetrievalTask};
use crate::ml::model::{ClipConfig, ModelConfig};
use crate::ml::prompt::PromptConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    // project
    pub output_dir:  String,
    pub resume:      Option<String>,
    pub device:      String,
    pub seed:        u64,
    pub num_workers: usize,

    // data
    pub task:               RetrievalTask,
    pub train_dataset_path: String,
    pub test_dataset_path:  String,
    pub train_json_path:    String,
    pub test_json_path:     String,
    pub batch_size:         usize,
    pub epochs:             usize,
    pub shuffle:            bool,
    pub tokenizer:          Option<String>,

    // optimisation
    pub clip_ln_lr: f64,
    pub prompt_lr:  f64,
    pub margin:     f64,
    pub patience:   usize,
    pub min_loss:   f64,

    // model
    pub backbone_weights: Option<String>,
    pub model:            ModelConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir:  "output/".to_string(),
            resume:      None,
            device:      "default".to_string(),
            seed:        42,
            num_workers: 4,

            task:               RetrievalTask::ImageToText,
            train_dataset_path: "data/train/".to_string(),
            test_dataset_path:  "data/val/".to_string(),
            train_json_path:    "data/train.json".to_string(),
            test_json_path:     "data/val.json".to_string(),
            batch_size:         256,
            epochs:             100,
            shuffle:            false,
            tokenizer:          None,

            clip_ln_lr: 1e-4,
            prompt_lr:  1e-4,
            margin:     1.0,
            patience:   5,
            min_loss:   1e-4,

            backbone_weights: None,
            model: ModelConfig::new(
                ClipConfig::new(),
                PromptConfig::new(PromptKind::Shallow, 3, 50176),
            ),
        }
    }
}

impl RunConfig {
    /// Reject settings that would fail later with a less useful message.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.patience == 0 {
            bail!("patience must be at least 1");
        }
        if !(self.margin >= 0.0) {
            bail!("margin must be a non-negative number (got {})", self.margin);
        }
        if self.clip_ln_lr < 0.0 || self.prompt_lr < 0.0 {
            bail!("learning rates must be non-negative");
        }
        self.model.validate()
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }

    pub fn resume_path(&self) -> Option<PathBuf> {
        self.resume.as_ref().map(PathBuf::from)
    }

    pub fn backbone_path(&self) -> Option<PathBuf> {
        self.backbone_weights.as_ref().map(PathBuf::from)
    }

    pub fn tokenizer_path(&self) -> Option<PathBuf> {
        self.tokenizer.as_ref().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let cfg = RunConfig { batch_size: 0, ..RunConfig::default() };
        assert!(cfg.validate().is_err());

        let cfg = RunConfig { margin: f64::NAN, ..RunConfig::default() };
        assert!(cfg.validate().is_err());

        let mut cfg = RunConfig::default();
        cfg.model.prompt.prompt_dim = 7;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_keeps_model_shape() {
        let mut cfg = RunConfig::default();
        cfg.model.clip.vision_layers = 3;
        cfg.task = RetrievalTask::ImageToImage;
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model.clip.vision_layers, 3);
        assert_eq!(back.task, RetrievalTask::ImageToImage);
    }
}
