// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `eval`. Both take the
// same flags so a training command line can be re-run as eval
// by swapping the subcommand.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::config::RunConfig;
use crate::domain::pair::{PromptKind, RetrievalTask};
use crate::ml::model::{ClipConfig, ModelConfig};
use crate::ml::prompt::PromptConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Tune the visual prompt with a triplet loss
    Train(RunArgs),

    /// Print retrieval scores of a checkpoint on the test split
    Eval(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    // ── project ───────────────────────────────────────────────────────────────
    /// Where checkpoints, losses.csv, run_config.json and tokenizer.json go
    #[arg(long, default_value = "output/")]
    pub output_dir: String,

    /// Checkpoint to load first (.mpk.gz suffix optional)
    #[arg(long)]
    pub resume: Option<String>,

    /// default, cpu, gpu[:N], cuda[:N] or integrated[:N]
    #[arg(long, default_value = "default")]
    pub device: String,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Data-loader worker threads
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    // ── data ──────────────────────────────────────────────────────────────────
    /// image2text or image2image
    #[arg(long = "type", default_value = "image2text")]
    pub task: RetrievalTask,

    #[arg(long, default_value = "data/train/")]
    pub train_dataset_path: String,

    #[arg(long, default_value = "data/val/")]
    pub test_dataset_path: String,

    #[arg(long, default_value = "data/train.json")]
    pub train_json_path: String,

    #[arg(long, default_value = "data/val.json")]
    pub test_json_path: String,

    #[arg(long, default_value_t = 256)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 100)]
    pub epochs: usize,

    /// Shuffle training batches every epoch
    #[arg(long)]
    pub shuffle: bool,

    /// HuggingFace tokenizer.json; a word-level one is built from the
    /// training captions when absent
    #[arg(long)]
    pub tokenizer: Option<String>,

    // ── prompt ────────────────────────────────────────────────────────────────
    /// ShallowPrompt or DeepPrompt
    #[arg(long, default_value = "ShallowPrompt")]
    pub prompt: PromptKind,

    #[arg(long, default_value_t = 3)]
    pub n_prompts: usize,

    #[arg(long, default_value_t = 50176)]
    pub prompt_dim: usize,

    // ── optimisation ──────────────────────────────────────────────────────────
    /// Learning rate of the backbone layer norms
    #[arg(long, default_value_t = 1e-4)]
    pub clip_ln_lr: f64,

    #[arg(long, default_value_t = 1e-4)]
    pub prompt_lr: f64,

    /// Triplet margin
    #[arg(long, default_value_t = 1.0)]
    pub margin: f64,

    /// Epochs without improvement before stopping
    #[arg(long, default_value_t = 5)]
    pub patience: usize,

    /// Stop once the best epoch loss falls below this
    #[arg(long, default_value_t = 1e-4)]
    pub min_loss: f64,

    // ── backbone (CLIP ViT-B/32 defaults) ─────────────────────────────────────
    /// Burn record of backbone weights to start from
    #[arg(long)]
    pub backbone_weights: Option<String>,

    #[arg(long, default_value_t = 512)]
    pub embed_dim: usize,

    #[arg(long, default_value_t = 224)]
    pub image_size: usize,

    #[arg(long, default_value_t = 32)]
    pub patch_size: usize,

    #[arg(long, default_value_t = 768)]
    pub vision_width: usize,

    #[arg(long, default_value_t = 12)]
    pub vision_layers: usize,

    #[arg(long, default_value_t = 12)]
    pub vision_heads: usize,

    #[arg(long, default_value_t = 77)]
    pub context_length: usize,

    #[arg(long, default_value_t = 49408)]
    pub vocab_size: usize,

    #[arg(long, default_value_t = 512)]
    pub text_width: usize,

    #[arg(long, default_value_t = 12)]
    pub text_layers: usize,

    #[arg(long, default_value_t = 8)]
    pub text_heads: usize,
}

/// Convert CLI args into the application-level config.
/// Clap types stop here.
impl From<RunArgs> for RunConfig {
    fn from(a: RunArgs) -> Self {
        let clip = ClipConfig::new()
            .with_embed_dim(a.embed_dim)
            .with_image_size(a.image_size)
            .with_patch_size(a.patch_size)
            .with_vision_width(a.vision_width)
            .with_vision_layers(a.vision_layers)
            .with_vision_heads(a.vision_heads)
            .with_context_length(a.context_length)
            .with_vocab_size(a.vocab_size)
            .with_text_width(a.text_width)
            .with_text_layers(a.text_layers)
            .with_text_heads(a.text_heads);
        let prompt = PromptConfig::new(a.prompt, a.n_prompts, a.prompt_dim);

        RunConfig {
            output_dir:  a.output_dir,
            resume:      a.resume,
            device:      a.device,
            seed:        a.seed,
            num_workers: a.num_workers,

            task:               a.task,
            train_dataset_path: a.train_dataset_path,
            test_dataset_path:  a.test_dataset_path,
            train_json_path:    a.train_json_path,
            test_json_path:     a.test_json_path,
            batch_size:         a.batch_size,
            epochs:             a.epochs,
            shuffle:            a.shuffle,
            tokenizer:          a.tokenizer,

            clip_ln_lr: a.clip_ln_lr,
            prompt_lr:  a.prompt_lr,
            margin:     a.margin,
            patience:   a.patience,
            min_loss:   a.min_loss,

            backbone_weights: a.backbone_weights,
            model:            ModelConfig::new(clip, prompt),
        }
    }
}
