// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// Business logic is delegated to Layer 2 (application).
//
//   1. `train` — tunes the prompt, writes checkpoints + losses.csv
//   2. `eval`  — loads a checkpoint and scores the test split

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, RunArgs};

#[derive(Parser, Debug)]
#[command(
    name = "prompt-retrieval",
    version,
    about = "Prompt-tune a frozen CLIP-style backbone for image retrieval, then evaluate it."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Eval(args)  => run_eval(args),
        }
    }
}

fn run_train(args: RunArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!(
        "Starting {} training on '{}'",
        args.task, args.train_json_path
    );
    let report = TrainUseCase::new(args.into()).execute()?;

    match report.best_epoch {
        Some(epoch) => println!(
            "Training complete after {} epochs. Best loss {:.6} at epoch_{}.",
            report.epochs_run, report.best_loss, epoch
        ),
        None => println!(
            "Training complete after {} epochs. No checkpoint was written.",
            report.epochs_run
        ),
    }
    Ok(())
}

fn run_eval(args: RunArgs) -> Result<()> {
    use crate::application::eval_use_case::EvalUseCase;

    let report = EvalUseCase::new(args.into()).execute()?;
    println!(
        "\nEvaluated {} pairs | top-1 = {:.2}% | mean matched probability = {:.4}",
        report.samples,
        report.top1 * 100.0,
        report.mean_matched_prob
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::RunConfig;
    use crate::domain::pair::{PromptKind, RetrievalTask};

    #[test]
    fn test_defaults_match_run_config() {
        let cli = Cli::try_parse_from(["prompt-retrieval", "train"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: RunConfig = args.into();
        let def = RunConfig::default();
        assert_eq!(cfg.batch_size, def.batch_size);
        assert_eq!(cfg.task, RetrievalTask::ImageToText);
        assert_eq!(cfg.model.prompt.kind, PromptKind::Shallow);
        assert_eq!(cfg.model.prompt.prompt_dim, 50176);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_flags_reach_config() {
        let cli = Cli::try_parse_from([
            "prompt-retrieval", "eval",
            "--type", "image2image",
            "--prompt", "DeepPrompt",
            "--prompt-dim", "768",
            "--resume", "output/best",
            "--device", "cuda:1",
        ])
        .unwrap();
        let Commands::Eval(args) = cli.command else { panic!("expected eval") };
        let cfg: RunConfig = args.into();
        assert_eq!(cfg.task, RetrievalTask::ImageToImage);
        assert_eq!(cfg.model.prompt.kind, PromptKind::Deep);
        assert_eq!(cfg.resume.as_deref(), Some("output/best"));
        assert_eq!(cfg.device, "cuda:1");
    }

    #[test]
    fn test_unknown_task_rejected() {
        assert!(Cli::try_parse_from(["prompt-retrieval", "train", "--type", "text2image"]).is_err());
    }
}
