// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All model, loss and optimisation code.
//
//   model.rs          — CLIP-style backbone (vision + text
//                       towers), frozen except for its layer
//                       norms, wrapped with a visual prompt
//   prompt.rs         — ShallowPrompt (pixel space) and
//                       DeepPrompt (per-layer tokens)
//   loss.rs           — triplet margin loss and the softmax
//                       similarity used for evaluation
//   early_stopping.rs — best-loss tracking and the stop rule
//   trainer.rs        — the training loop
//   evaluator.rs      — in-batch retrieval scoring
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)
//            Radford et al. (2021) CLIP
//            Jia et al. (2022) Visual Prompt Tuning

pub mod model;

pub mod prompt;

pub mod loss;

pub mod early_stopping;

/// Training loop with best-loss checkpointing
pub mod trainer;

pub mod evaluator;
