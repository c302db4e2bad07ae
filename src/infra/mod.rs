// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by several layers:
//
//   checkpoint.rs      — model weights as gzipped half-precision records,
//                        plus run_config.json so eval can rebuild
//                        the model shape
//   tokenizer_store.rs — loads a tokenizer.json or builds a
//                        word-level one from the training captions
//   metrics.rs         — per-epoch loss history as CSV
//   device.rs          — --device flag → WGPU device
//
// Reference: Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Tokenizer loading, building and saving
pub mod tokenizer_store;

/// Loss history CSV logger
pub mod metrics;

pub mod device;
