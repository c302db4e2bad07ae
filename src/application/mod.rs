// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Wires the other layers together for one command.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No argument parsing here (that's Layer 1)
//   - Only workflow coordination

/// Settings shared by both workflows, saved next to checkpoints
pub mod config;

/// The training workflow
pub mod train_use_case;

/// The evaluation workflow
pub mod eval_use_case;
