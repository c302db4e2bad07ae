// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from an annotation file on disk to tensor batches.
//
//   JSON annotations + image root
//       │
//       ▼
//   JsonManifest      → reads pairs, skips rows with missing files
//       │
//       ▼
//   CaptionEncoder    → tokenises captions into fixed-length ids
//       │               (image2text only)
//       ▼
//   TripletDataset    → resolves paths, draws negatives,
//       │               implements Burn's Dataset trait
//       ▼
//   TripletBatcher    → decodes + preprocesses images,
//       │               stacks samples into tensors
//       ▼
//   DataLoader        → feeds batches to the trainer / evaluator
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads (anchor, positive) pairs from a JSON annotation file
pub mod manifest;

/// Decodes, crops and normalises images
pub mod preprocessor;

/// Turns captions into SOT … EOT token sequences
pub mod caption;

/// Implements Burn's Dataset trait for triplets
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
