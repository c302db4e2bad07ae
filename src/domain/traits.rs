// ============================================================
// Layer 3 — Core Traits
// ============================================================

use anyhow::Result;
use crate::domain::pair::PairRecord;

// ─── PairSource ───────────────────────────────────────────────────────────────
/// Anything that can produce annotated (anchor, positive) rows.
///
/// Implementations:
///   - JsonManifest → a JSON annotation file next to an image root
pub trait PairSource {
    /// Load every usable row. Rows that cannot be resolved are skipped
    /// by the implementation; an empty result is an error.
    fn load_pairs(&self) -> Result<Vec<PairRecord>>;
}
