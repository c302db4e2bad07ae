// ============================================================
// Layer 4 — Annotation Manifest Loader
// ============================================================
// Reads a JSON annotation file describing (anchor, positive)
// pairs whose images live under a dataset root directory.
//
// Two layouts are accepted:
//
//   [ {"image": "n01/x.jpg", "caption": "a long caption"}, ... ]
//   { "n01/x.jpg": "a long caption", ... }
//
// For image2image the keys are "query" / "target" (or the map
// form with an image path as the value).
//
// Rows whose image files are missing are skipped with a warning,
// like unreadable documents were skipped by the old loader.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
};

use crate::domain::pair::{PairRecord, RetrievalTask};
use crate::domain::traits::PairSource;

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    Rows(Vec<PairRecord>),
    Map(BTreeMap<String, String>),
}

impl ManifestFile {
    fn into_records(self) -> Vec<PairRecord> {
        match self {
            ManifestFile::Rows(rows) => rows,
            ManifestFile::Map(map) => map
                .into_iter()
                .map(|(anchor, positive)| PairRecord { anchor, positive })
                .collect(),
        }
    }
}

/// Loads pairs from `json_path`, resolving image paths against `root`.
pub struct JsonManifest {
    root:      PathBuf,
    json_path: PathBuf,
    task:      RetrievalTask,
}

impl JsonManifest {
    pub fn new(
        root:      impl Into<PathBuf>,
        json_path: impl Into<PathBuf>,
        task:      RetrievalTask,
    ) -> Self {
        Self {
            root:      root.into(),
            json_path: json_path.into(),
            task,
        }
    }

    /// Absolute (root-joined) path for a relative image entry
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn row_is_usable(&self, record: &PairRecord) -> bool {
        let anchor = self.resolve(&record.anchor);
        if !anchor.is_file() {
            tracing::warn!("Skipping '{}': image not found", anchor.display());
            return false;
        }
        if self.task.positive_is_image() {
            let positive = self.resolve(&record.positive);
            if !positive.is_file() {
                tracing::warn!("Skipping '{}': image not found", positive.display());
                return false;
            }
        } else if record.positive.trim().is_empty() {
            tracing::warn!("Skipping '{}': empty caption", record.anchor);
            return false;
        }
        true
    }
}

impl PairSource for JsonManifest {
    fn load_pairs(&self) -> Result<Vec<PairRecord>> {
        let raw = fs::read_to_string(&self.json_path).with_context(|| {
            format!("Cannot read annotations '{}'", self.json_path.display())
        })?;

        let parsed: ManifestFile = serde_json::from_str(&raw).with_context(|| {
            format!(
                "'{}' is neither a list of pair objects nor an object map",
                self.json_path.display()
            )
        })?;

        let rows  = parsed.into_records();
        let total = rows.len();
        let kept: Vec<PairRecord> = rows
            .into_iter()
            .filter(|r| self.row_is_usable(r))
            .collect();

        if kept.is_empty() {
            bail!(
                "No usable pairs in '{}' (root '{}', {} rows read)",
                self.json_path.display(),
                self.root.display(),
                total
            );
        }

        tracing::info!(
            "Loaded {} of {} {} pairs from '{}'",
            kept.len(),
            total,
            self.task,
            self.json_path.display()
        );
        Ok(kept)
    }
}
