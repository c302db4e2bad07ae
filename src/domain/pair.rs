// ============================================================
// Layer 3 — Pair Domain Types
// ============================================================
// A retrieval run is trained on annotated pairs:
//
//   image2text:  anchor = image path,  positive = long caption
//   image2image: anchor = query image, positive = matching image
//
// The negative of each triplet is not annotated; the dataset
// draws it from another row at load time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ─── RetrievalTask ────────────────────────────────────────────────────────────
/// Which modality the positive side of a pair carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalTask {
    #[serde(rename = "image2text")]
    ImageToText,
    #[serde(rename = "image2image")]
    ImageToImage,
}

impl RetrievalTask {
    /// True when the positive column holds image paths
    pub fn positive_is_image(self) -> bool {
        matches!(self, RetrievalTask::ImageToImage)
    }
}

impl FromStr for RetrievalTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image2text" => Ok(RetrievalTask::ImageToText),
            "image2image" => Ok(RetrievalTask::ImageToImage),
            other => Err(format!(
                "unknown task '{other}', expected 'image2text' or 'image2image'"
            )),
        }
    }
}

impl fmt::Display for RetrievalTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalTask::ImageToText => write!(f, "image2text"),
            RetrievalTask::ImageToImage => write!(f, "image2image"),
        }
    }
}

// ─── PromptKind ───────────────────────────────────────────────────────────────
/// Where the learned prompt enters the vision tower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptKind {
    /// Added to the input pixels, once
    #[serde(rename = "ShallowPrompt")]
    Shallow,
    /// Prompt tokens re-inserted before every vision block
    #[serde(rename = "DeepPrompt")]
    Deep,
}

impl FromStr for PromptKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shallowprompt" | "shallow" => Ok(PromptKind::Shallow),
            "deepprompt" | "deep" => Ok(PromptKind::Deep),
            other => Err(format!(
                "unknown prompt '{other}', expected 'ShallowPrompt' or 'DeepPrompt'"
            )),
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptKind::Shallow => write!(f, "ShallowPrompt"),
            PromptKind::Deep => write!(f, "DeepPrompt"),
        }
    }
}

// ─── Split ────────────────────────────────────────────────────────────────────
/// Selects augmentation: random crop + flip for Train, centre crop for Test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

// ─── PairRecord ───────────────────────────────────────────────────────────────
/// One row of an annotation file.
///
/// `anchor` is always an image path relative to the dataset root.
/// `positive` is a caption or a second relative image path,
/// depending on the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRecord {
    #[serde(alias = "image", alias = "query")]
    pub anchor: String,

    #[serde(alias = "caption", alias = "target")]
    pub positive: String,
}

impl PairRecord {
    pub fn new(anchor: impl Into<String>, positive: impl Into<String>) -> Self {
        Self {
            anchor:   anchor.into(),
            positive: positive.into(),
        }
    }
}
