// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Provides the caption tokenizer for a run:
//
//   1. --tokenizer <file>            → load that tokenizer.json
//                                      (e.g. the CLIP BPE tokenizer)
//   2. <output_dir>/tokenizer.json   → reuse the one built earlier
//   3. otherwise                     → build a word-level tokenizer
//                                      from the captions and save it
//
// The built tokenizer is written in HuggingFace JSON format so
// `Tokenizer::from_file` reads it back like any other.

use anyhow::{anyhow, Context, Result};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tokenizers::Tokenizer;

const FILE_NAME: &str = "tokenizer.json";

/// Ids 0..4 are reserved for these, in this order.
const SPECIAL_TOKENS: [&str; 4] = ["[PAD]", "[UNK]", "[SOT]", "[EOT]"];

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(FILE_NAME)
    }

    /// Pick the tokenizer for this run (see the order above).
    pub fn resolve(
        &self,
        explicit:   Option<&Path>,
        captions:   &[String],
        vocab_size: usize,
    ) -> Result<Tokenizer> {
        if let Some(path) = explicit {
            tracing::info!("Loading tokenizer from '{}'", path.display());
            return load(path);
        }
        let saved = self.path();
        if saved.exists() {
            tracing::info!("Loading existing tokenizer from '{}'", saved.display());
            return load(&saved);
        }
        tracing::info!("Building new word-level tokenizer (vocab_size={})", vocab_size);
        self.build_and_save(captions, vocab_size)
    }

    fn build_and_save(&self, captions: &[String], vocab_size: usize) -> Result<Tokenizer> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        let json = word_level_json(captions, vocab_size);
        let path = self.path();
        std::fs::write(&path, serde_json::to_string_pretty(&json)?)
            .with_context(|| format!("Cannot write tokenizer to '{}'", path.display()))?;

        let tokenizer = load(&path)?;
        tracing::info!(
            "Tokenizer built with {} entries, saved to '{}'",
            tokenizer.get_vocab_size(true),
            path.display()
        );
        Ok(tokenizer)
    }
}

pub fn load(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path)
        .map_err(|e| anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
}

/// Build a word-level tokenizer in memory (no file written).
pub fn word_level_tokenizer(captions: &[String], vocab_size: usize) -> Result<Tokenizer> {
    let bytes = serde_json::to_vec(&word_level_json(captions, vocab_size))?;
    Tokenizer::from_bytes(bytes).map_err(|e| anyhow!("Cannot build tokenizer: {e}"))
}

/// Most frequent lowercase words first, ids dense after the specials.
fn word_level_json(captions: &[String], vocab_size: usize) -> serde_json::Value {
    let mut freq: HashMap<String, usize> = HashMap::new();
    for text in captions {
        for word in text.split_whitespace() {
            let w = word.to_lowercase();
            let w = w.trim_matches(|c: char| !c.is_alphanumeric());
            if !w.is_empty() {
                *freq.entry(w.to_string()).or_insert(0) += 1;
            }
        }
    }

    // ties broken alphabetically so the same corpus gives the same ids
    let mut words: Vec<(String, usize)> = freq.into_iter().collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    words.truncate(vocab_size.saturating_sub(SPECIAL_TOKENS.len()));

    let mut vocab = serde_json::Map::new();
    let mut added = Vec::new();
    for (id, token) in SPECIAL_TOKENS.iter().enumerate() {
        vocab.insert(token.to_string(), serde_json::json!(id));
        added.push(serde_json::json!({
            "id": id, "content": token, "single_word": false, "lstrip": false,
            "rstrip": false, "normalized": false, "special": true
        }));
    }
    for (word, _) in words {
        let next_id = vocab.len();
        vocab.entry(word).or_insert_with(|| serde_json::json!(next_id));
    }

    serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added,
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": true,
            "handle_chinese_chars": true,
            "strip_accents": null,
            "lowercase": true
        },
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "[UNK]"
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        vec!["A dog runs".into(), "a dog sleeps".into(), "a cat".into()]
    }

    #[test]
    fn test_frequent_words_get_low_ids() {
        let tok = word_level_tokenizer(&corpus(), 100).unwrap();
        assert_eq!(tok.token_to_id("[PAD]"), Some(0));
        assert_eq!(tok.token_to_id("[EOT]"), Some(3));
        assert_eq!(tok.token_to_id("a"), Some(4));
        assert_eq!(tok.token_to_id("dog"), Some(5));
    }

    #[test]
    fn test_vocab_size_caps_entries() {
        let tok = word_level_tokenizer(&corpus(), 6).unwrap();
        assert_eq!(tok.get_vocab_size(true), 6);
        let enc = tok.encode("cat", false).unwrap();
        assert_eq!(enc.get_ids(), &[1]); // [UNK]
    }

    #[test]
    fn test_resolve_builds_then_reuses() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        let built = store.resolve(None, &corpus(), 50).unwrap();
        assert!(store.path().exists());

        // different corpus, but the saved file wins
        let again = store.resolve(None, &["zebra".to_string()], 50).unwrap();
        assert_eq!(again.token_to_id("dog"), built.token_to_id("dog"));
        assert_eq!(again.token_to_id("zebra"), None);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        assert!(store.resolve(Some(Path::new("/nonexistent/tok.json")), &corpus(), 50).is_err());
    }
}
