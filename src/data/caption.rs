// ============================================================
// Layer 4 — Caption Encoder
// ============================================================
// Turns a caption into a fixed-length token row for the text
// tower:
//
//   [SOT] t1 t2 ... tk [EOT] [PAD] ... [PAD]     (context_length)
//
// Long captions are truncated so that EOT is always the last
// real token inside the window; the text tower pools its
// output at the EOT position.

use anyhow::{anyhow, bail, Result};
use tokenizers::Tokenizer;

/// Token id used for padding. Position embeddings still apply,
/// but the causal mask keeps padding from reaching the EOT slot.
pub const PAD_ID: u32 = 0;

const SOT_CANDIDATES: [&str; 3] = ["<|startoftext|>", "[SOT]", "[CLS]"];
const EOT_CANDIDATES: [&str; 3] = ["<|endoftext|>", "[EOT]", "[SEP]"];

/// One encoded caption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCaption {
    /// Exactly context_length ids
    pub ids: Vec<u32>,
    /// Index of the EOT token in `ids`
    pub eot: usize,
}

#[derive(Clone)]
pub struct CaptionEncoder {
    tokenizer:      Tokenizer,
    sot_id:         u32,
    eot_id:         u32,
    context_length: usize,
}

impl CaptionEncoder {
    /// Wrap a tokenizer. The start/end markers are looked up by the
    /// names CLIP's BPE vocabulary and the built word-level vocabulary use.
    pub fn new(tokenizer: Tokenizer, context_length: usize) -> Result<Self> {
        if context_length < 2 {
            bail!("context_length must leave room for start and end tokens (got {context_length})");
        }
        let lookup = |names: &[&str]| names.iter().find_map(|n| tokenizer.token_to_id(n));
        let sot_id = lookup(&SOT_CANDIDATES)
            .ok_or_else(|| anyhow!("tokenizer has no start token (tried {SOT_CANDIDATES:?})"))?;
        let eot_id = lookup(&EOT_CANDIDATES)
            .ok_or_else(|| anyhow!("tokenizer has no end token (tried {EOT_CANDIDATES:?})"))?;

        Ok(Self { tokenizer, sot_id, eot_id, context_length })
    }

    pub fn context_length(&self) -> usize {
        self.context_length
    }

    /// Largest id the tokenizer can emit plus one
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn encode(&self, caption: &str) -> Result<EncodedCaption> {
        let enc = self
            .tokenizer
            .encode(caption, false)
            .map_err(|e| anyhow!("Tokenisation error: {e}"))?;
        Ok(self.frame(enc.get_ids()))
    }

    /// Add SOT/EOT, truncate and pad a raw id sequence.
    pub fn frame(&self, body: &[u32]) -> EncodedCaption {
        let room = self.context_length - 2;
        let body = &body[..body.len().min(room)];

        let mut ids = Vec::with_capacity(self.context_length);
        ids.push(self.sot_id);
        ids.extend_from_slice(body);
        let eot = ids.len();
        ids.push(self.eot_id);
        ids.resize(self.context_length, PAD_ID);

        EncodedCaption { ids, eot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tokenizer_store::word_level_tokenizer;

    fn encoder(ctx: usize) -> CaptionEncoder {
        let captions = vec!["a red dog".to_string(), "a blue cat".to_string()];
        let tok = word_level_tokenizer(&captions, 64).unwrap();
        CaptionEncoder::new(tok, ctx).unwrap()
    }

    #[test]
    fn test_short_caption_is_padded() {
        let e   = encoder(8);
        let out = e.encode("a red dog").unwrap();
        assert_eq!(out.ids.len(), 8);
        assert_eq!(out.ids[0], e.sot_id);
        assert_eq!(out.eot, 4);
        assert_eq!(out.ids[4], e.eot_id);
        assert!(out.ids[5..].iter().all(|&id| id == PAD_ID));
    }

    #[test]
    fn test_long_caption_keeps_eot_in_window() {
        let e   = encoder(4);
        let out = e.encode("a red dog a blue cat").unwrap();
        assert_eq!(out.ids.len(), 4);
        assert_eq!(out.eot, 3);
        assert_eq!(out.ids[3], e.eot_id);
    }

    #[test]
    fn test_empty_caption_is_sot_eot() {
        let e   = encoder(5);
        let out = e.frame(&[]);
        assert_eq!(out.eot, 1);
        assert_eq!(&out.ids[..2], &[e.sot_id, e.eot_id]);
    }

    #[test]
    fn test_tiny_context_is_rejected() {
        let captions = vec!["x".to_string()];
        let tok = word_level_tokenizer(&captions, 16).unwrap();
        assert!(CaptionEncoder::new(tok, 1).is_err());
    }
}
