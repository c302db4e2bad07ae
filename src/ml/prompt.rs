// ============================================================
// Layer 5 — Visual Prompt
// ============================================================
// The only parameters trained besides the backbone layer norms.
//
// ShallowPrompt:
//   a [n_prompts, prompt_dim] parameter reshaped to the input
//   image shape [3, S, S] and added to every image before patch
//   embedding. The defaults (3 × 50176 = 3 × 224²) give one
//   224×224 plane per colour channel.
//
// DeepPrompt:
//   n_prompts learned tokens per vision block. Before block 0 they
//   are inserted right after the class token; before every later
//   block the previous prompt slots are overwritten with that
//   block's own tokens, so the sequence length stays fixed.
//
//   block 0 input: [CLS] [P0 ...] [patches ...]
//   block i input: [CLS] [Pi ...] [patches ...]

use anyhow::{bail, Result};
use burn::{
    module::Param,
    nn::Initializer,
    prelude::*,
};

use crate::domain::pair::PromptKind;
use crate::ml::model::ClipConfig;

#[derive(Config, Debug)]
pub struct PromptConfig {
    pub kind:       PromptKind,
    pub n_prompts:  usize,
    pub prompt_dim: usize,
}

impl PromptConfig {
    pub fn validate(&self, clip: &ClipConfig) -> Result<()> {
        if self.n_prompts == 0 {
            bail!("n_prompts must be at least 1");
        }
        match self.kind {
            PromptKind::Shallow => {
                let pixels = 3 * clip.image_size * clip.image_size;
                if self.n_prompts * self.prompt_dim != pixels {
                    bail!(
                        "ShallowPrompt needs n_prompts × prompt_dim == 3 × image_size² \
                         ({} × {} != {})",
                        self.n_prompts, self.prompt_dim, pixels
                    );
                }
            }
            PromptKind::Deep => {
                if self.prompt_dim != clip.vision_width {
                    bail!(
                        "DeepPrompt tokens must match vision_width (prompt_dim {} != {})",
                        self.prompt_dim, clip.vision_width
                    );
                }
            }
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, clip: &ClipConfig, device: &B::Device) -> Result<VisualPrompt<B>> {
        self.validate(clip)?;
        let normal = Initializer::Normal { mean: 0.0, std: 0.02 };
        let (pixels, tokens) = match self.kind {
            PromptKind::Shallow => (Some(normal.init([self.n_prompts, self.prompt_dim], device)), None),
            PromptKind::Deep => (
                None,
                Some(normal.init([clip.vision_layers, self.n_prompts, self.prompt_dim], device)),
            ),
        };
        Ok(VisualPrompt { pixels, tokens, n_prompts: self.n_prompts })
    }
}

#[derive(Module, Debug)]
pub struct VisualPrompt<B: Backend> {
    /// ShallowPrompt: [n_prompts, prompt_dim]
    pub pixels:    Option<Param<Tensor<B, 2>>>,
    /// DeepPrompt: [layers, n_prompts, width]
    pub tokens:    Option<Param<Tensor<B, 3>>>,
    pub n_prompts: usize,
}

impl<B: Backend> VisualPrompt<B> {
    pub fn apply_to_pixels(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        match &self.pixels {
            Some(prompt) => {
                let [batch, channels, h, w] = images.dims();
                images + prompt.val().reshape([1, channels, h, w]).expand([batch, channels, h, w])
            }
            None => images,
        }
    }

    /// x: [batch, seq, width] entering vision block `layer`.
    pub fn insert_tokens(&self, x: Tensor<B, 3>, layer: usize) -> Tensor<B, 3> {
        let Some(tokens) = &self.tokens else {
            return x;
        };
        let [batch, seq, width] = x.dims();
        let p = self.n_prompts;

        let prompt = tokens
            .val()
            .slice([layer..layer + 1, 0..p, 0..width])
            .reshape([1, p, width])
            .expand([batch, p, width]);
        let cls = x.clone().slice([0..batch, 0..1, 0..width]);
        // block 0 has no prompt slots yet
        let rest_from = if layer == 0 { 1 } else { 1 + p };
        let rest = x.slice([0..batch, rest_from..seq, 0..width]);

        Tensor::cat(vec![cls, prompt, rest], 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn clip() -> ClipConfig {
        ClipConfig::new()
            .with_image_size(8)
            .with_patch_size(4)
            .with_vision_width(8)
            .with_vision_layers(3)
            .with_vision_heads(2)
    }

    #[test]
    fn test_default_shallow_prompt_fits_224_images() {
        let cfg = PromptConfig::new(PromptKind::Shallow, 3, 50176);
        assert!(cfg.validate(&ClipConfig::new()).is_ok());
    }

    #[test]
    fn test_shallow_shape_mismatch_rejected() {
        let cfg = PromptConfig::new(PromptKind::Shallow, 3, 10);
        assert!(cfg.validate(&clip()).is_err());
    }

    #[test]
    fn test_deep_needs_vision_width() {
        assert!(PromptConfig::new(PromptKind::Deep, 4, 8).validate(&clip()).is_ok());
        assert!(PromptConfig::new(PromptKind::Deep, 4, 50176).validate(&clip()).is_err());
        assert!(PromptConfig::new(PromptKind::Deep, 0, 8).validate(&clip()).is_err());
    }

    #[test]
    fn test_shallow_adds_to_pixels_only() {
        let device = Default::default();
        let prompt = PromptConfig::new(PromptKind::Shallow, 3, 64).init::<TB>(&clip(), &device).unwrap();
        assert!(prompt.tokens.is_none());

        let images = Tensor::<TB, 4>::zeros([2, 3, 8, 8], &device);
        let out    = prompt.apply_to_pixels(images);
        let expected: Vec<f32> = prompt.pixels.as_ref().unwrap().val().into_data().to_vec().unwrap();
        let got: Vec<f32> = out.into_data().to_vec().unwrap();
        assert_eq!(&got[..192], expected.as_slice());
        assert_eq!(&got[192..], expected.as_slice());

        let x = Tensor::<TB, 3>::ones([2, 5, 8], &device);
        assert_eq!(prompt.insert_tokens(x, 0).dims(), [2, 5, 8]);
    }

    #[test]
    fn test_deep_keeps_sequence_length_after_first_block() {
        let device = Default::default();
        let prompt = PromptConfig::new(PromptKind::Deep, 2, 8).init::<TB>(&clip(), &device).unwrap();

        let x  = Tensor::<TB, 3>::ones([2, 5, 8], &device);
        let x0 = prompt.insert_tokens(x, 0);
        assert_eq!(x0.dims(), [2, 7, 8]);
        let x1 = prompt.insert_tokens(x0, 1);
        assert_eq!(x1.dims(), [2, 7, 8]);

        // slots 1..3 now hold layer-1 tokens, patches are untouched
        let layer1: Vec<f32> = prompt
            .tokens
            .as_ref()
            .unwrap()
            .val()
            .slice([1..2, 0..2, 0..8])
            .into_data()
            .to_vec()
            .unwrap();
        let slots: Vec<f32> = x1.clone().slice([0..1, 1..3, 0..8]).into_data().to_vec().unwrap();
        assert_eq!(slots, layer1);
        let patches: Vec<f32> = x1.slice([0..1, 3..7, 0..8]).into_data().to_vec().unwrap();
        assert!(patches.iter().all(|&v| v == 1.0));
    }
}
