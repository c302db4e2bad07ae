// ============================================================
// Layer 5 — CLIP-style Backbone
// ============================================================
// Two towers mapping images and captions into one embedding
// space of size embed_dim.
//
// Vision:  conv patch embed → [CLS] + patches + positions
//          → ln_pre → blocks (prompt tokens inserted per block)
//          → ln_post([CLS]) → proj
// Text:    token + position embed → causal blocks → ln_final
//          → feature at EOT → text_projection
//
// Everything but the layer norms is frozen after init or load.

use anyhow::{bail, Result};
use burn::{
    module::Param,
    nn::{
        attention::{generate_autoregressive_mask, MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        conv::{Conv2d, Conv2dConfig},
        Embedding, EmbeddingConfig,
        Initializer,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
};

use crate::data::batcher::PositiveBatch;
use crate::ml::prompt::{PromptConfig, VisualPrompt};

// Defaults describe CLIP ViT-B/32.
// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct ClipConfig {
    #[config(default = 512)]
    pub embed_dim:      usize,
    #[config(default = 224)]
    pub image_size:     usize,
    #[config(default = 32)]
    pub patch_size:     usize,
    #[config(default = 768)]
    pub vision_width:   usize,
    #[config(default = 12)]
    pub vision_layers:  usize,
    #[config(default = 12)]
    pub vision_heads:   usize,
    #[config(default = 77)]
    pub context_length: usize,
    #[config(default = 49408)]
    pub vocab_size:     usize,
    #[config(default = 512)]
    pub text_width:     usize,
    #[config(default = 12)]
    pub text_layers:    usize,
    #[config(default = 8)]
    pub text_heads:     usize,
}

/// Everything needed to rebuild a model before loading weights into it.
#[derive(Config, Debug)]
pub struct ModelConfig {
    pub clip:   ClipConfig,
    pub prompt: PromptConfig,
}

impl ClipConfig {
    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 || self.image_size % self.patch_size != 0 {
            bail!(
                "image_size ({}) must be a multiple of patch_size ({})",
                self.image_size, self.patch_size
            );
        }
        if self.vision_heads == 0 || self.vision_width % self.vision_heads != 0 {
            bail!(
                "vision_width ({}) must be divisible by vision_heads ({})",
                self.vision_width, self.vision_heads
            );
        }
        if self.text_heads == 0 || self.text_width % self.text_heads != 0 {
            bail!(
                "text_width ({}) must be divisible by text_heads ({})",
                self.text_width, self.text_heads
            );
        }
        if self.context_length < 2 {
            bail!("context_length must be at least 2");
        }
        Ok(())
    }

    pub fn num_patches(&self) -> usize {
        let grid = self.image_size / self.patch_size;
        grid * grid
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ClipBackbone<B> {
        ClipBackbone {
            visual: self.init_vision(device),
            text:   self.init_text(device),
        }
    }

    fn init_vision<B: Backend>(&self, device: &B::Device) -> VisionTower<B> {
        let width = self.vision_width;
        let normal = Initializer::Normal { mean: 0.0, std: 0.02 };
        VisionTower {
            conv1: Conv2dConfig::new([3, width], [self.patch_size, self.patch_size])
                .with_stride([self.patch_size, self.patch_size])
                .with_bias(false)
                .init(device),
            class_embedding:      normal.init([width], device),
            positional_embedding: normal.init([self.num_patches() + 1, width], device),
            ln_pre:  LayerNormConfig::new(width).init(device),
            blocks:  (0..self.vision_layers)
                .map(|_| block(width, self.vision_heads, device))
                .collect(),
            ln_post: LayerNormConfig::new(width).init(device),
            proj:    LinearConfig::new(width, self.embed_dim).with_bias(false).init(device),
        }
    }

    fn init_text<B: Backend>(&self, device: &B::Device) -> TextTower<B> {
        let width = self.text_width;
        TextTower {
            token_embedding:      EmbeddingConfig::new(self.vocab_size, width).init(device),
            positional_embedding: Initializer::Normal { mean: 0.0, std: 0.01 }
                .init([self.context_length, width], device),
            blocks: (0..self.text_layers)
                .map(|_| block(width, self.text_heads, device))
                .collect(),
            ln_final:        LayerNormConfig::new(width).init(device),
            text_projection: LinearConfig::new(width, self.embed_dim).with_bias(false).init(device),
        }
    }
}

fn block<B: Backend>(width: usize, heads: usize, device: &B::Device) -> ResidualBlock<B> {
    ResidualBlock {
        ln_1:     LayerNormConfig::new(width).init(device),
        attn:     MultiHeadAttentionConfig::new(width, heads).with_dropout(0.0).init(device),
        ln_2:     LayerNormConfig::new(width).init(device),
        mlp_fc:   LinearConfig::new(width, width * 4).init(device),
        mlp_proj: LinearConfig::new(width * 4, width).init(device),
    }
}

// ─── Residual attention block (pre-LN) ────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub ln_1:     LayerNorm<B>,
    pub attn:     MultiHeadAttention<B>,
    pub ln_2:     LayerNorm<B>,
    pub mlp_fc:   Linear<B>,
    pub mlp_proj: Linear<B>,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>, mask: Option<Tensor<B, 3, Bool>>) -> Tensor<B, 3> {
        let mut input = MhaInput::self_attn(self.ln_1.forward(x.clone()));
        if let Some(mask) = mask {
            input = input.mask_attn(mask);
        }
        let x = x + self.attn.forward(input).context;

        let h = self.mlp_fc.forward(self.ln_2.forward(x.clone()));
        x + self.mlp_proj.forward(burn::tensor::activation::gelu(h))
    }

    /// Only the layer norms keep gradients.
    pub fn freeze(self) -> Self {
        Self {
            attn:     self.attn.no_grad(),
            mlp_fc:   self.mlp_fc.no_grad(),
            mlp_proj: self.mlp_proj.no_grad(),
            ..self
        }
    }
}

// ─── Vision tower ─────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct VisionTower<B: Backend> {
    pub conv1:                Conv2d<B>,
    pub class_embedding:      Param<Tensor<B, 1>>,
    pub positional_embedding: Param<Tensor<B, 2>>,
    pub ln_pre:               LayerNorm<B>,
    pub blocks:               Vec<ResidualBlock<B>>,
    pub ln_post:              LayerNorm<B>,
    pub proj:                 Linear<B>,
}

impl<B: Backend> VisionTower<B> {
    /// images: [batch, 3, S, S] → [batch, embed_dim]
    pub fn forward(&self, images: Tensor<B, 4>, prompt: &VisualPrompt<B>) -> Tensor<B, 2> {
        let images = prompt.apply_to_pixels(images);

        let x = self.conv1.forward(images); // [b, w, g, g]
        let [batch, width, gh, gw] = x.dims();
        let x = x.reshape([batch, width, gh * gw]).swap_dims(1, 2); // [b, p, w]

        let cls = self
            .class_embedding
            .val()
            .reshape([1, 1, width])
            .expand([batch, 1, width]);
        let x = Tensor::cat(vec![cls, x], 1);
        let seq = gh * gw + 1;
        let x = x + self.positional_embedding.val().unsqueeze::<3>().expand([batch, seq, width]);

        let mut x = self.ln_pre.forward(x);
        for (layer, block) in self.blocks.iter().enumerate() {
            x = prompt.insert_tokens(x, layer);
            x = block.forward(x, None);
        }

        let [batch, _, width] = x.dims();
        let cls = x.slice([0..batch, 0..1, 0..width]).reshape([batch, width]);
        self.proj.forward(self.ln_post.forward(cls))
    }

    fn freeze(self) -> Self {
        Self {
            conv1:                self.conv1.no_grad(),
            class_embedding:      self.class_embedding.no_grad(),
            positional_embedding: self.positional_embedding.no_grad(),
            blocks:               self.blocks.into_iter().map(ResidualBlock::freeze).collect(),
            proj:                 self.proj.no_grad(),
            ..self
        }
    }
}

// ─── Text tower ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct TextTower<B: Backend> {
    pub token_embedding:      Embedding<B>,
    pub positional_embedding: Param<Tensor<B, 2>>,
    pub blocks:               Vec<ResidualBlock<B>>,
    pub ln_final:             LayerNorm<B>,
    pub text_projection:      Linear<B>,
}

impl<B: Backend> TextTower<B> {
    /// tokens: [batch, L], eot_mask: [batch, L] one-hot → [batch, embed_dim]
    pub fn forward(&self, tokens: Tensor<B, 2, Int>, eot_mask: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, seq_len] = tokens.dims();
        let device = tokens.device();

        let x = self.token_embedding.forward(tokens); // [b, L, w]
        let width = x.dims()[2];
        let pos = self
            .positional_embedding
            .val()
            .slice([0..seq_len, 0..width])
            .unsqueeze::<3>()
            .expand([batch, seq_len, width]);
        let mut x = x + pos;

        let causal = generate_autoregressive_mask::<B>(batch, seq_len, &device);
        for block in &self.blocks {
            x = block.forward(x, Some(causal.clone()));
        }
        let x = self.ln_final.forward(x);

        let pooled = (x * eot_mask.unsqueeze_dim::<3>(2).expand([batch, seq_len, width]))
            .sum_dim(1)
            .reshape([batch, width]);
        self.text_projection.forward(pooled)
    }

    fn freeze(self) -> Self {
        Self {
            token_embedding:      self.token_embedding.no_grad(),
            positional_embedding: self.positional_embedding.no_grad(),
            blocks:               self.blocks.into_iter().map(ResidualBlock::freeze).collect(),
            text_projection:      self.text_projection.no_grad(),
            ..self
        }
    }
}

// ─── Backbone ─────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ClipBackbone<B: Backend> {
    pub visual: VisionTower<B>,
    pub text:   TextTower<B>,
}

impl<B: Backend> ClipBackbone<B> {
    /// Disable gradients on every parameter except the layer norms.
    pub fn freeze(self) -> Self {
        Self {
            visual: self.visual.freeze(),
            text:   self.text.freeze(),
        }
    }
}

// ─── Prompted model ───────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct PromptedClip<B: Backend> {
    pub backbone: ClipBackbone<B>,
    pub prompt:   VisualPrompt<B>,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        self.clip.validate()?;
        self.prompt.validate(&self.clip)
    }

    /// Build a fresh model with a frozen backbone.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<PromptedClip<B>> {
        self.validate()?;
        Ok(PromptedClip {
            backbone: self.clip.init(device).freeze(),
            prompt:   self.prompt.init(&self.clip, device)?,
        })
    }
}

impl<B: Backend> PromptedClip<B> {
    pub fn encode_image(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.backbone.visual.forward(images, &self.prompt)
    }

    pub fn encode_text(&self, tokens: Tensor<B, 2, Int>, eot_mask: Tensor<B, 2>) -> Tensor<B, 2> {
        self.backbone.text.forward(tokens, eot_mask)
    }

    /// Text positives go through the text tower, image positives
    /// through the (prompted) vision tower.
    pub fn encode_positive(&self, positive: PositiveBatch<B>) -> Tensor<B, 2> {
        match positive {
            PositiveBatch::Text { tokens, eot_mask } => self.encode_text(tokens, eot_mask),
            PositiveBatch::Image(images) => self.encode_image(images),
        }
    }

    /// Re-apply the backbone freeze, e.g. after loading a record.
    pub fn refreeze(self) -> Self {
        Self {
            backbone: self.backbone.freeze(),
            prompt:   self.prompt,
        }
    }
}
