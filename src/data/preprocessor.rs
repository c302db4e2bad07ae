// ============================================================
// Layer 4 — Image Preprocessor
// ============================================================
// Turns an image file into the normalised CHW float buffer the
// vision tower expects.
//
// Steps (applied in order):
//   1. Decode with the `image` crate, convert to RGB8
//   2. Resize so the SHORTER side equals image_size (bilinear)
//   3. Crop a square of image_size:
//        Train → random position, then flip left/right with p=0.5
//        Test  → centre crop
//   4. Scale to [0, 1] and normalise per channel with the
//      CLIP mean/std
//   5. Emit channel-major (CHW) values: all R, then G, then B

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use rand::Rng;
use std::path::Path;

use crate::domain::pair::Split;

/// Per-channel RGB mean used by CLIP-family models.
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];

/// Per-channel RGB standard deviation used by CLIP-family models.
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    image_size: u32,
    split:      Split,
}

impl ImagePreprocessor {
    pub fn new(image_size: usize, split: Split) -> Self {
        Self {
            image_size: image_size as u32,
            split,
        }
    }

    pub fn image_size(&self) -> usize {
        self.image_size as usize
    }

    /// Number of floats produced per image (3 × size × size)
    pub fn output_len(&self) -> usize {
        3 * self.image_size() * self.image_size()
    }

    /// Decode and preprocess one image file.
    pub fn load<R: Rng + ?Sized>(&self, path: &Path, rng: &mut R) -> Result<Vec<f32>> {
        let img = image::open(path)
            .with_context(|| format!("Cannot decode image '{}'", path.display()))?;
        Ok(self.process(img, rng))
    }

    /// All-zero buffer: after normalisation this is the dataset mean colour.
    pub fn blank(&self) -> Vec<f32> {
        vec![0.0; self.output_len()]
    }

    pub fn process<R: Rng + ?Sized>(&self, img: DynamicImage, rng: &mut R) -> Vec<f32> {
        let size = self.image_size;
        let resized = resize_shorter_side(&img, size);
        let (w, h) = resized.dimensions();

        let cropped = match self.split {
            Split::Train => {
                let x = if w > size { rng.gen_range(0..=w - size) } else { 0 };
                let y = if h > size { rng.gen_range(0..=h - size) } else { 0 };
                let crop = resized.crop_imm(x, y, size, size);
                if rng.gen_bool(0.5) { crop.fliph() } else { crop }
            }
            Split::Test => {
                let x = (w - size) / 2;
                let y = (h - size) / 2;
                resized.crop_imm(x, y, size, size)
            }
        };

        to_normalised_chw(&cropped.to_rgb8())
    }
}

/// Scale so that min(w, h) == target, keeping the aspect ratio.
/// The longer side is rounded but never drops below `target`.
fn resize_shorter_side(img: &DynamicImage, target: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let (nw, nh) = if w <= h {
        let nh = ((h as f64) * (target as f64) / (w.max(1) as f64)).round() as u32;
        (target, nh.max(target))
    } else {
        let nw = ((w as f64) * (target as f64) / (h.max(1) as f64)).round() as u32;
        (nw.max(target), target)
    };
    img.resize_exact(nw, nh, FilterType::Triangle)
}

fn to_normalised_chw(rgb: &image::RgbImage) -> Vec<f32> {
    let (w, h) = rgb.dimensions();
    let plane  = (w * h) as usize;
    let mut out = vec![0.0f32; 3 * plane];

    for (i, pixel) in rgb.pixels().enumerate() {
        for c in 0..3 {
            out[c * plane + i] = (pixel[c] as f32 / 255.0 - CLIP_MEAN[c]) / CLIP_STD[c];
        }
    }
    out
}
