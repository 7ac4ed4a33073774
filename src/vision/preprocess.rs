//! Image preprocessing for ONNX models
//!
//! Handles image resizing, normalization, and tensor conversion for the YOLO
//! detectors and the TrOCR recognizer.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};

/// Preprocessing configuration for the recognition encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Square input size of the encoder (TrOCR uses 384)
    pub image_size: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            image_size: 384,
            // ViT image processor: (pixel / 255.0 - 0.5) / 0.5 maps [0, 255] -> [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Convert an RGB image to an HWC f32 array scaled to 0-1
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            rgb[[y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
        }
    }

    rgb
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let mut normalized = Array3::<f32>::zeros((h, w, 3));

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                normalized[[y, x, c]] = (image[[y, x, c]] - mean[c]) / std[c];
            }
        }
    }

    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Stretch-resize for a square detector input.
/// Returns the NCHW tensor (0-1 range) and the (x, y) factors mapping model
/// coordinates back to the source image.
pub fn preprocess_for_detection(image: &RgbImage, input_size: u32) -> (Array4<f32>, (f32, f32)) {
    let resized = imageops::resize(image, input_size, input_size, FilterType::Triangle);
    let scale_x = image.width() as f32 / input_size as f32;
    let scale_y = image.height() as f32 / input_size as f32;

    (hwc_to_nchw(&rgb_to_f32(&resized)), (scale_x, scale_y))
}

/// Full preprocessing pipeline for recognition: resize, rescale, normalize, NCHW
pub fn preprocess_for_recognition(image: &RgbImage, config: &PreprocessConfig) -> Array4<f32> {
    // 1. Bilinear resize to the square encoder input
    let resized = imageops::resize(image, config.image_size, config.image_size, FilterType::Triangle);

    // 2. Rescale to 0-1 and normalize
    let normalized = normalize(&rgb_to_f32(&resized), &config.mean, &config.std);

    // 3. Convert to NCHW tensor
    hwc_to_nchw(&normalized)
}
