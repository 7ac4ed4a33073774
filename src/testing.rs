//! Deterministic stand-ins for the model capabilities, shared by unit tests

use image::{Rgb, RgbImage};
use ndarray::Array4;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::vision::{GenerationConfig, ObjectDetector, RawDetections, SequenceGenerator};

/// Black and white 8px checkerboard
pub fn checker_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// Detector that returns the same canned output on every call
pub struct StubDetector {
    output: RawDetections,
    calls: Arc<AtomicUsize>,
}

impl StubDetector {
    pub fn new(boxes: Vec<Vec<f32>>, confidences: Vec<f32>) -> Self {
        Self {
            output: RawDetections { boxes, confidences },
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Shared call counter
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl ObjectDetector for StubDetector {
    fn infer(&self, _image: &RgbImage) -> anyhow::Result<RawDetections> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

pub struct FailingDetector {
    message: String,
}

impl FailingDetector {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl ObjectDetector for FailingDetector {
    fn infer(&self, _image: &RgbImage) -> anyhow::Result<RawDetections> {
        Err(anyhow::anyhow!("{}", self.message))
    }
}

type SeenCall = Arc<Mutex<Option<(Vec<usize>, GenerationConfig)>>>;

/// Generator that returns canned hypotheses and records the last call
pub struct StubGenerator {
    hypotheses: Vec<String>,
    seen: SeenCall,
}

impl StubGenerator {
    pub fn new(hypotheses: Vec<&str>) -> Self {
        Self {
            hypotheses: hypotheses.into_iter().map(String::from).collect(),
            seen: Arc::new(Mutex::new(None)),
        }
    }

    /// Tensor shape and config of the last `generate` call
    pub fn seen(&self) -> SeenCall {
        Arc::clone(&self.seen)
    }
}

impl SequenceGenerator for StubGenerator {
    fn generate(&self, pixel_values: &Array4<f32>, config: &GenerationConfig) -> anyhow::Result<Vec<String>> {
        *self.seen.lock() = Some((pixel_values.shape().to_vec(), config.clone()));
        Ok(self.hypotheses.clone())
    }
}

pub struct FailingGenerator {
    message: String,
}

impl FailingGenerator {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl SequenceGenerator for FailingGenerator {
    fn generate(&self, _pixel_values: &Array4<f32>, _config: &GenerationConfig) -> anyhow::Result<Vec<String>> {
        Err(anyhow::anyhow!("{}", self.message))
    }
}
