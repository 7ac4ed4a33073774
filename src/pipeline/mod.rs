//! Meter reading pipeline
//!
//! Chains the display detector, the reading detector and the text recognizer:
//! photo -> display ROI -> reading ROI -> text.

use image::RgbImage;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::config::{ModelsConfig, RuntimeConfig};
use crate::error::{ModelLoadError, PipelineError};
use crate::vision::{BoxShape, RegionDetector, TextRecognizer};

/// Reading reported when the recognizer decodes nothing
pub const NO_READING_FOUND: &str = "No Reading Found";

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Display,
    Reading,
    Recognition,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Display => write!(f, "display"),
            Stage::Reading => write!(f, "reading"),
            Stage::Recognition => write!(f, "recognition"),
        }
    }
}

/// Wall-clock time per stage in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub display_ms: f64,
    pub reading_ms: f64,
    pub recognition_ms: f64,
}

impl StageTimings {
    pub fn total_ms(&self) -> f64 {
        self.display_ms + self.reading_ms + self.recognition_ms
    }

    fn record(&mut self, stage: Stage, ms: f64) {
        match stage {
            Stage::Display => self.display_ms = ms,
            Stage::Reading => self.reading_ms = ms,
            Stage::Recognition => self.recognition_ms = ms,
        }
    }
}

/// Result of one pipeline invocation
#[derive(Debug, Clone)]
pub struct Prediction {
    pub display_roi: RgbImage,
    pub reading_roi: RgbImage,
    /// Recognized text, or `NO_READING_FOUND`
    pub reading_text: String,
    pub timings: StageTimings,
}

/// End-to-end meter reader.
///
/// Holds no per-request state, so one instance can be shared across threads.
#[derive(Debug)]
pub struct MeterVisionPipeline {
    display_detector: RegionDetector,
    reading_detector: RegionDetector,
    recognizer: TextRecognizer,
}

impl MeterVisionPipeline {
    pub fn new(display_detector: RegionDetector, reading_detector: RegionDetector, recognizer: TextRecognizer) -> Self {
        Self {
            display_detector,
            reading_detector,
            recognizer,
        }
    }

    /// Load all three models
    pub fn load(models: &ModelsConfig, runtime: &RuntimeConfig) -> Result<Self, ModelLoadError> {
        let start = Instant::now();

        let display_detector = RegionDetector::load("display", BoxShape::Oriented, &models.display, runtime)?;
        let reading_detector = RegionDetector::load("reading", BoxShape::AxisAligned, &models.reading, runtime)?;
        let recognizer = TextRecognizer::load(&models.recognizer, runtime)?;

        info!("Pipeline ready in {:.3}s", start.elapsed().as_secs_f32());
        Ok(Self::new(display_detector, reading_detector, recognizer))
    }

    /// Read the meter in `image`
    pub fn predict(&self, image: &RgbImage) -> Result<Prediction, PipelineError> {
        let span = info_span!("predict", request_id = %Uuid::new_v4());
        let _enter = span.enter();

        info!("Predicting on {}x{} image", image.width(), image.height());
        let mut timings = StageTimings::default();

        let display_roi = timed(Stage::Display, &mut timings, || {
            self.display_detector
                .detect_and_extract(image, self.display_detector.target_size())
        })?;

        let reading_roi = timed(Stage::Reading, &mut timings, || {
            self.reading_detector
                .detect_and_extract(&display_roi, self.reading_detector.target_size())
        })?;

        let raw = timed(Stage::Recognition, &mut timings, || self.recognizer.recognize(&reading_roi))?;

        let reading_text = if raw.is_empty() {
            NO_READING_FOUND.to_string()
        } else {
            raw
        };

        info!(
            "Reading {:?} (total {:.1} ms)",
            reading_text,
            timings.total_ms()
        );

        Ok(Prediction {
            display_roi,
            reading_roi,
            reading_text,
            timings,
        })
    }
}

/// Run one stage and record its duration
fn timed<T, E>(stage: Stage, timings: &mut StageTimings, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
    let start = Instant::now();
    let result = f();
    let ms = start.elapsed().as_secs_f64() * 1000.0;

    timings.record(stage, ms);
    debug!("{} stage finished in {:.1} ms", stage, ms);
    result
}
