//! MeterVision - utility meter reading extraction
//!
//! Finds the display on a meter photo, finds the reading inside the display and
//! recognizes its text. Models run through ONNX Runtime.

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod vision;

#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use error::{DetectionError, ExtractError, GeometryError, ModelLoadError, PipelineError, RecognitionError};
pub use pipeline::{MeterVisionPipeline, Prediction, StageTimings, NO_READING_FOUND};
