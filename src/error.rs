//! Error taxonomy for the meter reading pipeline
//!
//! Each operation declares the error kinds it can produce. Causes are kept as
//! typed sources and wrapping layers are transparent, so a caller always sees
//! the error raised closest to its origin.

use std::path::PathBuf;
use thiserror::Error;

use crate::vision::Rect;

/// Failure while loading a model capability. Always fatal, never retried.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("failed to read model file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checksum mismatch for {path:?}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("ONNX Runtime rejected model {path:?}")]
    Runtime {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },
    #[error("failed to load tokenizer {path:?}")]
    Tokenizer {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("model {path:?} is not usable: {reason}")]
    InvalidModel { path: PathBuf, reason: String },
}

/// The selected region cannot be turned into an ROI.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("target size {width}x{height} has a zero dimension")]
    EmptyTarget { width: u32, height: u32 },
    #[error("region {rect:?} has no area inside the {width}x{height} image")]
    Degenerate { rect: Rect, width: u32, height: u32 },
}

/// Failure of a detection call.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("detection inference failed")]
    Inference(#[source] anyhow::Error),
    #[error("malformed detection output: {reason}")]
    MalformedOutput { reason: String },
}

/// Failure of the combined detect + extract step.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Failure inside the text recognizer.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("failed to prepare image for recognition: {reason}")]
    Preprocess { reason: String },
    #[error("text generation failed")]
    Generation(#[source] anyhow::Error),
    #[error("text generation returned no hypotheses")]
    NoHypothesis,
}

/// Failure of one pipeline invocation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
}

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Detection(e) => PipelineError::Detection(e),
            ExtractError::Geometry(e) => PipelineError::Geometry(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_extract_error_keeps_variant_through_pipeline() {
        let geometry = GeometryError::EmptyTarget { width: 0, height: 10 };
        let err: PipelineError = ExtractError::from(geometry.clone()).into();
        match err {
            PipelineError::Geometry(inner) => assert_eq!(inner, geometry),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_transparent_message_is_unchanged() {
        let err: PipelineError = RecognitionError::NoHypothesis.into();
        assert_eq!(err.to_string(), RecognitionError::NoHypothesis.to_string());
    }

    #[test]
    fn test_generation_error_preserves_cause() {
        let err = RecognitionError::Generation(anyhow::anyhow!("decoder exploded"));
        let source = err.source().expect("cause should be kept");
        assert_eq!(source.to_string(), "decoder exploded");
    }
}
