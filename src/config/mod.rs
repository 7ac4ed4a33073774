//! Application Configuration
//!
//! Model locations, runtime and logging settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vision::preprocess::PreprocessConfig;
use crate::vision::recognition::default_special_tokens;
use crate::vision::{GenerationConfig, RoiSize};

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Model files and their parameters
    pub models: ModelsConfig,
    /// Inference runtime settings
    pub runtime: RuntimeConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// The three models the pipeline loads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Oriented detector locating the meter display
    pub display: DetectorConfig,
    /// Axis-aligned detector locating the reading inside the display
    pub reading: DetectorConfig,
    pub recognizer: RecognizerConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            display: DetectorConfig::new("models/display.onnx", RoiSize::new(640, 320)),
            reading: DetectorConfig::new("models/reading.onnx", RoiSize::new(384, 96)),
            recognizer: RecognizerConfig::default(),
        }
    }
}

/// YOLO detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// ONNX model file
    pub model_path: PathBuf,
    /// Size the detected region is resized to
    pub target_size: RoiSize,
    /// Expected SHA-256 of the model file (hex)
    pub sha256: Option<String>,
    /// Square model input size
    pub input_size: u32,
    /// Minimum candidate score (0.0 - 1.0)
    pub confidence_threshold: f32,
    /// IoU above which overlapping candidates are suppressed
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl DetectorConfig {
    pub fn new(model_path: impl Into<PathBuf>, target_size: RoiSize) -> Self {
        Self {
            model_path: model_path.into(),
            target_size,
            sha256: None,
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            max_detections: 300,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::new("model.onnx", RoiSize::new(640, 640))
    }
}

/// TrOCR recognizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Directory holding the encoder, decoder and tokenizer files
    pub model_dir: PathBuf,
    pub encoder_file: String,
    pub decoder_file: String,
    pub tokenizer_file: String,
    pub encoder_sha256: Option<String>,
    pub decoder_sha256: Option<String>,
    /// First token fed to the decoder
    pub decoder_start_token_id: u32,
    /// End-of-sequence token
    pub eos_token_id: u32,
    pub preprocess: PreprocessConfig,
    pub generation: GenerationConfig,
    /// Tokens stripped from the decoded text
    pub special_tokens: Vec<String>,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/trocr"),
            encoder_file: "encoder_model.onnx".to_string(),
            decoder_file: "decoder_model.onnx".to_string(),
            tokenizer_file: "tokenizer.json".to_string(),
            encoder_sha256: None,
            decoder_sha256: None,
            decoder_start_token_id: 2,
            eos_token_id: 2,
            preprocess: PreprocessConfig::default(),
            generation: GenerationConfig::default(),
            special_tokens: default_special_tokens(),
        }
    }
}

/// Inference runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Use CUDA when the provider is available
    pub use_gpu: bool,
    /// Intra-op threads per session
    pub intra_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            use_gpu: true,
            intra_threads: 4,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Include the module path in each line
    pub with_target: bool,
    /// Also append log lines to this file
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Check values that would only fail later, at load or inference time
    pub fn validate(&self) -> Result<()> {
        for (name, detector) in [("display", &self.models.display), ("reading", &self.models.reading)] {
            if detector.target_size.is_empty() {
                anyhow::bail!(
                    "models.{}.target_size must be positive, got {}x{}",
                    name,
                    detector.target_size.width,
                    detector.target_size.height
                );
            }
            if detector.input_size == 0 {
                anyhow::bail!("models.{}.input_size must be positive", name);
            }
            if !(0.0..=1.0).contains(&detector.confidence_threshold) {
                anyhow::bail!(
                    "models.{}.confidence_threshold must be within [0, 1], got {}",
                    name,
                    detector.confidence_threshold
                );
            }
            if !(0.0..=1.0).contains(&detector.iou_threshold) {
                anyhow::bail!(
                    "models.{}.iou_threshold must be within [0, 1], got {}",
                    name,
                    detector.iou_threshold
                );
            }
            if detector.max_detections == 0 {
                anyhow::bail!("models.{}.max_detections must be positive", name);
            }
        }

        let recognizer = &self.models.recognizer;
        if recognizer.preprocess.image_size == 0 {
            anyhow::bail!("models.recognizer.preprocess.image_size must be positive");
        }
        if recognizer.preprocess.std.iter().any(|s| *s == 0.0) {
            anyhow::bail!("models.recognizer.preprocess.std must not contain zero");
        }
        if !recognizer.generation.is_greedy() {
            anyhow::bail!(
                "only greedy decoding is supported (num_beams = 1, do_sample = false), got num_beams = {}, do_sample = {}",
                recognizer.generation.num_beams,
                recognizer.generation.do_sample
            );
        }
        if recognizer.generation.max_length < 2 {
            anyhow::bail!("models.recognizer.generation.max_length must be at least 2");
        }

        if self.runtime.intra_threads == 0 {
            anyhow::bail!("runtime.intra_threads must be positive");
        }

        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
