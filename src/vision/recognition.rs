//! Text recognition
//!
//! Turns a reading ROI into text through a sequence generation capability.
//! Decoding is greedy by default: one hypothesis, bounded length, stop at end token.

use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use super::preprocess::{preprocess_for_recognition, PreprocessConfig};
use super::trocr::OnnxTrOcrGenerator;
use crate::config::{RecognizerConfig, RuntimeConfig};
use crate::error::{ModelLoadError, RecognitionError};

/// Decoding configuration passed to the generation capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum number of tokens, including the decoder start token
    pub max_length: usize,
    /// Beam width (1 = greedy)
    pub num_beams: usize,
    /// Sample instead of taking the argmax
    pub do_sample: bool,
    /// Stop as soon as the end token is produced
    pub early_stopping: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: 128,
            num_beams: 1,
            do_sample: false,
            early_stopping: true,
        }
    }
}

impl GenerationConfig {
    /// Whether this configuration asks for plain greedy decoding
    pub fn is_greedy(&self) -> bool {
        self.num_beams == 1 && !self.do_sample
    }
}

/// Sequence generation capability: image tensor in, decoded hypotheses out
pub trait SequenceGenerator: Send + Sync {
    /// Generate text hypotheses for a `[1, 3, H, W]` pixel tensor, best first
    fn generate(&self, pixel_values: &Array4<f32>, config: &GenerationConfig) -> anyhow::Result<Vec<String>>;
}

/// Recognizer settings independent of the backend
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizerSettings {
    pub preprocess: PreprocessConfig,
    pub generation: GenerationConfig,
    /// Tokens removed from the decoded text
    pub special_tokens: Vec<String>,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            preprocess: PreprocessConfig::default(),
            generation: GenerationConfig::default(),
            special_tokens: default_special_tokens(),
        }
    }
}

/// Special tokens of RoBERTa-style tokenizers used by TrOCR
pub fn default_special_tokens() -> Vec<String> {
    ["<s>", "</s>", "<pad>", "<unk>", "<mask>"]
        .iter()
        .map(|t| t.to_string())
        .collect()
}

/// Reading recognizer
pub struct TextRecognizer {
    generator: Box<dyn SequenceGenerator>,
    settings: RecognizerSettings,
}

impl std::fmt::Debug for TextRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextRecognizer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TextRecognizer {
    /// Create a recognizer around an already loaded capability
    pub fn new(generator: Box<dyn SequenceGenerator>, settings: RecognizerSettings) -> Self {
        Self { generator, settings }
    }

    /// Load the TrOCR ONNX encoder/decoder and tokenizer
    pub fn load(config: &RecognizerConfig, runtime: &RuntimeConfig) -> Result<Self, ModelLoadError> {
        let start = Instant::now();
        info!("Loading recognizer from {:?}", config.model_dir);

        let generator = OnnxTrOcrGenerator::load(config, runtime)?;

        info!("Recognizer loaded in {:.3}s", start.elapsed().as_secs_f32());
        Ok(Self::new(
            Box::new(generator),
            RecognizerSettings {
                preprocess: config.preprocess.clone(),
                generation: config.generation.clone(),
                special_tokens: config.special_tokens.clone(),
            },
        ))
    }

    pub fn settings(&self) -> &RecognizerSettings {
        &self.settings
    }

    /// Recognize the text in an ROI. The result may be empty.
    pub fn recognize(&self, image: &RgbImage) -> Result<String, RecognitionError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(RecognitionError::Preprocess {
                reason: format!("image is {}x{}", image.width(), image.height()),
            });
        }

        let start = Instant::now();
        let pixel_values = preprocess_for_recognition(image, &self.settings.preprocess);

        let hypotheses = self
            .generator
            .generate(&pixel_values, &self.settings.generation)
            .map_err(RecognitionError::Generation)?;

        let first = hypotheses.into_iter().next().ok_or(RecognitionError::NoHypothesis)?;
        let text = strip_special_tokens(&first, &self.settings.special_tokens);

        debug!("Recognized {:?} in {:?}", text, start.elapsed());
        Ok(text)
    }
}

/// Remove special tokens and surrounding whitespace from decoded text
fn strip_special_tokens(text: &str, special_tokens: &[String]) -> String {
    let mut cleaned = text.to_string();
    for token in special_tokens.iter().filter(|t| !t.is_empty()) {
        cleaned = cleaned.replace(token.as_str(), "");
    }
    cleaned.trim().to_string()
}
