//! TrOCR backend
//!
//! Vision encoder + text decoder exported to ONNX (Optimum layout), with a
//! HuggingFace tokenizer for turning token ids back into text.

use anyhow::{Context, Result};
use ndarray::{Array2, Array4, ArrayD, Axis, Ix3};
use ort::value::Value;
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use super::models::OnnxSession;
use super::recognition::{GenerationConfig, SequenceGenerator};
use crate::config::{RecognizerConfig, RuntimeConfig};
use crate::error::ModelLoadError;

const PIXEL_VALUES: &str = "pixel_values";
const INPUT_IDS: &str = "input_ids";
const ENCODER_HIDDEN_STATES: &str = "encoder_hidden_states";

/// ONNX Runtime TrOCR generator
pub struct OnnxTrOcrGenerator {
    encoder: OnnxSession,
    decoder: OnnxSession,
    tokenizer: Tokenizer,
    decoder_start_token_id: u32,
    eos_token_id: u32,
}

impl std::fmt::Debug for OnnxTrOcrGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxTrOcrGenerator")
            .field("encoder", &self.encoder)
            .field("decoder", &self.decoder)
            .field("decoder_start_token_id", &self.decoder_start_token_id)
            .field("eos_token_id", &self.eos_token_id)
            .finish_non_exhaustive()
    }
}

impl OnnxTrOcrGenerator {
    /// Load encoder, decoder and tokenizer from `config.model_dir`
    pub fn load(config: &RecognizerConfig, runtime: &RuntimeConfig) -> Result<Self, ModelLoadError> {
        let encoder_path = config.model_dir.join(&config.encoder_file);
        let decoder_path = config.model_dir.join(&config.decoder_file);
        let tokenizer_path = config.model_dir.join(&config.tokenizer_file);

        let encoder = OnnxSession::load(&encoder_path, config.encoder_sha256.as_deref(), runtime)?;
        encoder.require_input(PIXEL_VALUES)?;

        let decoder = OnnxSession::load(&decoder_path, config.decoder_sha256.as_deref(), runtime)?;
        decoder.require_input(INPUT_IDS)?;
        decoder.require_input(ENCODER_HIDDEN_STATES)?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|source| ModelLoadError::Tokenizer {
            path: tokenizer_path.clone(),
            source,
        })?;
        info!(
            "Loaded tokenizer with {} tokens",
            tokenizer.get_vocab_size(true)
        );

        Ok(Self {
            encoder,
            decoder,
            tokenizer,
            decoder_start_token_id: config.decoder_start_token_id,
            eos_token_id: config.eos_token_id,
        })
    }

    /// Run the encoder once, returning `last_hidden_state` `[1, seq, hidden]`
    fn encode(&self, pixel_values: &Array4<f32>) -> Result<ArrayD<f32>> {
        let input = Value::from_array(pixel_values.clone()).context("Failed to create pixel tensor")?;

        let mut session = self.encoder.lock();
        let outputs = session
            .run(ort::inputs![PIXEL_VALUES => input])
            .context("Encoder inference failed")?;

        let hidden = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract encoder output")?;
        debug!("Encoder output shape: {:?}", hidden.shape());

        Ok(hidden.to_owned())
    }

    /// One decoder pass; returns the logits for the last position
    fn next_logits(&self, hidden: &ArrayD<f32>, ids: &[i64]) -> Result<Vec<f32>> {
        let input_ids = Array2::from_shape_vec((1, ids.len()), ids.to_vec())?;
        let input_ids = Value::from_array(input_ids).context("Failed to create input ids tensor")?;
        let hidden = Value::from_array(hidden.clone()).context("Failed to create hidden state tensor")?;

        let mut session = self.decoder.lock();
        let outputs = session
            .run(ort::inputs![
                INPUT_IDS => input_ids,
                ENCODER_HIDDEN_STATES => hidden
            ])
            .context("Decoder inference failed")?;

        let logits = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract logits")?;
        let logits = logits
            .into_dimensionality::<Ix3>()
            .context("Expected [1, sequence, vocab] logits")?;

        let last = logits.shape()[1]
            .checked_sub(1)
            .context("Decoder returned an empty sequence")?;
        Ok(logits.index_axis(Axis(0), 0).row(last).to_vec())
    }
}

impl SequenceGenerator for OnnxTrOcrGenerator {
    fn generate(&self, pixel_values: &Array4<f32>, config: &GenerationConfig) -> Result<Vec<String>> {
        if !config.is_greedy() {
            anyhow::bail!(
                "only greedy decoding is supported (num_beams={}, do_sample={})",
                config.num_beams,
                config.do_sample
            );
        }

        let start = Instant::now();
        let hidden = self.encode(pixel_values)?;

        let ids = greedy_decode(
            self.decoder_start_token_id,
            self.eos_token_id,
            config,
            |ids| self.next_logits(&hidden, ids),
        )?;
        debug!("Generated {} tokens in {:?}", ids.len(), start.elapsed());

        let text = self
            .tokenizer
            .decode(&ids, false)
            .map_err(|e| anyhow::anyhow!("Decoding failed: {}", e))?;

        Ok(vec![text])
    }
}

/// Greedy autoregressive loop.
///
/// `step` receives the ids so far and returns the next-token logits. The sequence
/// includes the start token and is capped at `max_length` tokens.
fn greedy_decode<F>(start_token: u32, eos_token: u32, config: &GenerationConfig, mut step: F) -> Result<Vec<u32>>
where
    F: FnMut(&[i64]) -> Result<Vec<f32>>,
{
    let mut ids = vec![start_token as i64];

    while ids.len() < config.max_length {
        let logits = step(&ids)?;
        let next = argmax(&logits).context("Decoder returned empty logits")? as u32;
        ids.push(next as i64);

        if config.early_stopping && next == eos_token {
            break;
        }
    }

    Ok(ids.into_iter().map(|id| id as u32).collect())
}

/// Index of the largest value; the first one wins a tie
fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_hot(vocab: usize, hot: usize) -> Vec<f32> {
        let mut logits = vec![0.0; vocab];
        logits[hot] = 5.0;
        logits
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.3]), Some(1));
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_greedy_stops_at_eos() {
        let script = [10, 11, 2, 12];
        let mut step_count = 0;

        let ids = greedy_decode(2, 2, &GenerationConfig::default(), |ids| {
            assert_eq!(ids.len(), step_count + 1);
            let logits = one_hot(16, script[step_count]);
            step_count += 1;
            Ok(logits)
        })
        .unwrap();

        assert_eq!(ids, vec![2, 10, 11, 2]);
        assert_eq!(step_count, 3);
    }

    #[test]
    fn test_greedy_respects_max_length() {
        let config = GenerationConfig {
            max_length: 4,
            ..GenerationConfig::default()
        };

        let ids = greedy_decode(2, 2, &config, |_| Ok(one_hot(8, 7))).unwrap();
        assert_eq!(ids, vec![2, 7, 7, 7]);
    }

    #[test]
    fn test_greedy_without_early_stopping_runs_to_max_length() {
        let config = GenerationConfig {
            max_length: 3,
            early_stopping: false,
            ..GenerationConfig::default()
        };

        let ids = greedy_decode(0, 2, &config, |_| Ok(one_hot(4, 2))).unwrap();
        assert_eq!(ids, vec![0, 2, 2]);
    }

    #[test]
    fn test_greedy_propagates_step_error() {
        let result = greedy_decode(2, 2, &GenerationConfig::default(), |_| anyhow::bail!("decoder failed"));
        assert_eq!(result.unwrap_err().to_string(), "decoder failed");
    }

    #[test]
    fn test_empty_logits_fail() {
        assert!(greedy_decode(2, 2, &GenerationConfig::default(), |_| Ok(Vec::new())).is_err());
    }
}
