//! YOLO detection backend
//!
//! Runs YOLOv8-style ONNX exports. Two heads are supported:
//! - `detect`: output `[1, 4 + classes, N]` with `cx, cy, w, h, scores...`
//! - `obb`: output `[1, 4 + classes + 1, N]` with the rotation (radians) last

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::{ArrayView2, Axis, Ix3};
use ort::value::Value;
use tracing::debug;

use super::detection::{ObjectDetector, RawDetections};
use super::models::OnnxSession;
use super::preprocess::preprocess_for_detection;
use super::BoxShape;
use crate::config::{DetectorConfig, RuntimeConfig};
use crate::error::ModelLoadError;

/// Thresholds applied to raw YOLO candidates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YoloParams {
    /// Square model input size
    pub input_size: u32,
    /// Minimum class score for a candidate
    pub confidence_threshold: f32,
    /// Overlap above which the weaker candidate is suppressed
    pub iou_threshold: f32,
    /// Maximum candidates returned
    pub max_detections: usize,
}

/// One decoded candidate in source image coordinates
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    coords: Vec<f32>,
    score: f32,
}

impl Candidate {
    /// Axis-aligned extent `(x1, y1, x2, y2)` of the box
    fn extent(&self) -> (f32, f32, f32, f32) {
        let xs = self.coords.iter().step_by(2);
        let ys = self.coords.iter().skip(1).step_by(2);
        (
            xs.clone().copied().fold(f32::INFINITY, f32::min),
            ys.clone().copied().fold(f32::INFINITY, f32::min),
            xs.copied().fold(f32::NEG_INFINITY, f32::max),
            ys.copied().fold(f32::NEG_INFINITY, f32::max),
        )
    }
}

/// ONNX Runtime YOLO detector
#[derive(Debug)]
pub struct OnnxYoloDetector {
    session: OnnxSession,
    shape: BoxShape,
    params: YoloParams,
}

impl OnnxYoloDetector {
    /// Load the detector model described by `config`
    pub fn load(shape: BoxShape, config: &DetectorConfig, runtime: &RuntimeConfig) -> Result<Self, ModelLoadError> {
        let session = OnnxSession::load(&config.model_path, config.sha256.as_deref(), runtime)?;

        if session.input_names().is_empty() || session.output_names().is_empty() {
            return Err(ModelLoadError::InvalidModel {
                path: config.model_path.clone(),
                reason: "model has no inputs or outputs".to_string(),
            });
        }

        Ok(Self {
            session,
            shape,
            params: YoloParams {
                input_size: config.input_size,
                confidence_threshold: config.confidence_threshold,
                iou_threshold: config.iou_threshold,
                max_detections: config.max_detections,
            },
        })
    }

    pub fn params(&self) -> &YoloParams {
        &self.params
    }
}

impl ObjectDetector for OnnxYoloDetector {
    fn infer(&self, image: &RgbImage) -> Result<RawDetections> {
        let (input, scale) = preprocess_for_detection(image, self.params.input_size);
        let input_value = Value::from_array(input).context("Failed to create input tensor")?;
        let input_name = self.session.input_names()[0].clone();

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input_name => input_value])
            .context("Detection inference failed")?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract output tensor")?;
        debug!("Detection output shape: {:?}", output.shape());

        let output = output
            .into_dimensionality::<Ix3>()
            .context("Expected a [1, channels, candidates] output")?;
        let predictions = output.index_axis(Axis(0), 0);

        let candidates = decode_predictions(predictions, self.shape, scale, self.params.confidence_threshold)?;
        let kept = non_max_suppression(candidates, self.params.iou_threshold, self.params.max_detections);

        Ok(RawDetections {
            confidences: kept.iter().map(|c| c.score).collect(),
            boxes: kept.into_iter().map(|c| c.coords).collect(),
        })
    }
}

/// Decode `[channels, candidates]` predictions into boxes above the threshold
fn decode_predictions(
    predictions: ArrayView2<f32>,
    shape: BoxShape,
    (scale_x, scale_y): (f32, f32),
    confidence_threshold: f32,
) -> Result<Vec<Candidate>> {
    let channels = predictions.shape()[0];
    let class_end = match shape {
        BoxShape::AxisAligned => channels,
        BoxShape::Oriented => channels.saturating_sub(1),
    };
    if class_end <= 4 {
        anyhow::bail!("{} channels is too few for a {} head", channels, shape);
    }

    let mut candidates = Vec::new();
    for i in 0..predictions.shape()[1] {
        let score = (4..class_end)
            .map(|c| predictions[[c, i]])
            .fold(f32::NEG_INFINITY, f32::max);
        if score < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (
            predictions[[0, i]],
            predictions[[1, i]],
            predictions[[2, i]],
            predictions[[3, i]],
        );

        let corners = match shape {
            BoxShape::AxisAligned => vec![cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            BoxShape::Oriented => rotated_corners(cx, cy, w, h, predictions[[channels - 1, i]]),
        };

        let coords = corners
            .chunks_exact(2)
            .flat_map(|xy| [xy[0] * scale_x, xy[1] * scale_y])
            .collect();

        candidates.push(Candidate {
            coords,
            score: score.clamp(0.0, 1.0),
        });
    }

    Ok(candidates)
}

/// Corners of a rotated box, clockwise from the top-left in the box frame
fn rotated_corners(cx: f32, cy: f32, w: f32, h: f32, angle: f32) -> Vec<f32> {
    let (sin, cos) = angle.sin_cos();
    [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)]
        .iter()
        .flat_map(|&(dx, dy): &(f32, f32)| {
            let (px, py) = (dx * w, dy * h);
            [cx + px * cos - py * sin, cy + px * sin + py * cos]
        })
        .collect()
}

/// Intersection over union of the axis-aligned extents of two candidates
fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let (ax1, ay1, ax2, ay2) = a.extent();
    let (bx1, by1, bx2, by2) = b.extent();

    let iw = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
    let ih = (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let intersection = iw * ih;
    let union = (ax2 - ax1) * (ay2 - ay1) + (bx2 - bx1) * (by2 - by1) - intersection;

    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Greedy NMS; the result is ordered by descending score
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32, max_detections: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
