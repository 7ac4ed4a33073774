//! Region detection
//!
//! Wraps an object detection capability, picks the most confident region and
//! extracts it as a fixed-size ROI. One implementation serves both the oriented
//! (display) and axis-aligned (reading) detectors.

use image::RgbImage;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::geometry::extract;
use super::yolo::OnnxYoloDetector;
use super::{BoxShape, Detection, DetectionSet, RoiSize};
use crate::config::{DetectorConfig, RuntimeConfig};
use crate::error::{DetectionError, ExtractError, ModelLoadError};

/// Raw output of one detection call: one coordinate list and one confidence per candidate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetections {
    /// Box coordinates, 8 values per oriented box or 4 per axis-aligned box
    pub boxes: Vec<Vec<f32>>,
    /// Confidence per box (0.0 - 1.0)
    pub confidences: Vec<f32>,
}

impl RawDetections {
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty() && self.confidences.is_empty()
    }
}

/// Object detection capability. Calls must be side-effect free so a single
/// instance can serve concurrent requests.
pub trait ObjectDetector: Send + Sync {
    /// Run detection on an RGB image
    fn infer(&self, image: &RgbImage) -> anyhow::Result<RawDetections>;
}

/// Detector for one kind of meter region
pub struct RegionDetector {
    /// Region name used in logs ("display", "reading")
    name: String,
    shape: BoxShape,
    target_size: RoiSize,
    backend: Box<dyn ObjectDetector>,
}

impl std::fmt::Debug for RegionDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionDetector")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("target_size", &self.target_size)
            .finish_non_exhaustive()
    }
}

impl RegionDetector {
    /// Create a detector around an already loaded capability
    pub fn new(
        name: impl Into<String>,
        shape: BoxShape,
        target_size: RoiSize,
        backend: Box<dyn ObjectDetector>,
    ) -> Self {
        Self {
            name: name.into(),
            shape,
            target_size,
            backend,
        }
    }

    /// Load a YOLO ONNX detector from the configured model file
    pub fn load(
        name: impl Into<String>,
        shape: BoxShape,
        config: &DetectorConfig,
        runtime: &RuntimeConfig,
    ) -> Result<Self, ModelLoadError> {
        let name = name.into();
        let start = Instant::now();
        info!("Loading {} detector ({} boxes) from {:?}", name, shape, config.model_path);

        let backend = OnnxYoloDetector::load(shape, config, runtime)?;

        info!(
            "{} detector loaded in {:.3}s",
            name,
            start.elapsed().as_secs_f32()
        );
        Ok(Self::new(name, shape, config.target_size, Box::new(backend)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> BoxShape {
        self.shape
    }

    /// Configured ROI size for this region
    pub fn target_size(&self) -> RoiSize {
        self.target_size
    }

    /// Run the capability once and validate its output
    pub fn detect(&self, image: &RgbImage) -> Result<DetectionSet, DetectionError> {
        let start = Instant::now();
        debug!("Finding {} bounding box", self.name);

        let raw = self.backend.infer(image).map_err(DetectionError::Inference)?;

        if raw.boxes.len() != raw.confidences.len() {
            return Err(DetectionError::MalformedOutput {
                reason: format!(
                    "{} boxes but {} confidences",
                    raw.boxes.len(),
                    raw.confidences.len()
                ),
            });
        }

        let mut detections = Vec::with_capacity(raw.boxes.len());
        for (i, (coords, &confidence)) in raw.boxes.iter().zip(&raw.confidences).enumerate() {
            let polygon = self.shape.polygon_from_coords(coords).ok_or_else(|| {
                DetectionError::MalformedOutput {
                    reason: format!(
                        "box {} has {} coordinates, expected {} for {} boxes",
                        i,
                        coords.len(),
                        self.shape.coordinate_count(),
                        self.shape
                    ),
                }
            })?;

            if !(0.0..=1.0).contains(&confidence) {
                return Err(DetectionError::MalformedOutput {
                    reason: format!("box {} has confidence {} outside [0, 1]", i, confidence),
                });
            }

            detections.push(Detection { polygon, confidence });
        }

        let set = DetectionSet::new(detections);
        if set.is_empty() {
            warn!("{} is not detected", self.name);
        } else {
            debug!(
                "Found {} {} candidates in {:?}",
                set.len(),
                self.name,
                start.elapsed()
            );
        }

        Ok(set)
    }

    /// Highest-confidence detection; the earliest one wins a tie
    pub fn select_best(detections: &DetectionSet) -> Option<&Detection> {
        detections.best_index().and_then(|i| detections.get(i))
    }

    /// Detect the region and extract it as an ROI of `target_size`.
    ///
    /// When nothing is detected the input image is returned unchanged so the next
    /// stage still receives an image.
    pub fn detect_and_extract(
        &self,
        image: &RgbImage,
        target_size: RoiSize,
    ) -> Result<RgbImage, ExtractError> {
        let detections = self.detect(image)?;

        match Self::select_best(&detections) {
            Some(best) => {
                debug!(
                    "Extracting {} ROI (confidence {:.3}, bounds {:?})",
                    self.name,
                    best.confidence,
                    best.polygon.bounding_rect()
                );
                Ok(extract(image, &best.polygon, target_size)?)
            }
            None => {
                info!(
                    "No {} region found, passing the {}x{} input through",
                    self.name,
                    image.width(),
                    image.height()
                );
                Ok(image.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeometryError;
    use crate::testing::{checker_image, FailingDetector, StubDetector};
    use crate::vision::Polygon;
    use std::sync::atomic::Ordering;

    fn display_detector(backend: StubDetector) -> RegionDetector {
        RegionDetector::new("display", BoxShape::Oriented, RoiSize::new(128, 128), Box::new(backend))
    }

    fn square(x1: f32, y1: f32, x2: f32, y2: f32) -> Vec<f32> {
        vec![x1, y1, x2, y1, x2, y2, x1, y2]
    }

    #[test]
    fn test_detect_builds_polygons_in_order() {
        let backend = StubDetector::new(
            vec![square(0.0, 0.0, 10.0, 10.0), square(5.0, 5.0, 50.0, 40.0)],
            vec![0.3, 0.8],
        );
        let detector = display_detector(backend);

        let set = detector.detect(&checker_image(640, 480)).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(1).unwrap().polygon, Polygon::from_corners(5, 5, 50, 40));
        assert!((set.get(0).unwrap().confidence - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_detect_calls_capability_every_time() {
        let backend = StubDetector::empty();
        let calls = backend.calls();
        let detector = display_detector(backend);
        let image = checker_image(32, 32);

        detector.detect(&image).unwrap();
        detector.detect(&image).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_output_is_not_an_error() {
        let detector = display_detector(StubDetector::empty());
        let set = detector.detect(&checker_image(32, 32)).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_select_best_scenario() {
        let backend = StubDetector::new(
            vec![
                square(0.0, 0.0, 100.0, 100.0),
                square(200.0, 100.0, 400.0, 300.0),
                square(50.0, 50.0, 150.0, 150.0),
            ],
            vec![0.20, 0.91, 0.50],
        );
        let detector = display_detector(backend);

        let set = detector.detect(&checker_image(640, 480)).unwrap();
        let best = RegionDetector::select_best(&set).unwrap();
        assert_eq!(set.best_index(), Some(1));
        assert_eq!(best.polygon, Polygon::from_corners(200, 100, 400, 300));
    }

    #[test]
    fn test_select_best_tie_takes_lowest_index() {
        let backend = StubDetector::new(
            vec![
                square(0.0, 0.0, 10.0, 10.0),
                square(20.0, 20.0, 30.0, 30.0),
                square(40.0, 40.0, 50.0, 50.0),
            ],
            vec![0.6, 0.6, 0.6],
        );
        let detector = display_detector(backend);

        let set = detector.detect(&checker_image(64, 64)).unwrap();
        let best = RegionDetector::select_best(&set).unwrap();
        assert_eq!(best.polygon, Polygon::from_corners(0, 0, 10, 10));
    }

    #[test]
    fn test_select_best_empty_is_none() {
        assert!(RegionDetector::select_best(&DetectionSet::default()).is_none());
    }

    #[test]
    fn test_confidence_length_mismatch_is_malformed() {
        let backend = StubDetector::new(
            vec![square(0.0, 0.0, 10.0, 10.0), square(1.0, 1.0, 5.0, 5.0)],
            vec![0.9],
        );
        let detector = display_detector(backend);

        let err = detector.detect(&checker_image(64, 64)).unwrap_err();
        assert!(matches!(err, DetectionError::MalformedOutput { .. }));
    }

    #[test]
    fn test_wrong_coordinate_count_is_malformed() {
        // Axis-aligned coordinates handed to an oriented detector
        let backend = StubDetector::new(vec![vec![0.0, 0.0, 10.0, 10.0]], vec![0.9]);
        let detector = display_detector(backend);

        assert!(matches!(
            detector.detect(&checker_image(64, 64)),
            Err(DetectionError::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_confidence_out_of_range_is_malformed() {
        let backend = StubDetector::new(vec![square(0.0, 0.0, 10.0, 10.0)], vec![f32::NAN]);
        let detector = display_detector(backend);

        assert!(matches!(
            detector.detect(&checker_image(64, 64)),
            Err(DetectionError::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_inference_failure_keeps_cause() {
        let detector = RegionDetector::new(
            "reading",
            BoxShape::AxisAligned,
            RoiSize::new(64, 32),
            Box::new(FailingDetector::new("session crashed")),
        );

        match detector.detect(&checker_image(64, 64)) {
            Err(DetectionError::Inference(cause)) => assert_eq!(cause.to_string(), "session crashed"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_detect_and_extract_resizes_best_region() {
        let backend = StubDetector::new(
            vec![square(10.0, 10.0, 100.0, 100.0), square(0.0, 0.0, 5.0, 5.0)],
            vec![0.95, 0.10],
        );
        let detector = display_detector(backend);

        let roi = detector
            .detect_and_extract(&checker_image(640, 480), RoiSize::new(128, 128))
            .unwrap();
        assert_eq!(roi.dimensions(), (128, 128));
    }

    #[test]
    fn test_detect_and_extract_falls_back_to_input() {
        let detector = RegionDetector::new(
            "reading",
            BoxShape::AxisAligned,
            RoiSize::new(200, 50),
            Box::new(StubDetector::empty()),
        );
        let image = checker_image(300, 200);

        let roi = detector.detect_and_extract(&image, RoiSize::new(200, 50)).unwrap();
        assert_eq!(roi.dimensions(), (300, 200));
        assert_eq!(roi.as_raw(), image.as_raw());
    }

    #[test]
    fn test_detect_and_extract_propagates_geometry_error() {
        let backend = StubDetector::new(vec![square(700.0, 10.0, 800.0, 100.0)], vec![0.9]);
        let detector = display_detector(backend);

        let err = detector
            .detect_and_extract(&checker_image(640, 480), RoiSize::new(128, 128))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Geometry(GeometryError::Degenerate { .. })));
    }
}
