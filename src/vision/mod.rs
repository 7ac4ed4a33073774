//! Vision Layer
//!
//! Locates the meter display and reading regions and recognizes the reading text.
//! Model capabilities are injected behind traits:
//! - `ObjectDetector` for region detection (YOLO via ONNX Runtime)
//! - `SequenceGenerator` for text generation (TrOCR via ONNX Runtime)

pub mod detection;
pub mod geometry;
pub mod models;
pub mod preprocess;
pub mod recognition;
pub mod trocr;
pub mod yolo;

pub use detection::{ObjectDetector, RawDetections, RegionDetector};
pub use geometry::extract;
pub use models::{Device, OnnxSession};
pub use recognition::{GenerationConfig, RecognizerSettings, SequenceGenerator, TextRecognizer};
pub use trocr::OnnxTrOcrGenerator;
pub use yolo::OnnxYoloDetector;

use serde::{Deserialize, Serialize};

/// A polygon vertex in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Half-open axis-aligned rectangle: `min` inclusive, `max` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Rect {
    pub fn width(&self) -> i64 {
        self.max_x as i64 - self.min_x as i64
    }

    pub fn height(&self) -> i64 {
        self.max_y as i64 - self.min_y as i64
    }
}

/// Ordered, non-empty list of vertices describing a detected region.
///
/// Vertices may lie outside the image they were detected in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    /// Create a polygon, returning `None` when no vertices are given
    pub fn new(vertices: Vec<Point>) -> Option<Self> {
        if vertices.is_empty() {
            None
        } else {
            Some(Self { vertices })
        }
    }

    /// Encode an axis-aligned rectangle given by two corners as four vertices
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            vertices: vec![
                Point::new(x1, y1),
                Point::new(x2, y1),
                Point::new(x2, y2),
                Point::new(x1, y2),
            ],
        }
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    /// Axis-aligned bounding rectangle over all vertices
    pub fn bounding_rect(&self) -> Rect {
        let first = self.vertices[0];
        self.vertices.iter().skip(1).fold(
            Rect {
                min_x: first.x,
                min_y: first.y,
                max_x: first.x,
                max_y: first.y,
            },
            |r, p| Rect {
                min_x: r.min_x.min(p.x),
                min_y: r.min_y.min(p.y),
                max_x: r.max_x.max(p.x),
                max_y: r.max_y.max(p.y),
            },
        )
    }
}

/// Shape of the boxes a detector produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxShape {
    /// Rotated quadrilateral, `x1, y1, x2, y2, x3, y3, x4, y4`
    Oriented,
    /// Axis-aligned rectangle, `x1, y1, x2, y2`
    AxisAligned,
}

impl BoxShape {
    /// Number of raw coordinates one candidate carries
    pub fn coordinate_count(&self) -> usize {
        match self {
            BoxShape::Oriented => 8,
            BoxShape::AxisAligned => 4,
        }
    }

    /// Build a polygon from raw float coordinates, truncating toward zero.
    /// Returns `None` when the coordinate count does not fit this shape.
    pub fn polygon_from_coords(&self, coords: &[f32]) -> Option<Polygon> {
        if coords.len() != self.coordinate_count() {
            return None;
        }
        match self {
            BoxShape::Oriented => Polygon::new(
                coords
                    .chunks_exact(2)
                    .map(|xy| Point::new(xy[0] as i32, xy[1] as i32))
                    .collect(),
            ),
            BoxShape::AxisAligned => Some(Polygon::from_corners(
                coords[0] as i32,
                coords[1] as i32,
                coords[2] as i32,
                coords[3] as i32,
            )),
        }
    }
}

impl std::fmt::Display for BoxShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoxShape::Oriented => write!(f, "oriented"),
            BoxShape::AxisAligned => write!(f, "axis-aligned"),
        }
    }
}

/// A detected region with its confidence score (0.0 - 1.0)
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub polygon: Polygon,
    pub confidence: f32,
}

/// Detections produced by one inference call, in the order the detector produced them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Detection> {
        self.detections.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    /// Index of the highest-confidence detection. Ties go to the earliest one.
    pub fn best_index(&self) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (i, d) in self.detections.iter().enumerate() {
            match best {
                Some((_, conf)) if d.confidence <= conf => {}
                _ => best = Some((i, d.confidence)),
            }
        }
        best.map(|(i, _)| i)
    }
}

/// Fixed width/height an ROI is resized to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiSize {
    pub width: u32,
    pub height: u32,
}

impl RoiSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(confidence: f32) -> Detection {
        Detection {
            polygon: Polygon::from_corners(0, 0, 1, 1),
            confidence,
        }
    }

    #[test]
    fn test_polygon_requires_a_vertex() {
        assert!(Polygon::new(vec![]).is_none());
        assert!(Polygon::new(vec![Point::new(3, 4)]).is_some());
    }

    #[test]
    fn test_bounding_rect_of_rotated_quad() {
        let polygon = Polygon::new(vec![
            Point::new(50, 10),
            Point::new(90, 50),
            Point::new(50, 90),
            Point::new(10, 50),
        ])
        .unwrap();

        let rect = polygon.bounding_rect();
        assert_eq!(rect, Rect { min_x: 10, min_y: 10, max_x: 90, max_y: 90 });
        assert_eq!(rect.width(), 80);
        assert_eq!(rect.height(), 80);
    }

    #[test]
    fn test_box_shape_coordinates() {
        let quad = BoxShape::Oriented
            .polygon_from_coords(&[1.9, 2.0, 10.0, 2.0, 10.0, 8.7, 1.0, 8.0])
            .unwrap();
        assert_eq!(quad.vertices().len(), 4);
        // Truncated toward zero
        assert_eq!(quad.vertices()[0], Point::new(1, 2));
        assert_eq!(quad.vertices()[2], Point::new(10, 8));

        let rect = BoxShape::AxisAligned.polygon_from_coords(&[5.0, 6.0, 25.0, 16.0]).unwrap();
        assert_eq!(rect, Polygon::from_corners(5, 6, 25, 16));

        assert!(BoxShape::Oriented.polygon_from_coords(&[1.0, 2.0, 3.0, 4.0]).is_none());
        assert!(BoxShape::AxisAligned.polygon_from_coords(&[1.0; 8]).is_none());
    }

    #[test]
    fn test_best_index_prefers_max_then_earliest() {
        let set = DetectionSet::new(vec![detection(0.20), detection(0.91), detection(0.50)]);
        assert_eq!(set.best_index(), Some(1));

        let tied = DetectionSet::new(vec![detection(0.4), detection(0.7), detection(0.7)]);
        assert_eq!(tied.best_index(), Some(1));

        assert_eq!(DetectionSet::default().best_index(), None);
    }
}
