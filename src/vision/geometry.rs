//! ROI extraction
//!
//! Reduces a detected polygon to its bounding rectangle, clamps it to the image,
//! crops and resizes the crop to a fixed size.

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::debug;

use super::{Polygon, Rect, RoiSize};
use crate::error::GeometryError;

/// Crop `image` to the bounding rectangle of `polygon` and resize it to exactly `target_size`.
///
/// Resampling is cubic (Catmull-Rom). Fails when the target has a zero dimension or
/// when the clamped rectangle has no area.
pub fn extract(
    image: &RgbImage,
    polygon: &Polygon,
    target_size: RoiSize,
) -> Result<RgbImage, GeometryError> {
    if target_size.is_empty() {
        return Err(GeometryError::EmptyTarget {
            width: target_size.width,
            height: target_size.height,
        });
    }

    let rect = polygon.bounding_rect();
    let (x, y, width, height) = clamp_rect(&rect, image.width(), image.height())?;

    debug!(
        "Cropping {}x{} at ({}, {}) from {}x{} image, resizing to {}x{}",
        width,
        height,
        x,
        y,
        image.width(),
        image.height(),
        target_size.width,
        target_size.height
    );

    let crop = imageops::crop_imm(image, x, y, width, height).to_image();
    Ok(imageops::resize(
        &crop,
        target_size.width,
        target_size.height,
        FilterType::CatmullRom,
    ))
}

/// Clamp a rectangle to `[0, width] x [0, height]`, returning `(x, y, width, height)`
fn clamp_rect(rect: &Rect, img_width: u32, img_height: u32) -> Result<(u32, u32, u32, u32), GeometryError> {
    let x1 = (rect.min_x as i64).clamp(0, img_width as i64);
    let y1 = (rect.min_y as i64).clamp(0, img_height as i64);
    let x2 = (rect.max_x as i64).clamp(0, img_width as i64);
    let y2 = (rect.max_y as i64).clamp(0, img_height as i64);

    if x2 <= x1 || y2 <= y1 {
        return Err(GeometryError::Degenerate {
            rect: *rect,
            width: img_width,
            height: img_height,
        });
    }

    Ok((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
}
