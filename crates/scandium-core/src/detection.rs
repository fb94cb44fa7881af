use crate::{GrayImage, GrayImageView, Timestamp};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// A single camera capture. Owned by the tick that processes it.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: GrayImage,
    /// Monotonic capture time. Published verbatim as `time_usec`.
    pub timestamp: Timestamp,
    pub seq: u64,
}

impl Frame {
    pub fn new(image: GrayImage, timestamp: Timestamp, seq: u64) -> Self {
        Self {
            image,
            timestamp,
            seq,
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        self.image.view()
    }
}

/// One candidate marker returned by a detector backend.
///
/// Corners are ordered top-left, top-right, bottom-right, bottom-left as seen
/// in the image, i.e. clockwise with the y axis pointing down.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub tag_id: u32,
    pub corners: [Point2<f32>; 4],
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl Detection {
    pub fn new(tag_id: u32, corners: [Point2<f32>; 4]) -> Self {
        Self {
            tag_id,
            corners,
            confidence: None,
        }
    }

    /// Shoelace area in pixels. Positive for clockwise (y-down) order.
    pub fn signed_area(&self) -> f64 {
        let mut acc = 0.0;
        for i in 0..4 {
            let a = self.corners[i];
            let b = self.corners[(i + 1) % 4];
            acc += a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64;
        }
        0.5 * acc
    }

    pub fn footprint(&self) -> MarkerFootprint {
        let cx = self.corners.iter().map(|p| p.x as f64).sum::<f64>() / 4.0;
        let cy = self.corners.iter().map(|p| p.y as f64).sum::<f64>() / 4.0;
        let mut perimeter = 0.0;
        for i in 0..4 {
            let a = self.corners[i];
            let b = self.corners[(i + 1) % 4];
            perimeter += (((b.x - a.x) as f64).powi(2) + ((b.y - a.y) as f64).powi(2)).sqrt();
        }
        MarkerFootprint {
            center: Point2::new(cx, cy),
            side_px: perimeter / 4.0,
        }
    }

    /// Detector confidence, `1.0` when the backend does not report one.
    pub fn confidence_or_one(&self) -> f64 {
        self.confidence.map_or(1.0, |c| (c as f64).clamp(0.0, 1.0))
    }
}

/// Where a marker sits in the image and how large it appears.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerFootprint {
    pub center: Point2<f64>,
    /// Mean side length in pixels.
    pub side_px: f64,
}

/// Fiducial detector backend (ArUco, AprilTag, ...).
pub trait MarkerDetector {
    fn detect(&mut self, image: &GrayImageView<'_>) -> Vec<Detection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f32, y0: f32, s: f32) -> Detection {
        Detection::new(
            1,
            [
                Point2::new(x0, y0),
                Point2::new(x0 + s, y0),
                Point2::new(x0 + s, y0 + s),
                Point2::new(x0, y0 + s),
            ],
        )
    }

    #[test]
    fn clockwise_square_has_positive_area() {
        let d = square(10.0, 20.0, 40.0);
        assert!((d.signed_area() - 1600.0).abs() < 1e-9);
    }

    #[test]
    fn reversed_winding_flips_sign() {
        let mut d = square(10.0, 20.0, 40.0);
        d.corners.reverse();
        assert!(d.signed_area() < 0.0);
    }

    #[test]
    fn footprint_is_centered() {
        let fp = square(10.0, 20.0, 40.0).footprint();
        assert!((fp.center.x - 30.0).abs() < 1e-9);
        assert!((fp.center.y - 40.0).abs() < 1e-9);
        assert!((fp.side_px - 40.0).abs() < 1e-9);
    }
}
