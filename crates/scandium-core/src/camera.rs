//! Pinhole intrinsics and Brown-Conrady distortion.
//!
//! Pose estimation works in normalized undistorted coordinates; detector
//! corners arrive in raw (distorted) pixels. `CameraModel` converts between
//! the two and projects camera-frame points back into raw pixels for
//! reprojection checks.

use nalgebra::{Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length in x (pixels).
    pub fx: f64,
    /// Focal length in y (pixels).
    pub fy: f64,
    /// Principal point x (pixels).
    pub cx: f64,
    /// Principal point y (pixels).
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Nominal intrinsics for an uncalibrated sensor: `f = width`, principal
    /// point at the image center.
    pub fn nominal(width: usize, height: usize) -> Self {
        Self {
            fx: width as f64,
            fy: width as f64,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    /// Returns `true` when all values are finite and focal lengths are non-zero.
    pub fn is_valid(&self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.fx.abs() > 1e-12
            && self.fy.abs() > 1e-12
    }

    /// Mean focal length, used for apparent-size estimates.
    pub fn focal(&self) -> f64 {
        0.5 * (self.fx + self.fy)
    }

    pub fn pixel_to_normalized(&self, pixel: Point2<f64>) -> Point2<f64> {
        Point2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy)
    }

    pub fn normalized_to_pixel(&self, normalized: Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.fx * normalized.x + self.cx,
            self.fy * normalized.y + self.cy,
        )
    }
}

/// Brown-Conrady radial-tangential distortion coefficients.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RadialTangentialDistortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl RadialTangentialDistortion {
    /// Coefficients in OpenCV order `[k1, k2, p1, p2, k3]`.
    pub fn from_coeffs(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0 && self.k3 == 0.0
    }

    /// Apply distortion to normalized coordinates.
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Point2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Fixed-point inversion of [`distort`](Self::distort).
    pub fn undistort(&self, distorted: Point2<f64>) -> Option<Point2<f64>> {
        const MAX_ITERS: usize = 15;
        const EPS: f64 = 1e-12;

        if self.is_zero() {
            return Some(distorted);
        }

        let mut x = distorted.x;
        let mut y = distorted.y;
        for _ in 0..MAX_ITERS {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return None;
            }

            let dx_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let x_next = (distorted.x - dx_tan) / radial;
            let y_next = (distorted.y - dy_tan) / radial;
            if !x_next.is_finite() || !y_next.is_finite() {
                return None;
            }

            let step = ((x_next - x).powi(2) + (y_next - y).powi(2)).sqrt();
            x = x_next;
            y = y_next;
            if step <= EPS {
                break;
            }
        }
        Some(Point2::new(x, y))
    }
}

/// Complete camera model (intrinsics + distortion).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraModel {
    pub intrinsics: CameraIntrinsics,
    #[serde(default)]
    pub distortion: RadialTangentialDistortion,
}

impl CameraModel {
    pub fn pinhole(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            distortion: RadialTangentialDistortion::default(),
        }
    }

    /// Raw pixel to normalized, undistorted image coordinates.
    pub fn undistort_to_normalized(&self, pixel: Point2<f64>) -> Option<Point2<f64>> {
        let xd = self.intrinsics.pixel_to_normalized(pixel);
        self.distortion.undistort(xd)
    }

    /// Project a camera-frame point (z forward) into raw pixels.
    ///
    /// Returns `None` for points at or behind the image plane.
    pub fn project(&self, p: &Vector3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-9 {
            return None;
        }
        let xn = Point2::new(p.x / p.z, p.y / p.z);
        let px = self.intrinsics.normalized_to_pixel(self.distortion.distort(xn));
        (px.x.is_finite() && px.y.is_finite()).then_some(px)
    }
}
