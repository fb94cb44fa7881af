use crate::pnp::{check_quad, solve_square_pnp, PnpError};
use scandium_core::{CameraModel, Detection, PoseRejection, RawPose, Timestamp};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Marker geometry and the gates every observation has to pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseEstimatorParams {
    /// Printed marker side length in meters.
    pub marker_size_m: f64,
    /// Accepted tag ids. Anything else is rejected before the solve.
    pub allowlist: Vec<u32>,
    /// Minimum quad area in square pixels.
    pub min_tag_area_px: f64,
    /// Maximum mean corner reprojection error in pixels.
    pub max_reprojection_error_px: f64,
    /// Allowed relative disagreement between the depth implied by the
    /// apparent marker size and the solved depth.
    pub size_tolerance: f64,
    /// Gauss-Newton refinement iterations.
    pub max_iterations: usize,
}

impl Default for PoseEstimatorParams {
    fn default() -> Self {
        Self {
            marker_size_m: 0.20,
            allowlist: vec![1],
            min_tag_area_px: 800.0,
            max_reprojection_error_px: 3.0,
            size_tolerance: 0.25,
            max_iterations: 20,
        }
    }
}

/// Detection -> camera-frame [`RawPose`], never failing out of the tick.
#[derive(Clone, Debug)]
pub struct PoseEstimator {
    params: PoseEstimatorParams,
    camera: CameraModel,
}

impl PoseEstimator {
    pub fn new(params: PoseEstimatorParams, camera: CameraModel) -> Self {
        Self { params, camera }
    }

    pub fn params(&self) -> &PoseEstimatorParams {
        &self.params
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn is_allowed(&self, tag_id: u32) -> bool {
        self.params.allowlist.contains(&tag_id)
    }

    /// Estimate the pose of one detection. Rejections are carried in
    /// [`RawPose::rejection`].
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, det), fields(tag_id = det.tag_id))
    )]
    pub fn estimate(&self, det: &Detection, timestamp: Timestamp) -> RawPose {
        let footprint = det.footprint();
        match self.try_estimate(det, timestamp) {
            Ok(pose) => pose,
            Err(reason) => {
                log::debug!("tag {} rejected: {}", det.tag_id, reason);
                RawPose::rejected(det.tag_id, timestamp, footprint, reason)
            }
        }
    }

    fn try_estimate(&self, det: &Detection, timestamp: Timestamp) -> Result<RawPose, PoseRejection> {
        let p = &self.params;
        if !self.is_allowed(det.tag_id) {
            return Err(PoseRejection::NotAllowlisted { tag_id: det.tag_id });
        }

        let area = check_quad(&det.corners).map_err(|_| PoseRejection::Degenerate)?;
        if area < p.min_tag_area_px {
            return Err(PoseRejection::TooSmall { area_px: area });
        }

        let sol = solve_square_pnp(&det.corners, p.marker_size_m, &self.camera, p.max_iterations)
            .map_err(|e| match e {
                PnpError::Degenerate => PoseRejection::Degenerate,
                _ => PoseRejection::SolveFailed,
            })?;

        if !(sol.reprojection_error <= p.max_reprojection_error_px) {
            return Err(PoseRejection::Reprojection {
                error_px: sol.reprojection_error,
                max_px: p.max_reprojection_error_px,
            });
        }

        // Depth implied by apparent size must agree with the solved depth.
        let apparent_depth = self.camera.intrinsics.focal() * p.marker_size_m / area.sqrt();
        let ratio = apparent_depth / sol.translation.z;
        if !((ratio - 1.0).abs() <= p.size_tolerance) {
            return Err(PoseRejection::SizeMismatch { ratio });
        }

        Ok(RawPose {
            tag_id: det.tag_id,
            timestamp,
            translation: sol.translation,
            rotation: sol.rotation,
            reprojection_error: sol.reprojection_error,
            confidence: det.confidence_or_one(),
            footprint: det.footprint(),
            rejection: None,
        })
    }

    /// Estimate every detection, then return the best accepted pose (highest
    /// confidence, then lowest reprojection error) along with all results.
    pub fn estimate_all(&self, dets: &[Detection], timestamp: Timestamp) -> (Option<RawPose>, Vec<RawPose>) {
        let all: Vec<RawPose> = dets.iter().map(|d| self.estimate(d, timestamp)).collect();
        let best = all
            .iter()
            .filter(|p| p.is_valid())
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then(b.reprojection_error.total_cmp(&a.reprojection_error))
            })
            .cloned();
        (best, all)
    }
}
