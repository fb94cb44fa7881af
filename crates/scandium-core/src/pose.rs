use crate::{MarkerFootprint, Timestamp};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Coordinate frame of the published target position.
///
/// Discriminants are the MAVLink `MAV_FRAME` values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetFrame {
    #[serde(rename = "LOCAL_NED")]
    LocalNed = 1,
    #[default]
    #[serde(rename = "BODY_NED")]
    BodyNed = 8,
    #[serde(rename = "BODY_FRD")]
    BodyFrd = 12,
}

impl TargetFrame {
    pub fn mav_frame_id(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetFrame::LocalNed => "LOCAL_NED",
            TargetFrame::BodyNed => "BODY_NED",
            TargetFrame::BodyFrd => "BODY_FRD",
        }
    }
}

/// Why a single observation was dropped.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoseRejection {
    #[error("tag {tag_id} is not in the allowlist")]
    NotAllowlisted { tag_id: u32 },
    #[error("degenerate corner geometry")]
    Degenerate,
    #[error("tag area {area_px:.1} px^2 below minimum")]
    TooSmall { area_px: f64 },
    #[error("pose solve failed")]
    SolveFailed,
    #[error("reprojection error {error_px:.2} px exceeds {max_px:.2} px")]
    Reprojection { error_px: f64, max_px: f64 },
    #[error("apparent size inconsistent with marker size (ratio {ratio:.2})")]
    SizeMismatch { ratio: f64 },
}

/// Camera-frame marker pose from a single detection.
///
/// `tag_id` and `reprojection_error` are always populated; on failure the
/// error is `f64::INFINITY` and `rejection` names the cause.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RawPose {
    pub tag_id: u32,
    pub timestamp: Timestamp,
    /// Marker origin in the camera frame (x right, y down, z forward), meters.
    pub translation: Vector3<f64>,
    /// Rotation from marker frame to camera frame.
    pub rotation: UnitQuaternion<f64>,
    /// Mean corner reprojection error in pixels.
    pub reprojection_error: f64,
    pub confidence: f64,
    pub footprint: MarkerFootprint,
    pub rejection: Option<PoseRejection>,
}

impl RawPose {
    pub fn rejected(
        tag_id: u32,
        timestamp: Timestamp,
        footprint: MarkerFootprint,
        reason: PoseRejection,
    ) -> Self {
        Self {
            tag_id,
            timestamp,
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            reprojection_error: f64::INFINITY,
            confidence: 0.0,
            footprint,
            rejection: Some(reason),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.rejection.is_none()
    }
}

/// An accepted observation expressed in the configured target frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TargetObservation {
    pub tag_id: u32,
    pub timestamp: Timestamp,
    pub translation: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub confidence: f64,
}

/// Smoothed target estimate in the target frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilteredPose {
    pub translation: Vector3<f64>,
    pub orientation: Option<UnitQuaternion<f64>>,
    /// Meters per second, from consecutive accepted observations.
    pub velocity: Vector3<f64>,
    /// Isotropic position variance in m^2.
    pub variance: f64,
    pub confidence: f64,
    /// Ticks since the last accepted observation.
    pub age: u32,
    pub valid: bool,
    pub tag_id: Option<u32>,
    /// Capture time of the last accepted observation.
    pub timestamp: Timestamp,
}

impl FilteredPose {
    /// The "no track" estimate.
    pub fn empty() -> Self {
        Self {
            translation: Vector3::zeros(),
            orientation: None,
            velocity: Vector3::zeros(),
            variance: f64::INFINITY,
            confidence: 0.0,
            age: 0,
            valid: false,
            tag_id: None,
            timestamp: Timestamp::ZERO,
        }
    }

    /// Lateral offset magnitude, `sqrt(x^2 + y^2)`.
    pub fn horizontal_error(&self) -> f64 {
        self.translation.x.hypot(self.translation.y)
    }

    /// Height above the target along the down axis.
    pub fn altitude(&self) -> f64 {
        self.translation.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_ids_match_wire_values() {
        assert_eq!(TargetFrame::LocalNed.mav_frame_id(), 1);
        assert_eq!(TargetFrame::BodyNed.mav_frame_id(), 8);
        assert_eq!(TargetFrame::BodyFrd.mav_frame_id(), 12);
    }

    #[test]
    fn frame_names_round_trip_through_json() {
        let json = serde_json::to_string(&TargetFrame::BodyFrd).expect("serialize");
        assert_eq!(json, "\"BODY_FRD\"");
        let back: TargetFrame = serde_json::from_str("\"LOCAL_NED\"").expect("deserialize");
        assert_eq!(back, TargetFrame::LocalNed);
    }

    #[test]
    fn rejected_pose_carries_sentinel_error() {
        let fp = MarkerFootprint {
            center: nalgebra::Point2::new(1.0, 2.0),
            side_px: 3.0,
        };
        let p = RawPose::rejected(7, Timestamp(5), fp, PoseRejection::Degenerate);
        assert_eq!(p.tag_id, 7);
        assert!(p.reprojection_error.is_infinite());
        assert!(!p.is_valid());
    }

    #[test]
    fn horizontal_error_ignores_z() {
        let mut p = FilteredPose::empty();
        p.translation = Vector3::new(0.3, 0.4, 2.0);
        assert!((p.horizontal_error() - 0.5).abs() < 1e-12);
        assert_eq!(p.altitude(), 2.0);
    }
}
