//! Camera -> vehicle frame conversion.
//!
//! The extrinsic transform is fixed for the lifetime of the process. Body
//! axes are x forward, y right, z down.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use scandium_core::{RawPose, TargetFrame, TargetObservation};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("extrinsic rotation is not orthonormal with det +1 (error {error:.2e})")]
    NotARotation { error: f64 },
    #[error("extrinsic translation is not finite")]
    NonFinite,
}

/// Named mounting presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountPreset {
    /// Camera axes coincide with body axes.
    Identity,
    /// Camera looks straight down, image top toward the vehicle nose.
    #[default]
    DownwardFacing,
}

/// Static camera -> body rigid transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extrinsics {
    body_from_camera: Rotation3<f64>,
    /// Camera optical center in body coordinates, meters.
    camera_position: Vector3<f64>,
}

impl Extrinsics {
    pub fn from_preset(preset: MountPreset, camera_position: Vector3<f64>) -> Self {
        let m = match preset {
            MountPreset::Identity => Matrix3::identity(),
            // image right -> body right, image up -> body forward, optical axis -> down
            MountPreset::DownwardFacing => Matrix3::new(
                0.0, -1.0, 0.0, //
                1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0,
            ),
        };
        Self {
            body_from_camera: Rotation3::from_matrix_unchecked(m),
            camera_position,
        }
    }

    /// Build from a row-major rotation and a translation, validating both.
    pub fn from_rows(rows: [[f64; 3]; 3], translation: [f64; 3]) -> Result<Self, FrameError> {
        let m = Matrix3::new(
            rows[0][0], rows[0][1], rows[0][2], //
            rows[1][0], rows[1][1], rows[1][2], //
            rows[2][0], rows[2][1], rows[2][2],
        );
        let ortho = (m.transpose() * m - Matrix3::identity()).abs().max();
        let det = m.determinant();
        let error = ortho.max((det - 1.0).abs());
        if !(error < 1e-6) {
            return Err(FrameError::NotARotation { error });
        }
        let t = Vector3::from(translation);
        if !t.iter().all(|v| v.is_finite()) {
            return Err(FrameError::NonFinite);
        }
        Ok(Self {
            body_from_camera: Rotation3::from_matrix_unchecked(m),
            camera_position: t,
        })
    }

    pub fn rotation(&self) -> &Rotation3<f64> {
        &self.body_from_camera
    }

    pub fn camera_position(&self) -> &Vector3<f64> {
        &self.camera_position
    }

    pub fn point_to_body(&self, p_cam: &Vector3<f64>) -> Vector3<f64> {
        self.body_from_camera * p_cam + self.camera_position
    }

    /// Inverse of [`point_to_body`](Self::point_to_body).
    pub fn point_to_camera(&self, p_body: &Vector3<f64>) -> Vector3<f64> {
        self.body_from_camera.inverse() * (p_body - self.camera_position)
    }
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::from_preset(MountPreset::DownwardFacing, Vector3::zeros())
    }
}

/// Converts accepted camera-frame poses into the configured target frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameTransform {
    extrinsics: Extrinsics,
    frame: TargetFrame,
}

impl FrameTransform {
    pub fn new(extrinsics: Extrinsics, frame: TargetFrame) -> Self {
        Self { extrinsics, frame }
    }

    pub fn frame(&self) -> TargetFrame {
        self.frame
    }

    pub fn extrinsics(&self) -> &Extrinsics {
        &self.extrinsics
    }

    /// Express `raw` in the target frame. Returns `None` for rejected poses.
    ///
    /// `LOCAL_NED` additionally rotates the body-relative vector by the
    /// vehicle yaw when one is supplied; without yaw it falls back to the
    /// body-relative vector.
    pub fn apply(&self, raw: &RawPose, vehicle_yaw: Option<f64>) -> Option<TargetObservation> {
        if !raw.is_valid() {
            return None;
        }
        let mut translation = self.extrinsics.point_to_body(&raw.translation);
        let body_q = UnitQuaternion::from_rotation_matrix(&self.extrinsics.body_from_camera);
        let mut orientation = body_q * raw.rotation;

        if let (TargetFrame::LocalNed, Some(yaw)) = (self.frame, vehicle_yaw) {
            let heading = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), yaw);
            translation = heading * translation;
            orientation = heading * orientation;
        }

        Some(TargetObservation {
            tag_id: raw.tag_id,
            timestamp: raw.timestamp,
            translation,
            orientation,
            confidence: raw.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Point2;
    use scandium_core::{MarkerFootprint, Timestamp};

    fn raw(t: Vector3<f64>) -> RawPose {
        RawPose {
            tag_id: 1,
            timestamp: Timestamp(1),
            translation: t,
            rotation: UnitQuaternion::identity(),
            reprojection_error: 0.1,
            confidence: 1.0,
            footprint: MarkerFootprint {
                center: Point2::new(0.0, 0.0),
                side_px: 10.0,
            },
            rejection: None,
        }
    }

    #[test]
    fn downward_camera_maps_optical_axis_to_body_down() {
        let x = Extrinsics::default();
        let p = x.point_to_body(&Vector3::new(0.0, 0.0, 2.0));
        assert_abs_diff_eq!(p, Vector3::new(0.0, 0.0, 2.0), epsilon = 1e-12);
        // image up (-y) is the vehicle nose
        let fwd = x.point_to_body(&Vector3::new(0.0, -1.0, 0.0));
        assert_abs_diff_eq!(fwd, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
        let right = x.point_to_body(&Vector3::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(right, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn camera_offset_is_added() {
        let x = Extrinsics::from_preset(MountPreset::Identity, Vector3::new(0.1, 0.0, 0.05));
        let p = x.point_to_body(&Vector3::new(0.0, 0.0, 1.0));
        assert_abs_diff_eq!(p, Vector3::new(0.1, 0.0, 1.05), epsilon = 1e-12);
        assert_abs_diff_eq!(x.point_to_camera(&p), Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn non_rotation_rows_are_rejected() {
        let rows = [[2.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert!(matches!(
            Extrinsics::from_rows(rows, [0.0; 3]),
            Err(FrameError::NotARotation { .. })
        ));
        let mirror = [[-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert!(Extrinsics::from_rows(mirror, [0.0; 3]).is_err());
    }

    #[test]
    fn local_ned_rotates_by_yaw() {
        let tf = FrameTransform::new(
            Extrinsics::from_preset(MountPreset::Identity, Vector3::zeros()),
            TargetFrame::LocalNed,
        );
        let obs = tf
            .apply(&raw(Vector3::new(1.0, 0.0, 2.0)), Some(std::f64::consts::FRAC_PI_2))
            .expect("valid");
        assert_abs_diff_eq!(obs.translation, Vector3::new(0.0, 1.0, 2.0), epsilon = 1e-12);

        let body = tf.apply(&raw(Vector3::new(1.0, 0.0, 2.0)), None).expect("valid");
        assert_abs_diff_eq!(body.translation, Vector3::new(1.0, 0.0, 2.0), epsilon = 1e-12);
    }

    #[test]
    fn rejected_pose_is_not_transformed() {
        let mut p = raw(Vector3::new(0.0, 0.0, 1.0));
        p.rejection = Some(scandium_core::PoseRejection::SolveFailed);
        let tf = FrameTransform::new(Extrinsics::default(), TargetFrame::BodyNed);
        assert!(tf.apply(&p, None).is_none());
    }
}
