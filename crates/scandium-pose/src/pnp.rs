//! Perspective-n-point for a single square marker.
//!
//! The solve runs in three steps:
//! 1. undistort the four corners into normalized image coordinates,
//! 2. fit the marker-plane -> image homography and decompose it into an
//!    initial `R, t` (columns `r1, r2` scaled to unit length, `r3 = r1 x r2`,
//!    then projected onto SO(3)),
//! 3. refine `R, t` with damped Gauss-Newton on the pixel reprojection
//!    residual of the distorted camera model.
//!
//! The marker frame has its origin at the marker center with x to the right,
//! y down and z pointing away from the camera, so a marker seen head-on has
//! identity rotation.

use nalgebra::{Matrix3, Point2, Rotation3, SMatrix, SVector, UnitQuaternion, Vector3};
use scandium_core::{homography_from_4pt, CameraModel};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Smallest accepted quad area in square pixels.
const MIN_QUAD_AREA_PX: f64 = 1.0;
/// Minimum |sin| of the angle at every corner.
const MIN_CORNER_SINE: f64 = 1e-3;
const JACOBIAN_STEP: f64 = 1e-6;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PnpError {
    #[error("corners are collinear, self-intersecting or wound counter-clockwise")]
    Degenerate,
    #[error("camera intrinsics are invalid")]
    InvalidCamera,
    #[error("corner undistortion did not converge")]
    Undistort,
    #[error("marker homography is singular")]
    Homography,
    #[error("marker projects behind the camera")]
    BehindCamera,
}

/// Pose of the marker in the camera frame.
#[derive(Clone, Debug, PartialEq)]
pub struct PnpSolution {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    /// Mean pixel distance between observed and reprojected corners.
    pub reprojection_error: f64,
    pub iterations: usize,
}

/// Marker corners in the marker frame, ordered TL, TR, BR, BL.
pub fn marker_object_points(marker_size: f64) -> [Vector3<f64>; 4] {
    let h = 0.5 * marker_size;
    [
        Vector3::new(-h, -h, 0.0),
        Vector3::new(h, -h, 0.0),
        Vector3::new(h, h, 0.0),
        Vector3::new(-h, h, 0.0),
    ]
}

/// Project the marker corners for a given pose. `None` if any corner is
/// behind the camera.
pub fn project_marker(
    rotation: &UnitQuaternion<f64>,
    translation: &Vector3<f64>,
    marker_size: f64,
    camera: &CameraModel,
) -> Option<[Point2<f64>; 4]> {
    let obj = marker_object_points(marker_size);
    let mut out = [Point2::origin(); 4];
    for (o, p) in out.iter_mut().zip(obj.iter()) {
        *o = camera.project(&(rotation * p + translation))?;
    }
    Some(out)
}

/// Validate corner geometry. Returns the quad area in pixels.
///
/// Rejects quads that are too small, collinear, non-convex, or wound
/// counter-clockwise in image coordinates.
pub fn check_quad(corners: &[Point2<f32>; 4]) -> Result<f64, PnpError> {
    let p = corners.map(|c| Point2::new(c.x as f64, c.y as f64));
    if p.iter().any(|q| !q.x.is_finite() || !q.y.is_finite()) {
        return Err(PnpError::Degenerate);
    }

    let mut twice_area = 0.0;
    for i in 0..4 {
        let a = p[i];
        let b = p[(i + 1) % 4];
        twice_area += a.x * b.y - b.x * a.y;
    }
    let area = 0.5 * twice_area;
    if !(area > MIN_QUAD_AREA_PX) {
        return Err(PnpError::Degenerate);
    }

    for i in 0..4 {
        let a = p[i];
        let ab = p[(i + 1) % 4] - a;
        let ad = p[(i + 3) % 4] - a;
        let scale = ab.norm() * ad.norm();
        if scale < 1e-9 {
            return Err(PnpError::Degenerate);
        }
        // Interior angle at `a` between the outgoing edge and the incoming one.
        let sine = (ab.x * ad.y - ab.y * ad.x) / scale;
        if sine < MIN_CORNER_SINE {
            return Err(PnpError::Degenerate);
        }
    }
    Ok(area)
}

fn decompose_homography(h: &Matrix3<f64>) -> Option<(Rotation3<f64>, Vector3<f64>)> {
    let h1: Vector3<f64> = h.column(0).into_owned();
    let h2: Vector3<f64> = h.column(1).into_owned();
    let h3: Vector3<f64> = h.column(2).into_owned();

    let norm = 0.5 * (h1.norm() + h2.norm());
    if norm < 1e-12 {
        return None;
    }
    // Keep the marker in front of the camera.
    let s = if h3.z < 0.0 { -1.0 / norm } else { 1.0 / norm };

    let r1 = h1 * s;
    let r2 = h2 * s;
    let t = h3 * s;
    let r3 = r1.cross(&r2);

    let m = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = m.svd(true, true);
    let mut u = svd.u?;
    let v_t = svd.v_t?;
    if (u * v_t).determinant() < 0.0 {
        for i in 0..3 {
            u[(i, 2)] = -u[(i, 2)];
        }
    }
    Some((Rotation3::from_matrix_unchecked(u * v_t), t))
}

fn residuals(
    rot: &Rotation3<f64>,
    t: &Vector3<f64>,
    obj: &[Vector3<f64>; 4],
    img: &[Point2<f64>; 4],
    camera: &CameraModel,
) -> Option<SVector<f64, 8>> {
    let mut r = SVector::<f64, 8>::zeros();
    for i in 0..4 {
        let px = camera.project(&(rot * obj[i] + t))?;
        r[2 * i] = px.x - img[i].x;
        r[2 * i + 1] = px.y - img[i].y;
    }
    Some(r)
}

fn perturb(
    rot: &Rotation3<f64>,
    t: &Vector3<f64>,
    delta: &SVector<f64, 6>,
) -> (Rotation3<f64>, Vector3<f64>) {
    let w = Vector3::new(delta[0], delta[1], delta[2]);
    let dt = Vector3::new(delta[3], delta[4], delta[5]);
    (Rotation3::new(w) * rot, t + dt)
}

fn mean_corner_error(r: &SVector<f64, 8>) -> f64 {
    (0..4)
        .map(|i| r[2 * i].hypot(r[2 * i + 1]))
        .sum::<f64>()
        / 4.0
}

/// Solve the pose of a square marker of side `marker_size` (meters).
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(corners, camera))
)]
pub fn solve_square_pnp(
    corners: &[Point2<f32>; 4],
    marker_size: f64,
    camera: &CameraModel,
    max_iterations: usize,
) -> Result<PnpSolution, PnpError> {
    if !camera.intrinsics.is_valid() {
        return Err(PnpError::InvalidCamera);
    }
    check_quad(corners)?;

    let img = corners.map(|c| Point2::new(c.x as f64, c.y as f64));
    let mut normalized = [Point2::origin(); 4];
    for (n, p) in normalized.iter_mut().zip(img.iter()) {
        *n = camera
            .undistort_to_normalized(*p)
            .ok_or(PnpError::Undistort)?;
    }

    let obj = marker_object_points(marker_size);
    let plane = obj.map(|p| Point2::new(p.x, p.y));
    let h = homography_from_4pt(&plane, &normalized).ok_or(PnpError::Homography)?;
    let (mut rot, mut t) = decompose_homography(&h.h).ok_or(PnpError::Homography)?;

    let mut r = residuals(&rot, &t, &obj, &img, camera).ok_or(PnpError::BehindCamera)?;
    let mut cost = r.norm_squared();
    let mut lambda = 1e-3;
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;

        let mut jac = SMatrix::<f64, 8, 6>::zeros();
        for k in 0..6 {
            let mut step = SVector::<f64, 6>::zeros();
            step[k] = JACOBIAN_STEP;
            let (rp, tp) = perturb(&rot, &t, &step);
            let (rm, tm) = perturb(&rot, &t, &(-step));
            let (Some(fp), Some(fm)) = (
                residuals(&rp, &tp, &obj, &img, camera),
                residuals(&rm, &tm, &obj, &img, camera),
            ) else {
                return Err(PnpError::BehindCamera);
            };
            jac.set_column(k, &((fp - fm) / (2.0 * JACOBIAN_STEP)));
        }

        let jtj = jac.transpose() * jac;
        let g = jac.transpose() * r;

        let mut improved = false;
        let mut step_norm = 0.0;
        for _ in 0..8 {
            let mut a = jtj;
            for d in 0..6 {
                a[(d, d)] += lambda * jtj[(d, d)].max(1e-9);
            }
            let Some(chol) = a.cholesky() else {
                lambda *= 10.0;
                continue;
            };
            let delta = chol.solve(&(-g));
            let (rc, tc) = perturb(&rot, &t, &delta);
            match residuals(&rc, &tc, &obj, &img, camera) {
                Some(rn) if rn.norm_squared() < cost => {
                    rot = rc;
                    t = tc;
                    r = rn;
                    cost = r.norm_squared();
                    lambda = (lambda * 0.3).max(1e-9);
                    step_norm = delta.norm();
                    improved = true;
                    break;
                }
                _ => lambda *= 10.0,
            }
        }

        if !improved || step_norm < 1e-12 {
            break;
        }
    }

    if t.z <= 0.0 {
        return Err(PnpError::BehindCamera);
    }

    Ok(PnpSolution {
        rotation: UnitQuaternion::from_rotation_matrix(&rot),
        translation: t,
        reprojection_error: mean_corner_error(&r),
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use scandium_core::{CameraIntrinsics, RadialTangentialDistortion};

    fn camera() -> CameraModel {
        CameraModel::pinhole(CameraIntrinsics::nominal(1280, 720))
    }

    fn corners_f32(px: [Point2<f64>; 4]) -> [Point2<f32>; 4] {
        px.map(|p| Point2::new(p.x as f32, p.y as f32))
    }

    #[test]
    fn frontal_marker_at_two_meters() {
        let cam = camera();
        let q = UnitQuaternion::identity();
        let t = Vector3::new(0.0, 0.0, 2.0);
        let px = project_marker(&q, &t, 0.2, &cam).expect("visible");
        let sol = solve_square_pnp(&corners_f32(px), 0.2, &cam, 20).expect("solves");

        assert_abs_diff_eq!(sol.translation.z, 2.0, epsilon = 1e-3);
        assert_abs_diff_eq!(sol.translation.x, 0.0, epsilon = 1e-3);
        assert!(sol.rotation.angle() < 1e-2);
        assert!(sol.reprojection_error < 0.05);
    }

    #[test]
    fn tilted_offset_marker_with_distortion() {
        let cam = CameraModel {
            intrinsics: CameraIntrinsics {
                fx: 900.0,
                fy: 905.0,
                cx: 630.0,
                cy: 370.0,
            },
            distortion: RadialTangentialDistortion::from_coeffs([-0.08, 0.02, 0.0005, 0.0, 0.0]),
        };
        let q = UnitQuaternion::from_euler_angles(0.25, -0.15, 0.6);
        let t = Vector3::new(0.3, -0.2, 3.0);
        let px = project_marker(&q, &t, 0.25, &cam).expect("visible");
        let sol = solve_square_pnp(&corners_f32(px), 0.25, &cam, 20).expect("solves");

        assert_abs_diff_eq!(sol.translation, t, epsilon = 1e-2);
        assert!(sol.rotation.angle_to(&q) < 0.05);
        assert!(sol.reprojection_error < 0.1);
    }

    #[test]
    fn collinear_corners_are_rejected() {
        let corners = [
            Point2::new(100.0_f32, 100.0),
            Point2::new(200.0, 100.0),
            Point2::new(300.0, 100.0),
            Point2::new(400.0, 100.0),
        ];
        assert_eq!(
            solve_square_pnp(&corners, 0.2, &camera(), 20),
            Err(PnpError::Degenerate)
        );
    }

    #[test]
    fn counter_clockwise_corners_are_rejected() {
        let corners = [
            Point2::new(100.0_f32, 100.0),
            Point2::new(100.0, 200.0),
            Point2::new(200.0, 200.0),
            Point2::new(200.0, 100.0),
        ];
        assert_eq!(check_quad(&corners), Err(PnpError::Degenerate));
    }

    #[test]
    fn repeated_corner_is_rejected() {
        let corners = [
            Point2::new(100.0_f32, 100.0),
            Point2::new(200.0, 100.0),
            Point2::new(200.0, 100.0),
            Point2::new(100.0, 200.0),
        ];
        assert_eq!(check_quad(&corners), Err(PnpError::Degenerate));
    }

    #[test]
    fn clockwise_square_reports_area() {
        let corners = [
            Point2::new(0.0_f32, 0.0),
            Point2::new(40.0, 0.0),
            Point2::new(40.0, 40.0),
            Point2::new(0.0, 40.0),
        ];
        assert_abs_diff_eq!(check_quad(&corners).expect("valid"), 1600.0, epsilon = 1e-9);
    }
}
