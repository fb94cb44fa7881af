//! Frame transform and temporal filtering for marker-based landing.
//!
//! - [`PoseEstimator`]: detection -> camera-frame [`RawPose`] with the
//!   allowlist, size and reprojection gates.
//! - [`FrameTransform`]: camera frame -> configured target frame.
//! - [`TemporalFilter`]: observation stream -> [`FilteredPose`].
//!
//! [`RawPose`]: scandium_core::RawPose
//! [`FilteredPose`]: scandium_core::FilteredPose

mod estimator;
mod filter;
mod frames;
mod pnp;

pub use estimator::{PoseEstimator, PoseEstimatorParams};
pub use filter::{FilterEvent, FilterKind, FilterParams, TemporalFilter};
pub use frames::{Extrinsics, FrameError, FrameTransform, MountPreset};
pub use pnp::{
    check_quad, marker_object_points, project_marker, solve_square_pnp, PnpError, PnpSolution,
};
