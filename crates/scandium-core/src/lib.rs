//! Core types and utilities for vision-based precision landing.
//!
//! This crate holds the data model shared by every stage of the landing
//! loop (frames, detections, poses, landability results, link health), the
//! monotonic clock, and the small amount of geometry the stages share
//! (camera model, 4-point homography). It does not depend on any concrete
//! detector, scorer or transport.

mod camera;
mod detection;
mod homography;
mod image;
mod landability;
mod link;
mod logger;
mod pose;
mod time;

pub use camera::{CameraIntrinsics, CameraModel, RadialTangentialDistortion};
pub use detection::{Detection, Frame, MarkerDetector, MarkerFootprint};
pub use homography::{homography_from_4pt, Homography};
pub use image::{GrayImage, GrayImageView, PixelRect};
pub use landability::{HazardFlag, LandabilityComponents, LandabilityResult, Severity};
pub use link::LinkHealth;
pub use pose::{FilteredPose, PoseRejection, RawPose, TargetFrame, TargetObservation};
pub use time::{Clock, ManualClock, MonotonicClock, Timestamp};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::parse_level;
