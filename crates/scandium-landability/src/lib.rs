//! Landing-zone safety scoring.
//!
//! A [`LandabilityAssessor`] cuts a region of interest around the marker (or
//! the frame center), hands it to a [`LandabilityScorer`] and merges the flags
//! of an optional [`HazardClassifier`]. Two scorers ship with the crate:
//!
//! - [`HeuristicScorer`]: texture, motion, edge density and lighting cues.
//! - [`ModelScorer`]: wraps an external [`SegmentationModel`].
//!
//! ```
//! use scandium_core::{GrayImage, Timestamp};
//! use scandium_landability::{HeuristicScorer, LandabilityAssessor, RoiPolicy};
//!
//! let frame = GrayImage::filled(320, 240, 140);
//! let mut assessor =
//!     LandabilityAssessor::new(RoiPolicy::default(), Box::new(HeuristicScorer::default()));
//! let result = assessor.assess(&frame.view(), None, Timestamp(0));
//! assert!(result.score <= 1.0);
//! ```

mod assessor;
pub mod features;
mod heuristic;
mod model;
mod roi;
mod scorer;

pub use assessor::LandabilityAssessor;
pub use heuristic::{FlagThresholds, HeuristicParams, HeuristicScorer, ScoreWeights};
pub use model::{ModelScorer, ModelScorerParams, SegmentationModel};
pub use roi::RoiPolicy;
pub use scorer::{HazardClassifier, LandabilityScorer, RoiSample};
