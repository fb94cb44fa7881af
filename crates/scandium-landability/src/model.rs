//! Adapter for a pre-trained landing-zone segmentation model.
//!
//! The model itself lives outside this crate; it only has to report the
//! fraction of the crop it classifies as safe.

use crate::heuristic::HeuristicScorer;
use crate::scorer::{LandabilityScorer, RoiSample};
use scandium_core::{HazardFlag, LandabilityResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A pre-trained segmentation backend.
pub trait SegmentationModel: Send {
    /// Fraction of `roi` classified as safe ground, in `[0, 1]`.
    ///
    /// `None` means the model could not run on this input.
    fn safe_fraction(&mut self, roi: &RoiSample<'_>) -> Option<f64>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelScorerParams {
    /// Safe fraction under which `ml_unsafe_zone` is raised.
    pub score_threshold: f64,
}

impl Default for ModelScorerParams {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
        }
    }
}

/// Scores with a segmentation model, falling back to the heuristic when the
/// model yields nothing.
pub struct ModelScorer<M> {
    model: M,
    params: ModelScorerParams,
    fallback: HeuristicScorer,
    fallback_warned: bool,
}

impl<M: SegmentationModel> ModelScorer<M> {
    pub const METHOD: &'static str = "model";

    pub fn new(model: M, params: ModelScorerParams, fallback: HeuristicScorer) -> Self {
        Self {
            model,
            params,
            fallback,
            fallback_warned: false,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: SegmentationModel> LandabilityScorer for ModelScorer<M> {
    fn method_name(&self) -> &'static str {
        Self::METHOD
    }

    fn score(&mut self, roi: &RoiSample<'_>) -> LandabilityResult {
        if roi.current.is_empty() {
            return LandabilityResult::unscorable(roi.timestamp);
        }
        let Some(fraction) = self.model.safe_fraction(roi).filter(|f| f.is_finite()) else {
            if !self.fallback_warned {
                log::warn!("segmentation model unavailable, scoring with heuristics");
                self.fallback_warned = true;
            }
            return self.fallback.score(roi);
        };
        self.fallback_warned = false;

        let score = fraction.clamp(0.0, 1.0);
        let mut flags = BTreeSet::new();
        if score < self.params.score_threshold {
            flags.insert(HazardFlag::MlUnsafeZone);
        }
        LandabilityResult {
            score,
            flags,
            timestamp: roi.timestamp,
            roi: Some(roi.rect),
            components: None,
        }
    }

    fn reset(&mut self) {
        self.fallback.reset();
    }
}
