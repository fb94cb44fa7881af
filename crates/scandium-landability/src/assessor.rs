use crate::roi::RoiPolicy;
use crate::scorer::{HazardClassifier, LandabilityScorer, RoiSample};
use scandium_core::{GrayImage, GrayImageView, LandabilityResult, MarkerFootprint, Timestamp};

/// Per-frame landability: ROI selection, scoring, hazard classification.
///
/// Holds the previous crop for motion differencing and nothing else.
pub struct LandabilityAssessor {
    policy: RoiPolicy,
    scorer: Box<dyn LandabilityScorer>,
    hazards: Option<Box<dyn HazardClassifier>>,
    previous: Option<GrayImage>,
}

impl LandabilityAssessor {
    pub fn new(policy: RoiPolicy, scorer: Box<dyn LandabilityScorer>) -> Self {
        Self {
            policy,
            scorer,
            hazards: None,
            previous: None,
        }
    }

    pub fn with_hazard_classifier(mut self, classifier: Box<dyn HazardClassifier>) -> Self {
        self.hazards = Some(classifier);
        self
    }

    pub fn method_name(&self) -> &'static str {
        self.scorer.method_name()
    }

    pub fn policy(&self) -> &RoiPolicy {
        &self.policy
    }

    /// Score the landing zone in `frame`. Never fails: an unusable ROI gives
    /// the zero-score, flagless result.
    pub fn assess(
        &mut self,
        frame: &GrayImageView<'_>,
        marker: Option<&MarkerFootprint>,
        timestamp: Timestamp,
    ) -> LandabilityResult {
        let Some(rect) = self.policy.select(frame.width, frame.height, marker) else {
            log::debug!("landability ROI outside frame");
            return LandabilityResult::unscorable(timestamp);
        };
        let Some(crop) = frame.crop(rect) else {
            return LandabilityResult::unscorable(timestamp);
        };

        let current = crop.view();
        let previous = self
            .previous
            .as_ref()
            .filter(|p| p.same_shape(&current))
            .map(GrayImage::view);
        let sample = RoiSample {
            current,
            previous,
            rect,
            timestamp,
        };

        let mut result = self.scorer.score(&sample);
        if let Some(classifier) = self.hazards.as_mut() {
            result.flags.extend(classifier.classify(&sample));
        }
        result.roi = Some(rect);
        result.timestamp = timestamp;

        self.previous = Some(crop);
        result
    }

    /// Forget the previous crop and any scorer state.
    pub fn reset(&mut self) {
        self.previous = None;
        self.scorer.reset();
    }
}
