use scandium_core::{GrayImageView, HazardFlag, LandabilityResult, PixelRect, Timestamp};
use std::collections::BTreeSet;

/// One landing-zone crop handed to a scorer.
#[derive(Clone, Copy, Debug)]
pub struct RoiSample<'a> {
    /// Current crop.
    pub current: GrayImageView<'a>,
    /// Previous crop of the same shape, if any.
    pub previous: Option<GrayImageView<'a>>,
    /// Where `current` sits in the full frame.
    pub rect: PixelRect,
    /// Capture time of the frame `current` was cut from.
    pub timestamp: Timestamp,
}

/// Scores a landing-zone crop in `[0, 1]`.
///
/// Implementations must never fail the tick: anything they cannot evaluate
/// maps to [`LandabilityResult::unscorable`].
pub trait LandabilityScorer: Send {
    /// Short identifier logged and reported with each result.
    fn method_name(&self) -> &'static str;

    fn score(&mut self, roi: &RoiSample<'_>) -> LandabilityResult;

    /// Drop any state carried between frames.
    fn reset(&mut self) {}
}

/// Optional detector of people and vehicles in the landing zone.
///
/// The flags it returns are merged into the scorer's result.
pub trait HazardClassifier: Send {
    fn classify(&mut self, roi: &RoiSample<'_>) -> BTreeSet<HazardFlag>;
}
