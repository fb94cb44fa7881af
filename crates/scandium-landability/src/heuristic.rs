//! Hand-tuned landing-zone scorer.
//!
//! Four cues are mapped to sub-scores in `[0, 1]` and combined as a weighted
//! sum:
//!
//! | cue     | measure                              | weight |
//! |---------|--------------------------------------|--------|
//! | texture | variance of the Laplacian            | 0.30   |
//! | motion  | mean abs difference to previous ROI  | 0.30   |
//! | edge    | Canny edge-pixel density             | 0.20   |
//! | light   | mean intensity                       | 0.20   |
//!
//! A hazard flag is raised for every sub-score under its flag threshold.

use crate::features::{edge_density, frame_difference_ratio, laplacian_variance, mean_intensity};
use crate::scorer::{LandabilityScorer, RoiSample};
use scandium_core::{HazardFlag, LandabilityComponents, LandabilityResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub texture: f64,
    pub motion: f64,
    pub edge: f64,
    pub light: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            texture: 0.30,
            motion: 0.30,
            edge: 0.20,
            light: 0.20,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.texture + self.motion + self.edge + self.light
    }
}

/// Sub-score below which each flag is raised.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagThresholds {
    pub texture: f64,
    pub motion: f64,
    pub edge: f64,
    pub light: f64,
}

impl Default for FlagThresholds {
    fn default() -> Self {
        Self {
            texture: 0.3,
            motion: 0.5,
            edge: 0.5,
            light: 0.3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicParams {
    /// Laplacian variance at which texture scores 1.
    pub texture_var_min: f64,
    /// Frame-difference ratio tolerated before the motion score drops.
    pub motion_threshold: f64,
    /// Edge density tolerated before the edge score drops.
    pub edge_density_max: f64,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Mean intensity at or below which the scene counts as dark.
    pub low_light_threshold: f64,
    /// Mean intensity at which the light score saturates.
    pub adequate_light: f64,
    pub weights: ScoreWeights,
    pub flags: FlagThresholds,
}

impl Default for HeuristicParams {
    fn default() -> Self {
        Self {
            texture_var_min: 12.0,
            motion_threshold: 0.15,
            edge_density_max: 0.3,
            canny_low: 50.0,
            canny_high: 150.0,
            low_light_threshold: 30.0,
            adequate_light: 128.0,
            weights: ScoreWeights::default(),
            flags: FlagThresholds::default(),
        }
    }
}

impl HeuristicParams {
    pub fn texture_score(&self, laplacian_var: f64) -> f64 {
        if self.texture_var_min <= 0.0 {
            return 1.0;
        }
        (laplacian_var / self.texture_var_min).clamp(0.0, 1.0)
    }

    /// `None` (no previous frame) scores as still.
    pub fn motion_score(&self, diff_ratio: Option<f64>) -> f64 {
        match diff_ratio {
            Some(r) if r > self.motion_threshold => (1.0 - 5.0 * (r - self.motion_threshold)).max(0.0),
            _ => 1.0,
        }
    }

    pub fn edge_score(&self, density: f64) -> f64 {
        if density <= self.edge_density_max {
            1.0
        } else {
            (1.0 - 3.0 * (density - self.edge_density_max)).max(0.0)
        }
    }

    /// `mean / low` in the dark band, `mean / adequate` above it.
    pub fn light_score(&self, mean: f64) -> f64 {
        if mean >= self.low_light_threshold {
            return (mean / self.adequate_light.max(1e-9)).min(1.0);
        }
        (mean / self.low_light_threshold.max(1e-9)).max(0.0)
    }

    pub fn combine(&self, c: &LandabilityComponents) -> f64 {
        let w = &self.weights;
        let s = w.texture * c.texture + w.motion * c.motion + w.edge * c.edge + w.light * c.light;
        if s.is_finite() {
            s.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn flags_for(&self, c: &LandabilityComponents) -> BTreeSet<HazardFlag> {
        let t = &self.flags;
        let mut out = BTreeSet::new();
        if c.texture < t.texture {
            out.insert(HazardFlag::InsufficientTexture);
        }
        if c.motion < t.motion {
            out.insert(HazardFlag::HighMotion);
        }
        if c.edge < t.edge {
            out.insert(HazardFlag::HighEdgeDensity);
        }
        if c.light < t.light {
            out.insert(HazardFlag::LowLight);
        }
        out
    }
}

/// Stateless heuristic scorer; the previous crop comes in with the sample.
#[derive(Clone, Debug, Default)]
pub struct HeuristicScorer {
    params: HeuristicParams,
}

impl HeuristicScorer {
    pub const METHOD: &'static str = "heuristic";

    pub fn new(params: HeuristicParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &HeuristicParams {
        &self.params
    }

    pub fn components(&self, roi: &RoiSample<'_>) -> LandabilityComponents {
        let p = &self.params;
        let diff = roi
            .previous
            .as_ref()
            .and_then(|prev| frame_difference_ratio(&roi.current, prev));
        LandabilityComponents {
            texture: p.texture_score(laplacian_variance(&roi.current)),
            motion: p.motion_score(diff),
            edge: p.edge_score(edge_density(&roi.current, p.canny_low, p.canny_high)),
            light: p.light_score(mean_intensity(&roi.current)),
        }
    }
}

impl LandabilityScorer for HeuristicScorer {
    fn method_name(&self) -> &'static str {
        Self::METHOD
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, roi), fields(w = roi.rect.width, h = roi.rect.height))
    )]
    fn score(&mut self, roi: &RoiSample<'_>) -> LandabilityResult {
        if roi.current.is_empty() {
            return LandabilityResult::unscorable(roi.timestamp);
        }
        let components = self.components(roi);
        let score = self.params.combine(&components);
        let flags = self.params.flags_for(&components);
        log::trace!(
            "landability {:.3} (texture {:.2} motion {:.2} edge {:.2} light {:.2})",
            score,
            components.texture,
            components.motion,
            components.edge,
            components.light
        );
        LandabilityResult {
            score,
            flags,
            timestamp: roi.timestamp,
            roi: Some(roi.rect),
            components: Some(components),
        }
    }
}
