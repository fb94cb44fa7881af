use crate::{PixelRect, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// Named hazard raised alongside the numeric landability score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardFlag {
    InsufficientTexture,
    HighMotion,
    HighEdgeDensity,
    LowLight,
    MlUnsafeZone,
    HumanPresent,
    VehiclePresent,
}

impl HazardFlag {
    pub fn severity(self) -> Severity {
        match self {
            HazardFlag::HumanPresent | HazardFlag::VehiclePresent => Severity::Critical,
            _ => Severity::Warning,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HazardFlag::InsufficientTexture => "insufficient_texture",
            HazardFlag::HighMotion => "high_motion",
            HazardFlag::HighEdgeDensity => "high_edge_density",
            HazardFlag::LowLight => "low_light",
            HazardFlag::MlUnsafeZone => "ml_unsafe_zone",
            HazardFlag::HumanPresent => "human_present",
            HazardFlag::VehiclePresent => "vehicle_present",
        }
    }
}

impl fmt::Display for HazardFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-cue sub-scores, each in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandabilityComponents {
    pub texture: f64,
    pub motion: f64,
    pub edge: f64,
    pub light: f64,
}

/// Safety assessment of the landing zone for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandabilityResult {
    /// Overall score in `[0, 1]`; higher is safer.
    pub score: f64,
    pub flags: BTreeSet<HazardFlag>,
    pub timestamp: Timestamp,
    /// Region the score was computed on, `None` when no ROI was usable.
    pub roi: Option<PixelRect>,
    pub components: Option<LandabilityComponents>,
}

impl LandabilityResult {
    /// Fail-conservative result: score 0, no flags.
    pub fn unscorable(timestamp: Timestamp) -> Self {
        Self {
            score: 0.0,
            flags: BTreeSet::new(),
            timestamp,
            roi: None,
            components: None,
        }
    }

    pub fn has_critical(&self) -> bool {
        self.flags
            .iter()
            .any(|f| f.severity() == Severity::Critical)
    }
}
