//! Autopilot parameter profiles for precision landing.
//!
//! These are the values the flight controller needs so that it consumes
//! LANDING_TARGET the way this pipeline produces it. They are printed, not
//! uploaded.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Longest parameter id MAVLink can carry.
pub const MAX_PARAM_ID_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Autopilot {
    Ardupilot,
    Px4,
}

impl Autopilot {
    pub fn profile(self) -> ParameterProfile {
        match self {
            Autopilot::Ardupilot => ardupilot_precland(),
            Autopilot::Px4 => px4_precland(),
        }
    }
}

impl FromStr for Autopilot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ardupilot" | "apm" | "arducopter" => Ok(Autopilot::Ardupilot),
            "px4" => Ok(Autopilot::Px4),
            other => Err(format!("unknown autopilot '{other}' (expected ardupilot or px4)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Parameter {
    pub name: &'static str,
    pub value: f64,
    pub note: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParameterProfile {
    pub name: &'static str,
    pub autopilot: Autopilot,
    pub parameters: Vec<Parameter>,
}

impl ParameterProfile {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.parameters.iter().find(|p| p.name == name).map(|p| p.value)
    }

    /// Values as sent in PARAM_SET, which carries `f32`.
    pub fn param_set_values(&self) -> Vec<(&'static str, f32)> {
        self.parameters.iter().map(|p| (p.name, p.value as f32)).collect()
    }
}

/// Mission Planner / QGroundControl `NAME,VALUE` listing.
impl fmt::Display for ParameterProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# {}", self.name)?;
        for p in &self.parameters {
            writeln!(f, "{},{}", p.name, p.value)?;
        }
        Ok(())
    }
}

fn param(name: &'static str, value: f64, note: &'static str) -> Parameter {
    Parameter { name, value, note }
}

pub fn ardupilot_precland() -> ParameterProfile {
    ParameterProfile {
        name: "ardupilot_precland",
        autopilot: Autopilot::Ardupilot,
        parameters: vec![
            param("PLND_ENABLED", 1.0, "enable precision landing"),
            param("PLND_TYPE", 1.0, "companion computer (MAVLink LANDING_TARGET)"),
            param("PLND_EST_TYPE", 0.0, "raw sensor, no EKF"),
            param("PLND_LAG", 0.02, "sensor lag, s"),
            param("PLND_XY_DIST_MAX", 4.0, "max horizontal offset to keep descending, m"),
            param("PLND_STRICT", 1.0, "do not land when the target is lost"),
            param("PLND_TIMEOUT", 4.0, "target lost timeout, s"),
            param("PLND_RET_MAX", 4.0, "max retries"),
            param("PLND_OPTIONS", 0.0, "none"),
            param("LAND_SPEED", 40.0, "final descent speed, cm/s"),
            param("LAND_SPEED_HIGH", 100.0, "descent speed above LAND_ALT_LOW, cm/s"),
        ],
    }
}

pub fn px4_precland() -> ParameterProfile {
    ParameterProfile {
        name: "px4_precland",
        autopilot: Autopilot::Px4,
        parameters: vec![
            param("PLD_BTOUT", 5.0, "beacon timeout, s"),
            param("PLD_HACC_RAD", 0.25, "horizontal acceptance radius, m"),
            param("PLD_FAPPR_ALT", 10.0, "final approach altitude, m"),
            param("PLD_SRCH_ALT", 15.0, "search altitude, m"),
            param("PLD_SRCH_TOUT", 10.0, "search timeout, s"),
            param("RTL_LAND_DELAY", 0.0, "land immediately after RTL"),
            param("MPC_LAND_SPEED", 0.7, "landing descent speed, m/s"),
            param("MPC_LAND_ALT1", 10.0, "slow-down altitude 1, m"),
            param("MPC_LAND_ALT2", 5.0, "slow-down altitude 2, m"),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ardupilot_reads_companion_targets() {
        let p = Autopilot::Ardupilot.profile();
        assert_eq!(p.get("PLND_ENABLED"), Some(1.0));
        assert_eq!(p.get("PLND_TYPE"), Some(1.0));
        assert_eq!(p.get("LAND_SPEED"), Some(40.0));
    }

    #[test]
    fn names_fit_param_id() {
        for a in [Autopilot::Ardupilot, Autopilot::Px4] {
            for p in a.profile().parameters {
                assert!(p.name.len() <= MAX_PARAM_ID_LEN, "{}", p.name);
            }
        }
    }

    #[test]
    fn listing_is_name_comma_value() {
        let text = px4_precland().to_string();
        assert!(text.starts_with("# px4_precland\n"));
        assert!(text.contains("PLD_HACC_RAD,0.25\n"));
    }

    #[test]
    fn parses_autopilot_names() {
        assert_eq!("PX4".parse::<Autopilot>(), Ok(Autopilot::Px4));
        assert_eq!("ArduPilot".parse::<Autopilot>(), Ok(Autopilot::Ardupilot));
        assert!("betaflight".parse::<Autopilot>().is_err());
    }
}
