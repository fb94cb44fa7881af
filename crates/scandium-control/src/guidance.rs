//! Velocity setpoints for the terminal approach.
//!
//! Setpoints are advisory: the autopilot flies from `LANDING_TARGET`, and
//! these values are reported alongside each tick for offboard consumers and
//! telemetry. They are expressed in the output frame of the filtered pose
//! (x forward, y right, z down for the body frames).

use crate::fsm::{FsmOutput, FsmStateKind};
use scandium_core::{FilteredPose, Timestamp};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceParams {
    /// Proportional gain on the horizontal offset, 1/s.
    pub lateral_gain: f64,
    /// Descent rate once aligned, m/s.
    pub descent_rate_mps: f64,
    /// Horizontal offset (m) above which descent slows down.
    pub alignment_threshold_m: f64,
    /// Fraction of `descent_rate_mps` kept while misaligned.
    pub misaligned_descent_scale: f64,
    /// Final radius of the search spiral, m.
    pub search_radius_m: f64,
    /// Time for one revolution of the search spiral, s.
    pub search_period_s: f64,
    pub max_lateral_speed_mps: f64,
    pub max_descent_speed_mps: f64,
}

impl Default for GuidanceParams {
    fn default() -> Self {
        Self {
            lateral_gain: 0.5,
            descent_rate_mps: 0.3,
            alignment_threshold_m: 0.1,
            misaligned_descent_scale: 0.3,
            search_radius_m: 2.0,
            search_period_s: 10.0,
            max_lateral_speed_mps: 1.5,
            max_descent_speed_mps: 0.7,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Setpoint {
    pub vx: f64,
    pub vy: f64,
    /// Positive down.
    pub vz: f64,
    pub yaw_rate: f64,
}

impl Setpoint {
    pub fn lateral_speed(&self) -> f64 {
        self.vx.hypot(self.vy)
    }

    fn clamped(mut self, p: &GuidanceParams) -> Self {
        let lateral = self.lateral_speed();
        if lateral > p.max_lateral_speed_mps && lateral > 0.0 {
            let s = p.max_lateral_speed_mps / lateral;
            self.vx *= s;
            self.vy *= s;
        }
        self.vz = self.vz.clamp(0.0, p.max_descent_speed_mps);
        self
    }
}

/// Proportional approach plus an expanding search spiral.
#[derive(Clone, Debug)]
pub struct GuidanceController {
    params: GuidanceParams,
    search_started: Option<Timestamp>,
}

impl GuidanceController {
    pub fn new(params: GuidanceParams) -> Self {
        Self {
            params,
            search_started: None,
        }
    }

    pub fn params(&self) -> &GuidanceParams {
        &self.params
    }

    /// Setpoint toward the target offset `pose.translation`. Lateral gain
    /// and descent both scale with `gain`; `descend` is false outside the
    /// descent phase, which holds altitude.
    pub fn approach(&self, pose: &FilteredPose, gain: f64, descend: bool) -> Setpoint {
        let p = &self.params;
        let t = pose.translation;
        let k = p.lateral_gain * gain;
        let lateral_error = t.x.hypot(t.y);
        let vz = if !descend {
            0.0
        } else if lateral_error > p.alignment_threshold_m {
            p.descent_rate_mps * p.misaligned_descent_scale
        } else {
            p.descent_rate_mps * gain
        };
        Setpoint {
            vx: k * t.x,
            vy: k * t.y,
            vz,
            yaw_rate: 0.0,
        }
        .clamped(p)
    }

    /// Velocity along an outward spiral, `elapsed_s` into the search.
    pub fn search_pattern(&self, elapsed_s: f64) -> Setpoint {
        let p = &self.params;
        if p.search_period_s <= 0.0 {
            return Setpoint::default();
        }
        let omega = TAU / p.search_period_s;
        let angle = omega * elapsed_s;
        let expansion = (elapsed_s / (2.0 * p.search_period_s)).clamp(0.0, 1.0);
        let r = p.search_radius_m * expansion;
        Setpoint {
            vx: r * angle.cos() * omega,
            vy: r * angle.sin() * omega,
            vz: 0.0,
            yaw_rate: 0.0,
        }
        .clamped(p)
    }

    /// Setpoint for this tick, or `None` where the vehicle should hold
    /// (INIT, IDLE, terminal states, or tracking without a valid pose).
    pub fn update(&mut self, out: &FsmOutput, pose: &FilteredPose, now: Timestamp) -> Option<Setpoint> {
        if out.state != FsmStateKind::Search {
            self.search_started = None;
        }
        match out.state {
            FsmStateKind::Search => {
                let started = *self.search_started.get_or_insert(now);
                let elapsed = now.saturating_since(started).as_secs_f64();
                Some(self.search_pattern(elapsed))
            }
            s if s.is_tracking() && pose.valid => Some(self.approach(
                pose,
                out.confidence_gain,
                s == FsmStateKind::Descend,
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::Instruction;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;

    fn output(state: FsmStateKind) -> FsmOutput {
        FsmOutput {
            state,
            previous: state,
            instruction: if state.is_tracking() {
                Instruction::PublishPose
            } else {
                Instruction::PublishNothing
            },
            reset_track: false,
            changed: false,
            confidence_gain: state.confidence_gain(),
            reason: None,
        }
    }

    fn target(x: f64, y: f64, z: f64) -> FilteredPose {
        let mut p = FilteredPose::empty();
        p.translation = Vector3::new(x, y, z);
        p.valid = true;
        p.confidence = 1.0;
        p
    }

    #[test]
    fn moves_toward_the_target_and_scales_with_gain() {
        let g = GuidanceController::new(GuidanceParams::default());
        let full = g.approach(&target(0.4, -0.2, 2.0), 1.0, false);
        assert_abs_diff_eq!(full.vx, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(full.vy, -0.1, epsilon = 1e-12);
        assert_eq!(full.vz, 0.0);

        let acquire = g.approach(&target(0.4, -0.2, 2.0), 0.7, false);
        assert_abs_diff_eq!(acquire.vx, 0.14, epsilon = 1e-12);
    }

    #[test]
    fn descent_slows_while_misaligned() {
        let g = GuidanceController::new(GuidanceParams::default());
        let aligned = g.approach(&target(0.02, 0.0, 1.5), 1.0, true);
        let off = g.approach(&target(0.5, 0.0, 1.5), 1.0, true);
        assert_abs_diff_eq!(aligned.vz, 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(off.vz, 0.09, epsilon = 1e-12);
    }

    #[test]
    fn lateral_speed_is_clamped() {
        let g = GuidanceController::new(GuidanceParams::default());
        let s = g.approach(&target(30.0, 40.0, 5.0), 1.0, true);
        assert_abs_diff_eq!(s.lateral_speed(), 1.5, epsilon = 1e-9);
        assert!(s.vx > 0.0 && s.vy > 0.0);
    }

    #[test]
    fn spiral_starts_still_and_widens() {
        let g = GuidanceController::new(GuidanceParams::default());
        assert_eq!(g.search_pattern(0.0).lateral_speed(), 0.0);
        let early = g.search_pattern(2.0).lateral_speed();
        let late = g.search_pattern(15.0).lateral_speed();
        assert!(early > 0.0 && late > early);
        // full radius after two periods: 2 m * 2pi / 10 s
        assert_abs_diff_eq!(g.search_pattern(25.0).lateral_speed(), 0.4 * std::f64::consts::PI, epsilon = 1e-9);
    }

    #[test]
    fn update_follows_the_state() {
        let mut g = GuidanceController::new(GuidanceParams::default());
        let pose = target(0.2, 0.0, 2.0);
        assert_eq!(g.update(&output(FsmStateKind::Idle), &pose, Timestamp(0)), None);

        let first = g.update(&output(FsmStateKind::Search), &pose, Timestamp(1_000_000));
        assert_eq!(first.map(|s| s.lateral_speed()), Some(0.0));
        let later = g.update(&output(FsmStateKind::Search), &pose, Timestamp(4_000_000));
        assert!(later.is_some_and(|s| s.lateral_speed() > 0.0));

        let acquire = g.update(&output(FsmStateKind::Acquire), &pose, Timestamp(4_050_000));
        assert!(acquire.is_some_and(|s| s.vz == 0.0 && s.vx > 0.0));
        let descend = g.update(&output(FsmStateKind::Descend), &pose, Timestamp(4_100_000));
        assert!(descend.is_some_and(|s| s.vz > 0.0));

        assert_eq!(g.update(&output(FsmStateKind::Descend), &FilteredPose::empty(), Timestamp(4_150_000)), None);
        assert_eq!(g.update(&output(FsmStateKind::Abort), &pose, Timestamp(4_200_000)), None);
    }
}
