//! Watchdogs and limit checks run every tick next to the state machine.

use scandium_core::{FilteredPose, HazardFlag, LandabilityResult, LinkHealth, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyLimits {
    /// Silence on the frame source after which perception counts as failed.
    pub perception_timeout_s: f64,
    /// Landability score under which a violation is reported.
    pub critical_landability: f64,
    /// Advisory bound on the target's horizontal rate, m/s.
    pub max_lateral_speed_mps: f64,
    /// Advisory bound on the closing rate, m/s.
    pub max_descent_speed_mps: f64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            perception_timeout_s: 1.0,
            critical_landability: 0.2,
            max_lateral_speed_mps: 1.5,
            max_descent_speed_mps: 0.7,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum SafetyViolation {
    PerceptionTimeout { silent_s: f64 },
    LinkTimeout,
    HumanDetected,
    CriticalLandability { score: f64 },
    LateralSpeed { speed_mps: f64 },
    DescentSpeed { speed_mps: f64 },
}

impl SafetyViolation {
    pub fn name(&self) -> &'static str {
        match self {
            SafetyViolation::PerceptionTimeout { .. } => "perception_timeout",
            SafetyViolation::LinkTimeout => "link_timeout",
            SafetyViolation::HumanDetected => "human_detected",
            SafetyViolation::CriticalLandability { .. } => "critical_landability",
            SafetyViolation::LateralSpeed { .. } => "lateral_speed_exceeded",
            SafetyViolation::DescentSpeed { .. } => "descent_speed_exceeded",
        }
    }

    /// Violations that warrant leaving the landing attempt.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            SafetyViolation::PerceptionTimeout { .. }
                | SafetyViolation::LinkTimeout
                | SafetyViolation::HumanDetected
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SafetyStatus {
    pub violations: Vec<SafetyViolation>,
}

impl SafetyStatus {
    pub fn is_safe(&self) -> bool {
        self.violations.is_empty()
    }

    /// Perception stopped delivering frames.
    pub fn sensor_fault(&self) -> bool {
        self.violations
            .iter()
            .any(|v| matches!(v, SafetyViolation::PerceptionTimeout { .. }))
    }

    pub fn should_abort(&self) -> bool {
        self.violations.iter().any(SafetyViolation::is_critical)
    }
}

/// Per-tick health checks. Only the perception watchdog keeps state.
#[derive(Clone, Debug, Default)]
pub struct SafetySupervisor {
    limits: SafetyLimits,
    last_frame: Option<Timestamp>,
    active: Vec<&'static str>,
}

impl SafetySupervisor {
    pub fn new(limits: SafetyLimits) -> Self {
        Self {
            limits,
            last_frame: None,
            active: Vec::new(),
        }
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Feed the perception watchdog. The watchdog is armed by the first frame.
    pub fn record_frame(&mut self, timestamp: Timestamp) {
        self.last_frame = Some(self.last_frame.map_or(timestamp, |t| t.max(timestamp)));
    }

    pub fn last_frame(&self) -> Option<Timestamp> {
        self.last_frame
    }

    pub fn check(
        &mut self,
        now: Timestamp,
        link: &LinkHealth,
        pose: &FilteredPose,
        landability: Option<&LandabilityResult>,
    ) -> SafetyStatus {
        let l = &self.limits;
        let mut violations = Vec::new();

        if let Some(last) = self.last_frame {
            let silent_s = now.saturating_since(last).as_secs_f64();
            if silent_s > l.perception_timeout_s {
                violations.push(SafetyViolation::PerceptionTimeout { silent_s });
            }
        }
        if link.lost() {
            violations.push(SafetyViolation::LinkTimeout);
        }
        if let Some(r) = landability {
            if r.flags.contains(&HazardFlag::HumanPresent) {
                violations.push(SafetyViolation::HumanDetected);
            }
            if r.score < l.critical_landability {
                violations.push(SafetyViolation::CriticalLandability { score: r.score });
            }
        }
        if pose.valid {
            let v = &pose.velocity;
            let lateral = v.x.hypot(v.y);
            if lateral > l.max_lateral_speed_mps {
                violations.push(SafetyViolation::LateralSpeed { speed_mps: lateral });
            }
            // target z shrinks while the vehicle descends
            let descent = -v.z;
            if descent > l.max_descent_speed_mps {
                violations.push(SafetyViolation::DescentSpeed { speed_mps: descent });
            }
        }

        let names: Vec<&'static str> = violations.iter().map(SafetyViolation::name).collect();
        for v in &violations {
            if !self.active.contains(&v.name()) {
                log::warn!("safety violation: {:?}", v);
            }
        }
        for gone in self.active.iter().filter(|n| !names.contains(*n)) {
            log::info!("safety violation cleared: {}", gone);
        }
        self.active = names;

        SafetyStatus { violations }
    }

    pub fn reset(&mut self) {
        self.last_frame = None;
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use std::collections::BTreeSet;

    fn secs(s: f64) -> Timestamp {
        Timestamp::from_secs_f64(s)
    }

    fn healthy_link() -> LinkHealth {
        LinkHealth {
            last_inbound: Some(secs(0.0)),
            last_outbound: None,
            connected: true,
        }
    }

    #[test]
    fn perception_watchdog_arms_on_first_frame() {
        let mut s = SafetySupervisor::default();
        let pose = FilteredPose::empty();
        assert!(s.check(secs(10.0), &healthy_link(), &pose, None).is_safe());

        s.record_frame(secs(10.0));
        assert!(s.check(secs(10.9), &healthy_link(), &pose, None).is_safe());
        let st = s.check(secs(11.2), &healthy_link(), &pose, None);
        assert!(st.sensor_fault());
        assert!(st.should_abort());

        s.record_frame(secs(11.2));
        assert!(!s.check(secs(11.3), &healthy_link(), &pose, None).sensor_fault());
    }

    #[test]
    fn link_and_human_are_critical() {
        let mut s = SafetySupervisor::default();
        let pose = FilteredPose::empty();
        let lost = LinkHealth {
            connected: false,
            ..healthy_link()
        };
        let st = s.check(secs(1.0), &lost, &pose, None);
        assert_eq!(st.violations, vec![SafetyViolation::LinkTimeout]);

        let r = LandabilityResult {
            score: 0.1,
            flags: BTreeSet::from([HazardFlag::HumanPresent]),
            timestamp: secs(1.0),
            roi: None,
            components: None,
        };
        let st = s.check(secs(1.0), &healthy_link(), &pose, Some(&r));
        assert!(st.violations.contains(&SafetyViolation::HumanDetected));
        assert!(st.violations.contains(&SafetyViolation::CriticalLandability { score: 0.1 }));
        assert!(st.should_abort());
    }

    #[test]
    fn speed_limits_are_advisory() {
        let mut s = SafetySupervisor::default();
        let mut pose = FilteredPose::empty();
        pose.valid = true;
        pose.velocity = Vector3::new(2.0, 0.0, -1.0);
        let st = s.check(secs(0.0), &healthy_link(), &pose, None);
        let names: Vec<_> = st.violations.iter().map(SafetyViolation::name).collect();
        assert_eq!(names, vec!["lateral_speed_exceeded", "descent_speed_exceeded"]);
        assert!(!st.should_abort());
    }
}
