//! Landing state machine.
//!
//! The machine is a single owned [`FsmState`] value advanced by the pure
//! [`transition`] function. Every tick the caller passes in the pose, the
//! landability result and the link snapshot; the function returns the next
//! state plus the publish instruction. [`LandingFsm`] wraps it with logging
//! and the external reset hooks.
//!
//! Rules are evaluated in priority order, safety before progress:
//!
//! 1. any state but `FAILSAFE`/`TOUCHDOWN` -> `FAILSAFE` on link loss or
//!    sensor fault
//! 2. `SEARCH`..`DESCEND` -> `ABORT` on external abort
//! 3. `ACQUIRE`/`ALIGN` -> `ABORT` on a critical flag or low landability
//! 4. `DESCEND` -> `ABORT` on a critical flag (score only if configured)
//! 5. progress: `INIT` -> `IDLE` -> `SEARCH` -> `ACQUIRE` -> `ALIGN` ->
//!    `DESCEND` -> `TOUCHDOWN`, with target loss beyond the grace period
//!    falling back to `SEARCH`
//!
//! At most one transition happens per tick.

use scandium_core::{FilteredPose, HazardFlag, LandabilityResult, LinkHealth, Severity, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsmParams {
    /// Minimum filtered confidence for a tick to count toward acquisition.
    pub acquire_confidence: f64,
    /// Consecutive qualifying ticks required in `SEARCH`.
    pub acquire_ticks: u32,
    /// Track variance (m^2) under which `ACQUIRE` advances to `ALIGN`.
    pub stable_variance: f64,
    /// Horizontal error (m) under which `ALIGN` advances to `DESCEND`.
    pub align_error_m: f64,
    /// Landability score under which `ACQUIRE`/`ALIGN` abort.
    pub abort_landability: f64,
    /// Optional score gate during `DESCEND`. `None` keeps descent committed
    /// unless a critical flag is raised.
    pub descend_abort_landability: Option<f64>,
    /// Altitude proxy (target z, m) under which `DESCEND` ends.
    pub touchdown_altitude_m: f64,
    /// How long the target may stay lost before falling back to `SEARCH`.
    pub loss_grace_s: f64,
    /// Treat a missing landability result as score 0.
    pub require_landability: bool,
}

impl Default for FsmParams {
    fn default() -> Self {
        Self {
            acquire_confidence: 0.70,
            acquire_ticks: 5,
            stable_variance: 0.05,
            align_error_m: 0.25,
            abort_landability: 0.40,
            descend_abort_landability: None,
            touchdown_altitude_m: 0.5,
            loss_grace_s: 2.0,
            require_landability: true,
        }
    }
}

/// State name without the per-state data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FsmStateKind {
    Init,
    Idle,
    Search,
    Acquire,
    Align,
    Descend,
    Touchdown,
    Abort,
    Failsafe,
}

impl FsmStateKind {
    pub const ALL: [FsmStateKind; 9] = [
        FsmStateKind::Init,
        FsmStateKind::Idle,
        FsmStateKind::Search,
        FsmStateKind::Acquire,
        FsmStateKind::Align,
        FsmStateKind::Descend,
        FsmStateKind::Touchdown,
        FsmStateKind::Abort,
        FsmStateKind::Failsafe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FsmStateKind::Init => "INIT",
            FsmStateKind::Idle => "IDLE",
            FsmStateKind::Search => "SEARCH",
            FsmStateKind::Acquire => "ACQUIRE",
            FsmStateKind::Align => "ALIGN",
            FsmStateKind::Descend => "DESCEND",
            FsmStateKind::Touchdown => "TOUCHDOWN",
            FsmStateKind::Abort => "ABORT",
            FsmStateKind::Failsafe => "FAILSAFE",
        }
    }

    /// States in which the filtered pose is published.
    pub fn is_tracking(self) -> bool {
        matches!(
            self,
            FsmStateKind::Acquire | FsmStateKind::Align | FsmStateKind::Descend
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FsmStateKind::Touchdown | FsmStateKind::Abort | FsmStateKind::Failsafe
        )
    }

    /// Guidance gain scale for downstream consumers.
    pub fn confidence_gain(self) -> f64 {
        match self {
            FsmStateKind::Search => 0.5,
            FsmStateKind::Acquire => 0.7,
            _ => 1.0,
        }
    }
}

impl fmt::Display for FsmStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    ExternalCommand,
    LowLandability { score: f64 },
    MissingLandability,
    CriticalHazard { flag: HazardFlag },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::ExternalCommand => f.write_str("external abort command"),
            AbortReason::LowLandability { score } => write!(f, "landability {score:.2} too low"),
            AbortReason::MissingLandability => f.write_str("no landability result"),
            AbortReason::CriticalHazard { flag } => write!(f, "critical hazard {flag}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailsafeReason {
    LinkLost,
    SensorFault,
}

impl fmt::Display for FailsafeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailsafeReason::LinkLost => "autopilot link lost",
            FailsafeReason::SensorFault => "sensor fault",
        })
    }
}

/// Landing state with the data each state carries between ticks.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FsmState {
    #[default]
    Init,
    Idle,
    Search {
        /// Consecutive qualifying ticks so far.
        streak: u32,
    },
    Acquire {
        lost_since: Option<Timestamp>,
    },
    Align {
        lost_since: Option<Timestamp>,
    },
    Descend {
        lost_since: Option<Timestamp>,
    },
    Touchdown,
    Abort {
        reason: AbortReason,
    },
    Failsafe {
        reason: FailsafeReason,
    },
}

impl FsmState {
    pub fn kind(&self) -> FsmStateKind {
        match self {
            FsmState::Init => FsmStateKind::Init,
            FsmState::Idle => FsmStateKind::Idle,
            FsmState::Search { .. } => FsmStateKind::Search,
            FsmState::Acquire { .. } => FsmStateKind::Acquire,
            FsmState::Align { .. } => FsmStateKind::Align,
            FsmState::Descend { .. } => FsmStateKind::Descend,
            FsmState::Touchdown => FsmStateKind::Touchdown,
            FsmState::Abort { .. } => FsmStateKind::Abort,
            FsmState::Failsafe { .. } => FsmStateKind::Failsafe,
        }
    }
}

/// Operator commands latched for one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commands {
    pub arm: bool,
    pub abort: bool,
}

/// Everything the machine looks at in one tick.
#[derive(Clone, Copy, Debug)]
pub struct TickInputs<'a> {
    pub now: Timestamp,
    pub pose: &'a FilteredPose,
    pub landability: Option<&'a LandabilityResult>,
    pub link: LinkHealth,
    pub camera_ready: bool,
    pub sensor_fault: bool,
    pub commands: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    PublishPose,
    PublishNothing,
}

/// Result of one [`transition`].
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub next: FsmState,
    pub instruction: Instruction,
    /// The track must be dropped before the next tick (entry into `SEARCH`).
    pub reset_track: bool,
    /// Short rule name when the state kind changed.
    pub reason: Option<&'static str>,
}

enum TargetTrack {
    Present,
    Missing(Timestamp),
    Lost,
}

fn target_track(lost_since: Option<Timestamp>, inp: &TickInputs<'_>, p: &FsmParams) -> TargetTrack {
    if inp.pose.valid {
        return TargetTrack::Present;
    }
    let since = lost_since.unwrap_or(inp.now);
    if inp.now.saturating_since(since).as_secs_f64() > p.loss_grace_s {
        TargetTrack::Lost
    } else {
        TargetTrack::Missing(since)
    }
}

fn landability_abort(
    result: Option<&LandabilityResult>,
    threshold: Option<f64>,
    missing_is_zero: bool,
) -> Option<AbortReason> {
    let Some(r) = result else {
        return (missing_is_zero && threshold.is_some()).then_some(AbortReason::MissingLandability);
    };
    if let Some(&flag) = r.flags.iter().find(|f| f.severity() == Severity::Critical) {
        return Some(AbortReason::CriticalHazard { flag });
    }
    match threshold {
        Some(t) if !(r.score >= t) => Some(AbortReason::LowLandability { score: r.score }),
        _ => None,
    }
}

fn decide(state: &FsmState, inp: &TickInputs<'_>, p: &FsmParams) -> (FsmState, Option<&'static str>) {
    use FsmStateKind as K;
    let kind = state.kind();

    if !matches!(kind, K::Failsafe | K::Touchdown) {
        if inp.link.lost() {
            return (
                FsmState::Failsafe {
                    reason: FailsafeReason::LinkLost,
                },
                Some("link_lost"),
            );
        }
        if inp.sensor_fault {
            return (
                FsmState::Failsafe {
                    reason: FailsafeReason::SensorFault,
                },
                Some("sensor_fault"),
            );
        }
    }

    if inp.commands.abort && matches!(kind, K::Search | K::Acquire | K::Align | K::Descend) {
        return (
            FsmState::Abort {
                reason: AbortReason::ExternalCommand,
            },
            Some("external_abort"),
        );
    }

    let hazard = match kind {
        K::Acquire | K::Align => landability_abort(
            inp.landability,
            Some(p.abort_landability),
            p.require_landability,
        ),
        K::Descend => landability_abort(inp.landability, p.descend_abort_landability, false),
        _ => None,
    };
    if let Some(reason) = hazard {
        let rule = match reason {
            AbortReason::CriticalHazard { .. } => "critical_hazard",
            _ => "low_landability",
        };
        return (FsmState::Abort { reason }, Some(rule));
    }

    match state {
        FsmState::Init => {
            if inp.camera_ready && inp.link.connected {
                return (FsmState::Idle, Some("links_ready"));
            }
        }
        FsmState::Idle => {
            if inp.commands.arm {
                return (FsmState::Search { streak: 0 }, Some("armed"));
            }
        }
        FsmState::Search { streak } => {
            let qualifies = inp.pose.valid && inp.pose.confidence >= p.acquire_confidence;
            if !qualifies {
                return (FsmState::Search { streak: 0 }, None);
            }
            let streak = streak.saturating_add(1);
            if streak >= p.acquire_ticks.max(1) {
                return (FsmState::Acquire { lost_since: None }, Some("target_acquired"));
            }
            return (FsmState::Search { streak }, None);
        }
        FsmState::Acquire { lost_since } => {
            return match target_track(*lost_since, inp, p) {
                TargetTrack::Lost => (FsmState::Search { streak: 0 }, Some("target_lost")),
                TargetTrack::Missing(since) => (
                    FsmState::Acquire {
                        lost_since: Some(since),
                    },
                    None,
                ),
                TargetTrack::Present if inp.pose.variance < p.stable_variance => {
                    (FsmState::Align { lost_since: None }, Some("pose_stable"))
                }
                TargetTrack::Present => (FsmState::Acquire { lost_since: None }, None),
            };
        }
        FsmState::Align { lost_since } => {
            return match target_track(*lost_since, inp, p) {
                TargetTrack::Lost => (FsmState::Search { streak: 0 }, Some("target_lost")),
                TargetTrack::Missing(since) => (
                    FsmState::Align {
                        lost_since: Some(since),
                    },
                    None,
                ),
                TargetTrack::Present if inp.pose.horizontal_error() < p.align_error_m => {
                    (FsmState::Descend { lost_since: None }, Some("aligned"))
                }
                TargetTrack::Present => (FsmState::Align { lost_since: None }, None),
            };
        }
        FsmState::Descend { lost_since } => {
            return match target_track(*lost_since, inp, p) {
                TargetTrack::Lost => (FsmState::Search { streak: 0 }, Some("target_lost")),
                TargetTrack::Missing(since) => (
                    FsmState::Descend {
                        lost_since: Some(since),
                    },
                    None,
                ),
                TargetTrack::Present if inp.pose.altitude() < p.touchdown_altitude_m => {
                    (FsmState::Touchdown, Some("touchdown"))
                }
                TargetTrack::Present => (FsmState::Descend { lost_since: None }, None),
            };
        }
        FsmState::Touchdown | FsmState::Abort { .. } | FsmState::Failsafe { .. } => {}
    }
    (state.clone(), None)
}

/// Advance the machine by one tick. Pure: same inputs, same step.
pub fn transition(state: &FsmState, inputs: &TickInputs<'_>, params: &FsmParams) -> Step {
    let (next, reason) = decide(state, inputs, params);
    let from = state.kind();
    let to = next.kind();
    Step {
        instruction: if to.is_tracking() {
            Instruction::PublishPose
        } else {
            Instruction::PublishNothing
        },
        reset_track: to == FsmStateKind::Search && from != FsmStateKind::Search,
        reason: if from != to { reason } else { None },
        next,
    }
}

/// Per-tick summary of the machine's decision.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FsmOutput {
    pub state: FsmStateKind,
    pub previous: FsmStateKind,
    pub instruction: Instruction,
    pub reset_track: bool,
    pub changed: bool,
    pub confidence_gain: f64,
    pub reason: Option<&'static str>,
}

impl FsmOutput {
    pub fn publish(&self) -> bool {
        self.instruction == Instruction::PublishPose
    }
}

/// Owns the current [`FsmState`] and logs every transition.
#[derive(Clone, Debug)]
pub struct LandingFsm {
    params: FsmParams,
    state: FsmState,
}

impl LandingFsm {
    pub fn new(params: FsmParams) -> Self {
        Self {
            params,
            state: FsmState::Init,
        }
    }

    pub fn params(&self) -> &FsmParams {
        &self.params
    }

    pub fn state(&self) -> &FsmState {
        &self.state
    }

    pub fn kind(&self) -> FsmStateKind {
        self.state.kind()
    }

    pub fn step(&mut self, inputs: &TickInputs<'_>) -> FsmOutput {
        let previous = self.state.kind();
        let step = transition(&self.state, inputs, &self.params);
        let state = step.next.kind();
        let changed = state != previous;
        if changed {
            self.log_transition(previous, &step.next, step.reason.unwrap_or("-"));
        }
        self.state = step.next;
        FsmOutput {
            state,
            previous,
            instruction: step.instruction,
            reset_track: step.reset_track,
            changed,
            confidence_gain: state.confidence_gain(),
            reason: step.reason,
        }
    }

    fn log_transition(&self, from: FsmStateKind, to: &FsmState, rule: &str) {
        match to {
            FsmState::Abort { reason } => log::warn!("fsm {} -> ABORT ({}: {})", from, rule, reason),
            FsmState::Failsafe { reason } => {
                log::warn!("fsm {} -> FAILSAFE ({}: {})", from, rule, reason)
            }
            _ => log::info!("fsm {} -> {} ({})", from, to.kind(), rule),
        }
    }

    /// External reset of any state, terminal ones included, back to `INIT`.
    pub fn reset(&mut self) {
        log::info!("fsm {} -> INIT (reset)", self.state.kind());
        self.state = FsmState::Init;
    }

    /// Leave `ABORT` for `IDLE` so a new attempt can be armed. No effect in
    /// any other state.
    pub fn reinitialize(&mut self) -> bool {
        if let FsmState::Abort { .. } = self.state {
            log::info!("fsm ABORT -> IDLE (reinitialize)");
            self.state = FsmState::Idle;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use std::collections::BTreeSet;

    fn pose(valid: bool, x: f64, z: f64, variance: f64) -> FilteredPose {
        let mut p = FilteredPose::empty();
        p.valid = valid;
        p.translation = Vector3::new(x, 0.0, z);
        p.variance = variance;
        p.confidence = if valid { 1.0 } else { 0.0 };
        p.tag_id = Some(1);
        p
    }

    fn land(score: f64, flags: &[HazardFlag]) -> LandabilityResult {
        LandabilityResult {
            score,
            flags: flags.iter().copied().collect::<BTreeSet<_>>(),
            timestamp: Timestamp(0),
            roi: None,
            components: None,
        }
    }

    fn link_up() -> LinkHealth {
        LinkHealth {
            last_inbound: Some(Timestamp(0)),
            last_outbound: None,
            connected: true,
        }
    }

    fn link_lost() -> LinkHealth {
        LinkHealth {
            connected: false,
            ..link_up()
        }
    }

    fn inputs<'a>(now_ms: u64, pose: &'a FilteredPose, land: Option<&'a LandabilityResult>) -> TickInputs<'a> {
        TickInputs {
            now: Timestamp(now_ms * 1000),
            pose,
            landability: land,
            link: link_up(),
            camera_ready: true,
            sensor_fault: false,
            commands: Commands::default(),
        }
    }

    fn in_state(kind: FsmStateKind) -> FsmState {
        match kind {
            FsmStateKind::Init => FsmState::Init,
            FsmStateKind::Idle => FsmState::Idle,
            FsmStateKind::Search => FsmState::Search { streak: 0 },
            FsmStateKind::Acquire => FsmState::Acquire { lost_since: None },
            FsmStateKind::Align => FsmState::Align { lost_since: None },
            FsmStateKind::Descend => FsmState::Descend { lost_since: None },
            FsmStateKind::Touchdown => FsmState::Touchdown,
            FsmStateKind::Abort => FsmState::Abort {
                reason: AbortReason::ExternalCommand,
            },
            FsmStateKind::Failsafe => FsmState::Failsafe {
                reason: FailsafeReason::SensorFault,
            },
        }
    }

    #[test]
    fn init_waits_for_camera_and_link() {
        let p = FsmParams::default();
        let pz = pose(false, 0.0, 0.0, 1.0);
        let mut inp = inputs(0, &pz, None);
        inp.link = LinkHealth::default();
        assert_eq!(transition(&FsmState::Init, &inp, &p).next, FsmState::Init);
        inp.link = link_up();
        inp.camera_ready = false;
        assert_eq!(transition(&FsmState::Init, &inp, &p).next, FsmState::Init);
        inp.camera_ready = true;
        assert_eq!(transition(&FsmState::Init, &inp, &p).next, FsmState::Idle);
    }

    #[test]
    fn sustained_good_stream_progresses_without_skipping() {
        let mut fsm = LandingFsm::new(FsmParams::default());
        let ok = land(0.8, &[]);
        let high = pose(true, 0.1, 2.0, 0.01);
        let low = pose(true, 0.1, 0.3, 0.01);

        let mut seen = vec![fsm.kind()];
        let mut arm = Commands {
            arm: true,
            abort: false,
        };
        for t in 0..40u64 {
            let p = if fsm.kind() == FsmStateKind::Descend { &low } else { &high };
            let mut inp = inputs(t * 50, p, Some(&ok));
            inp.commands = arm;
            let out = fsm.step(&inp);
            if out.changed {
                seen.push(out.state);
            }
            if fsm.kind() == FsmStateKind::Idle {
                continue;
            }
            arm = Commands::default();
        }
        assert_eq!(
            seen,
            vec![
                FsmStateKind::Init,
                FsmStateKind::Idle,
                FsmStateKind::Search,
                FsmStateKind::Acquire,
                FsmStateKind::Align,
                FsmStateKind::Descend,
                FsmStateKind::Touchdown,
            ]
        );
    }

    #[test]
    fn acquisition_needs_consecutive_confident_ticks() {
        let p = FsmParams::default();
        let good = pose(true, 0.0, 2.0, 0.5);
        let mut weak = good.clone();
        weak.confidence = 0.5;

        let mut s = FsmState::Search { streak: 0 };
        for _ in 0..4 {
            s = transition(&s, &inputs(0, &good, None), &p).next;
        }
        assert_eq!(s, FsmState::Search { streak: 4 });
        s = transition(&s, &inputs(0, &weak, None), &p).next;
        assert_eq!(s, FsmState::Search { streak: 0 });
        for _ in 0..5 {
            s = transition(&s, &inputs(0, &good, None), &p).next;
        }
        assert_eq!(s.kind(), FsmStateKind::Acquire);
    }

    #[test]
    fn critical_flag_aborts_every_tracking_state() {
        let p = FsmParams::default();
        let human = land(0.95, &[HazardFlag::HumanPresent]);
        for pose in [pose(true, 0.0, 2.0, 0.01), pose(false, 0.0, 2.0, 1.0)] {
            for kind in [FsmStateKind::Acquire, FsmStateKind::Align, FsmStateKind::Descend] {
                let step = transition(&in_state(kind), &inputs(0, &pose, Some(&human)), &p);
                assert_eq!(step.next.kind(), FsmStateKind::Abort, "from {kind}");
                assert_eq!(step.instruction, Instruction::PublishNothing);
            }
        }
    }

    #[test]
    fn low_landability_aborts_align_but_not_descend() {
        let p = FsmParams::default();
        let bad = land(0.1, &[]);
        let pz = pose(true, 0.5, 2.0, 0.01);
        let step = transition(&in_state(FsmStateKind::Align), &inputs(0, &pz, Some(&bad)), &p);
        assert_eq!(
            step.next,
            FsmState::Abort {
                reason: AbortReason::LowLandability { score: 0.1 }
            }
        );
        let step = transition(&in_state(FsmStateKind::Descend), &inputs(0, &pz, Some(&bad)), &p);
        assert_eq!(step.next.kind(), FsmStateKind::Descend);

        let strict = FsmParams {
            descend_abort_landability: Some(0.3),
            ..FsmParams::default()
        };
        let step = transition(&in_state(FsmStateKind::Descend), &inputs(0, &pz, Some(&bad)), &strict);
        assert_eq!(step.next.kind(), FsmStateKind::Abort);
    }

    #[test]
    fn missing_landability_counts_as_zero() {
        let pz = pose(true, 0.5, 2.0, 0.5);
        let step = transition(
            &in_state(FsmStateKind::Acquire),
            &inputs(0, &pz, None),
            &FsmParams::default(),
        );
        assert_eq!(
            step.next,
            FsmState::Abort {
                reason: AbortReason::MissingLandability
            }
        );
        let lenient = FsmParams {
            require_landability: false,
            ..FsmParams::default()
        };
        let step = transition(&in_state(FsmStateKind::Acquire), &inputs(0, &pz, None), &lenient);
        assert_eq!(step.next.kind(), FsmStateKind::Acquire);
    }

    #[test]
    fn link_loss_forces_failsafe_from_non_terminal_states() {
        let p = FsmParams::default();
        let pz = pose(true, 0.0, 2.0, 0.01);
        let ok = land(0.9, &[]);
        for kind in FsmStateKind::ALL {
            let mut inp = inputs(0, &pz, Some(&ok));
            inp.link = link_lost();
            let next = transition(&in_state(kind), &inp, &p).next.kind();
            match kind {
                FsmStateKind::Touchdown | FsmStateKind::Failsafe => assert_eq!(next, kind),
                _ => assert_eq!(next, FsmStateKind::Failsafe, "from {kind}"),
            }
        }
    }

    #[test]
    fn never_established_link_is_not_a_failsafe() {
        let pz = pose(false, 0.0, 0.0, 1.0);
        let mut inp = inputs(0, &pz, None);
        inp.link = LinkHealth::default();
        let step = transition(&FsmState::Init, &inp, &FsmParams::default());
        assert_eq!(step.next, FsmState::Init);
    }

    #[test]
    fn sensor_fault_and_external_abort() {
        let p = FsmParams::default();
        let pz = pose(true, 0.0, 2.0, 0.01);
        let ok = land(0.9, &[]);
        let mut inp = inputs(0, &pz, Some(&ok));
        inp.sensor_fault = true;
        assert_eq!(
            transition(&in_state(FsmStateKind::Align), &inp, &p).next,
            FsmState::Failsafe {
                reason: FailsafeReason::SensorFault
            }
        );

        let mut inp = inputs(0, &pz, Some(&ok));
        inp.commands.abort = true;
        assert_eq!(
            transition(&in_state(FsmStateKind::Search), &inp, &p).next.kind(),
            FsmStateKind::Abort
        );
        assert_eq!(transition(&FsmState::Idle, &inp, &p).next, FsmState::Idle);
    }

    #[test]
    fn target_loss_uses_grace_period() {
        let p = FsmParams::default();
        let ok = land(0.9, &[]);
        let gone = pose(false, 0.0, 2.0, 1.0);
        let s0 = in_state(FsmStateKind::Align);

        let s1 = transition(&s0, &inputs(1000, &gone, Some(&ok)), &p);
        assert_eq!(
            s1.next,
            FsmState::Align {
                lost_since: Some(Timestamp(1_000_000))
            }
        );
        assert_eq!(s1.instruction, Instruction::PublishPose);

        let s2 = transition(&s1.next, &inputs(2900, &gone, Some(&ok)), &p);
        assert_eq!(s2.next.kind(), FsmStateKind::Align);

        let s3 = transition(&s2.next, &inputs(3100, &gone, Some(&ok)), &p);
        assert_eq!(s3.next, FsmState::Search { streak: 0 });
        assert!(s3.reset_track);
        assert_eq!(s3.reason, Some("target_lost"));
    }

    #[test]
    fn reacquired_target_clears_loss_timer() {
        let p = FsmParams::default();
        let ok = land(0.9, &[]);
        let gone = pose(false, 0.0, 2.0, 1.0);
        let back = pose(true, 1.0, 2.0, 1.0);
        let s = transition(&in_state(FsmStateKind::Acquire), &inputs(0, &gone, Some(&ok)), &p).next;
        let s = transition(&s, &inputs(1500, &back, Some(&ok)), &p).next;
        assert_eq!(s, FsmState::Acquire { lost_since: None });
        let s = transition(&s, &inputs(3000, &gone, Some(&ok)), &p).next;
        assert_eq!(s.kind(), FsmStateKind::Acquire);
    }

    #[test]
    fn publish_only_while_tracking() {
        let p = FsmParams::default();
        let pz = pose(true, 2.0, 5.0, 0.5);
        let ok = land(0.9, &[]);
        for kind in FsmStateKind::ALL {
            let step = transition(&in_state(kind), &inputs(0, &pz, Some(&ok)), &p);
            let expect = if step.next.kind().is_tracking() {
                Instruction::PublishPose
            } else {
                Instruction::PublishNothing
            };
            assert_eq!(step.instruction, expect);
        }
    }

    #[test]
    fn terminal_states_are_idempotent() {
        let p = FsmParams::default();
        let pz = pose(true, 0.0, 0.1, 0.01);
        let ok = land(0.9, &[]);
        for kind in [FsmStateKind::Touchdown, FsmStateKind::Abort, FsmStateKind::Failsafe] {
            let s = in_state(kind);
            let mut inp = inputs(0, &pz, Some(&ok));
            inp.commands = Commands {
                arm: true,
                abort: true,
            };
            assert_eq!(transition(&s, &inp, &p).next, s);
        }
    }

    #[test]
    fn reset_hooks() {
        let mut fsm = LandingFsm::new(FsmParams::default());
        assert!(!fsm.reinitialize());
        fsm.state = in_state(FsmStateKind::Abort);
        assert!(fsm.reinitialize());
        assert_eq!(fsm.kind(), FsmStateKind::Idle);
        fsm.state = in_state(FsmStateKind::Failsafe);
        fsm.reset();
        assert_eq!(fsm.kind(), FsmStateKind::Init);
    }

    #[test]
    fn confidence_gain_by_state() {
        assert_eq!(FsmStateKind::Search.confidence_gain(), 0.5);
        assert_eq!(FsmStateKind::Acquire.confidence_gain(), 0.7);
        assert_eq!(FsmStateKind::Descend.confidence_gain(), 1.0);
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_string(&FsmState::Search { streak: 2 }).expect("serialize");
        assert_eq!(json, r#"{"state":"SEARCH","streak":2}"#);
    }
}
