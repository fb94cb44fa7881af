//! Synthetic scenes and a closed-loop simulation.
//!
//! Nothing here touches a camera or a serial port: frames are generated,
//! detections come from projecting the configured marker through the
//! configured camera, and the autopilot is a [`MemoryTransport`] fed with
//! heartbeats on a schedule.

use crate::config::{ConfigError, LandingConfig};
use crate::pipeline::{LandingPipeline, TickInput, TickReport};
use nalgebra::{UnitQuaternion, Vector3};
use scandium_control::{Commands, FsmStateKind};
use scandium_core::{
    CameraModel, Clock, Detection, Frame, GrayImage, HazardFlag, LandabilityResult, ManualClock,
    Timestamp,
};
use scandium_landability::{LandabilityScorer, RoiSample};
use scandium_mavlink::mavlink::common::MavMessage;
use scandium_mavlink::mavlink::MavHeader;
use scandium_mavlink::{
    decode_frame, encode_frame, heartbeat_message, HeartbeatTask, LandingTargetMessage,
    LinkMonitor, MavEndpoint, MemoryTransport,
};
use scandium_pose::{project_marker, Extrinsics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Renders frames and marker detections for a configured camera.
#[derive(Clone, Debug)]
pub struct ScenarioGenerator {
    camera: CameraModel,
    extrinsics: Extrinsics,
    marker_size_m: f64,
    width: usize,
    height: usize,
    ground: GrayImage,
}

impl ScenarioGenerator {
    pub fn new(cfg: &LandingConfig) -> Self {
        let extrinsics = cfg.extrinsics.build().unwrap_or_else(|e| {
            log::warn!("simulation falls back to default extrinsics: {}", e);
            Extrinsics::default()
        });
        let (width, height) = (cfg.camera.width, cfg.camera.height);
        Self {
            camera: cfg.camera.model(),
            extrinsics,
            marker_size_m: cfg.fiducials.marker_size_m,
            width,
            height,
            ground: ground_texture(width, height),
        }
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// A frame with fine, low-contrast ground texture.
    ///
    /// The texture depends only on the pixel position, so consecutive frames
    /// show no motion.
    pub fn frame(&self, timestamp: Timestamp, seq: u64) -> Frame {
        Frame::new(self.ground.clone(), timestamp, seq)
    }

    /// Detection of a marker at body-frame offset `(x, y)` and `altitude`
    /// below the vehicle, lying parallel to the image plane.
    ///
    /// `None` when any corner falls outside the image.
    pub fn detection(&self, tag_id: u32, x: f64, y: f64, altitude: f64) -> Option<Detection> {
        let cam = self.extrinsics.point_to_camera(&Vector3::new(x, y, altitude));
        let pts = project_marker(&UnitQuaternion::identity(), &cam, self.marker_size_m, &self.camera)?;
        let (w, h) = (self.width as f64, self.height as f64);
        if pts.iter().any(|p| p.x < 0.0 || p.y < 0.0 || p.x >= w || p.y >= h) {
            return None;
        }
        Some(Detection::new(tag_id, pts.map(|p| p.cast::<f32>())))
    }
}

fn ground_texture(width: usize, height: usize) -> GrayImage {
    let mut img = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let h = (x as u32).wrapping_mul(73_856_093) ^ (y as u32).wrapping_mul(19_349_663);
            img.set(x, y, 118 + (h % 11) as u8);
        }
    }
    img
}

/// Landability scorer returning a scripted result.
///
/// Score and flags can be changed mid-run through a [`ScriptHandle`].
pub struct ScriptedScorer {
    script: Arc<Mutex<Script>>,
}

#[derive(Clone, Debug, Default)]
struct Script {
    score: f64,
    flags: BTreeSet<HazardFlag>,
}

/// Shared control over a [`ScriptedScorer`].
#[derive(Clone, Debug)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedScorer {
    pub fn new(score: f64) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                score,
                flags: BTreeSet::new(),
            })),
        }
    }

    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle {
            script: Arc::clone(&self.script),
        }
    }
}

impl ScriptHandle {
    pub fn set_score(&self, score: f64) {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).score = score;
    }

    pub fn set_flags(&self, flags: impl IntoIterator<Item = HazardFlag>) {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).flags = flags.into_iter().collect();
    }
}

impl LandabilityScorer for ScriptedScorer {
    fn method_name(&self) -> &'static str {
        "scripted"
    }

    fn score(&mut self, roi: &RoiSample<'_>) -> LandabilityResult {
        let script = self.script.lock().unwrap_or_else(PoisonError::into_inner).clone();
        LandabilityResult {
            score: script.score.clamp(0.0, 1.0),
            flags: script.flags,
            timestamp: roi.timestamp,
            roi: Some(roi.rect),
            components: None,
        }
    }
}

/// Vehicle track relative to a marker: hover, center, then descend.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescentProfile {
    pub start_altitude_m: f64,
    /// Initial marker offset in the body frame, meters.
    pub offset_m: [f64; 2],
    /// Time spent closing the horizontal offset before descending.
    pub hover_s: f64,
    pub descent_rate_mps: f64,
    pub floor_m: f64,
}

impl Default for DescentProfile {
    fn default() -> Self {
        Self {
            start_altitude_m: 2.0,
            offset_m: [0.0, 0.0],
            hover_s: 3.0,
            descent_rate_mps: 0.5,
            floor_m: 0.3,
        }
    }
}

impl DescentProfile {
    /// Marker position in the body frame `t_s` seconds into the run.
    pub fn marker_position(&self, t_s: f64) -> Vector3<f64> {
        let t = t_s.max(0.0);
        let closing = if self.hover_s > 0.0 {
            (1.0 - t / self.hover_s).max(0.0)
        } else {
            0.0
        };
        let descending = (t - self.hover_s).max(0.0);
        let altitude = (self.start_altitude_m - self.descent_rate_mps * descending).max(self.floor_m);
        Vector3::new(self.offset_m[0] * closing, self.offset_m[1] * closing, altitude)
    }
}

/// Knobs for [`run_simulation`].
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationOptions {
    pub max_ticks: u64,
    pub profile: DescentProfile,
    /// Tag id placed in the scene.
    pub tag_id: u32,
    /// Fixed landability score; `None` runs the configured heuristic scorer.
    pub landability: Option<f64>,
    /// Tick at which the arm command is issued.
    pub arm_at_tick: u64,
    /// Tick after which the autopilot stops sending heartbeats.
    pub link_drop_at_tick: Option<u64>,
    /// Stop once a terminal state is reached.
    pub stop_on_terminal: bool,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            max_ticks: 400,
            profile: DescentProfile::default(),
            tag_id: 1,
            landability: None,
            arm_at_tick: 2,
            link_drop_at_tick: None,
            stop_on_terminal: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateChange {
    pub tick: u64,
    pub from: FsmStateKind,
    pub to: FsmStateKind,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationSummary {
    pub ticks: u64,
    pub final_state: FsmStateKind,
    pub transitions: Vec<StateChange>,
    /// Every LANDING_TARGET written to the link, in order.
    pub published: Vec<LandingTargetMessage>,
    pub heartbeats_sent: usize,
}

impl SimulationSummary {
    /// Tick at which `state` was first entered.
    pub fn entered(&self, state: FsmStateKind) -> Option<u64> {
        self.transitions.iter().find(|c| c.to == state).map(|c| c.tick)
    }
}

/// Autopilot stand-in: injects a 1 Hz HEARTBEAT into a memory link.
pub struct SimAutopilot {
    link: MemoryTransport,
    next: Option<Timestamp>,
    sequence: u8,
    silent: bool,
}

impl SimAutopilot {
    pub const SYSTEM_ID: u8 = 1;
    pub const COMPONENT_ID: u8 = 1;

    pub fn new(link: MemoryTransport) -> Self {
        Self {
            link,
            next: None,
            sequence: 0,
            silent: false,
        }
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    pub fn step(&mut self, now: Timestamp) {
        if self.silent || self.next.is_some_and(|t| now < t) {
            return;
        }
        self.next = Some(now.saturating_add(Duration::from_secs(1)));
        let header = MavHeader {
            system_id: Self::SYSTEM_ID,
            component_id: Self::COMPONENT_ID,
            sequence: self.sequence,
        };
        self.sequence = self.sequence.wrapping_add(1);
        match encode_frame(header, &heartbeat_message()) {
            Ok(frame) => self.link.push_inbound(frame),
            Err(e) => log::warn!("simulated heartbeat not encoded: {}", e),
        }
    }
}

/// Run the whole pipeline against a synthetic scene on a manual clock.
///
/// Heartbeats are exchanged synchronously each tick instead of on a thread,
/// so runs are deterministic.
pub fn run_simulation(
    cfg: &LandingConfig,
    opts: &SimulationOptions,
) -> Result<SimulationSummary, ConfigError> {
    let endpoint = MavEndpoint::new(cfg.mavlink.system_id, cfg.mavlink.component_id);
    let mut pipeline = match opts.landability {
        Some(score) => {
            LandingPipeline::with_scorer(cfg, endpoint.clone(), Box::new(ScriptedScorer::new(score)))?
        }
        None => LandingPipeline::new(cfg, endpoint.clone())?,
    };
    let gen = ScenarioGenerator::new(cfg);
    let clock = ManualClock::new(Timestamp::ZERO);
    let period = cfg.control.tick_period();

    let link = MemoryTransport::new();
    let mut autopilot = SimAutopilot::new(link.clone());
    let monitor = Arc::new(LinkMonitor::new(cfg.mavlink.heartbeat_timeout()));
    let mut heartbeat = HeartbeatTask::new(
        Box::new(link.clone()),
        endpoint,
        Arc::clone(&monitor),
        cfg.mavlink.heartbeat_period(),
    );
    let mut tx = link.clone();

    let mut transitions = Vec::new();
    let mut last: Option<TickReport> = None;
    for tick in 0..opts.max_ticks {
        let now = if tick == 0 { clock.now() } else { clock.advance(period) };
        if opts.link_drop_at_tick.is_some_and(|t| tick >= t) {
            autopilot.set_silent(true);
        }
        autopilot.step(now);
        if let Err(e) = heartbeat.pump(now) {
            log::warn!("simulated heartbeat exchange failed: {}", e);
        }

        let frame = gen.frame(now, tick);
        let p = opts.profile.marker_position(now.as_secs_f64());
        let detections: Vec<Detection> = gen.detection(opts.tag_id, p.x, p.y, p.z).into_iter().collect();
        let input = TickInput {
            now,
            frame: Some(&frame),
            detections: &detections,
            link: monitor.health(now),
            vehicle_yaw: Some(0.0),
            commands: Commands {
                arm: tick == opts.arm_at_tick,
                abort: false,
            },
        };
        let report = pipeline.tick(input, &mut tx);
        if report.fsm.changed {
            transitions.push(StateChange {
                tick,
                from: report.fsm.previous,
                to: report.fsm.state,
                reason: report.fsm.reason.map(str::to_string),
            });
        }
        let terminal = report.state().is_terminal();
        last = Some(report);
        if terminal && opts.stop_on_terminal {
            break;
        }
    }

    let mut published = Vec::new();
    let mut heartbeats_sent = 0;
    for frame in link.sent() {
        match decode_frame(&frame) {
            Ok((_, MavMessage::LANDING_TARGET(data))) => {
                published.extend(LandingTargetMessage::from_mavlink(&data));
            }
            Ok((_, MavMessage::HEARTBEAT(_))) => heartbeats_sent += 1,
            _ => {}
        }
    }

    Ok(SimulationSummary {
        ticks: last.as_ref().map_or(0, |r| r.tick),
        final_state: last.map_or(FsmStateKind::Init, |r| r.state()),
        transitions,
        published,
        heartbeats_sent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_marker_projects_to_frame_center() {
        let gen = ScenarioGenerator::new(&LandingConfig::default());
        let det = gen.detection(1, 0.0, 0.0, 2.0).expect("visible");
        let fp = det.footprint();
        assert!((fp.center.x - 640.0).abs() < 1e-3);
        assert!((fp.center.y - 360.0).abs() < 1e-3);
        // f = 1280 px, 0.2 m at 2 m
        assert!((fp.side_px - 128.0).abs() < 0.5);
    }

    #[test]
    fn marker_outside_the_view_is_not_detected() {
        let gen = ScenarioGenerator::new(&LandingConfig::default());
        assert!(gen.detection(1, 5.0, 0.0, 2.0).is_none());
        assert!(gen.detection(1, 0.0, 0.0, -1.0).is_none());
    }

    #[test]
    fn profile_centers_then_descends() {
        let p = DescentProfile {
            offset_m: [0.4, -0.2],
            ..DescentProfile::default()
        };
        assert_eq!(p.marker_position(0.0), Vector3::new(0.4, -0.2, 2.0));
        let centered = p.marker_position(3.0);
        assert_eq!((centered.x, centered.y, centered.z), (0.0, 0.0, 2.0));
        assert!((p.marker_position(5.0).z - 1.0).abs() < 1e-12);
        assert_eq!(p.marker_position(100.0).z, 0.3);
    }

    #[test]
    fn scripted_score_changes_through_handle() {
        let scorer = ScriptedScorer::new(0.9);
        let handle = scorer.handle();
        handle.set_score(0.1);
        handle.set_flags([HazardFlag::HumanPresent]);
        let script = scorer.script.lock().expect("lock").clone();
        assert_eq!(script.score, 0.1);
        assert!(script.flags.contains(&HazardFlag::HumanPresent));
    }

    #[test]
    fn autopilot_beats_once_per_second_until_silenced() {
        let link = MemoryTransport::new();
        let mut ap = SimAutopilot::new(link.clone());
        let mut peer = link.clone();
        let mut buf = [0u8; 512];
        let mut count = 0;
        for i in 0..30u64 {
            if i == 20 {
                ap.set_silent(true);
            }
            ap.step(Timestamp(i * 100_000));
            while let Ok(Some(_)) = scandium_mavlink::Transport::recv(&mut peer, &mut buf) {
                count += 1;
            }
        }
        assert_eq!(count, 2);
    }
}
