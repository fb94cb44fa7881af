//! One synchronous landing tick.
//!
//! Order within a tick is fixed: detections -> pose gates -> frame transform
//! -> filter -> landability -> safety -> state machine -> publish, with the
//! guidance setpoint computed last. Every stage sees the outputs of the
//! stages before it from this same tick.

use crate::config::{ConfigError, LandabilityBackend, LandingConfig};
use scandium_control::{
    Commands, FsmOutput, FsmStateKind, GuidanceController, LandingFsm, SafetyStatus,
    SafetySupervisor, Setpoint, TickInputs,
};
use scandium_core::{
    Detection, FilteredPose, Frame, LandabilityResult, LinkHealth, PoseRejection, Timestamp,
};
use scandium_landability::{
    HeuristicScorer, LandabilityAssessor, LandabilityScorer, ModelScorer, SegmentationModel,
};
use scandium_mavlink::{MavEndpoint, PublishOutcome, TargetPublisher, Transport};
use scandium_pose::{FilterEvent, FrameTransform, PoseEstimator, TemporalFilter};
use serde::Serialize;

/// Everything the loop hands the pipeline for one tick.
#[derive(Clone, Copy, Debug)]
pub struct TickInput<'a> {
    pub now: Timestamp,
    /// `None` when no new frame arrived since the last tick.
    pub frame: Option<&'a Frame>,
    /// Detections found in `frame`.
    pub detections: &'a [Detection],
    pub link: LinkHealth,
    /// Vehicle heading, rad, for `LOCAL_NED` output.
    pub vehicle_yaw: Option<f64>,
    pub commands: Commands,
}

impl<'a> TickInput<'a> {
    /// A tick with no frame and no commands.
    pub fn idle(now: Timestamp, link: LinkHealth) -> Self {
        Self {
            now,
            frame: None,
            detections: &[],
            link,
            vehicle_yaw: None,
            commands: Commands::default(),
        }
    }
}

/// Serializable per-tick telemetry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub now: Timestamp,
    pub frame_seq: Option<u64>,
    pub fsm: FsmOutput,
    pub filter: FilterEvent,
    pub pose: FilteredPose,
    pub rejections: Vec<PoseRejection>,
    pub landability: Option<LandabilityResult>,
    pub safety: SafetyStatus,
    /// `None` when the state machine asked for no output.
    pub publish: Option<PublishOutcome>,
    /// Advisory velocity setpoint; `None` while holding.
    pub setpoint: Option<Setpoint>,
}

impl TickReport {
    pub fn state(&self) -> FsmStateKind {
        self.fsm.state
    }
}

pub struct LandingPipeline {
    estimator: PoseEstimator,
    transform: FrameTransform,
    filter: TemporalFilter,
    assessor: Option<LandabilityAssessor>,
    safety: SafetySupervisor,
    fsm: LandingFsm,
    guidance: GuidanceController,
    publisher: TargetPublisher,
    landability: Option<LandabilityResult>,
    camera_ready: bool,
    ticks: u64,
}

impl LandingPipeline {
    /// Build from a validated config with the heuristic scorer.
    ///
    /// Fails with [`ConfigError::ModelRequired`] when the config selects the
    /// model backend; use [`LandingPipeline::with_model`] for that.
    pub fn new(cfg: &LandingConfig, endpoint: MavEndpoint) -> Result<Self, ConfigError> {
        if cfg.landability.method == LandabilityBackend::Model {
            return Err(ConfigError::ModelRequired);
        }
        let scorer = Box::new(HeuristicScorer::new(cfg.landability.heuristic.clone()));
        Self::with_scorer(cfg, endpoint, scorer)
    }

    /// Build with a segmentation model, falling back to heuristics when the
    /// model produces nothing.
    pub fn with_model<M: SegmentationModel + 'static>(
        cfg: &LandingConfig,
        endpoint: MavEndpoint,
        model: M,
    ) -> Result<Self, ConfigError> {
        let fallback = HeuristicScorer::new(cfg.landability.heuristic.clone());
        let scorer = Box::new(ModelScorer::new(model, cfg.landability.model.clone(), fallback));
        Self::with_scorer(cfg, endpoint, scorer)
    }

    /// Build with any scorer. Ignores `landability.method`.
    pub fn with_scorer(
        cfg: &LandingConfig,
        endpoint: MavEndpoint,
        scorer: Box<dyn LandabilityScorer>,
    ) -> Result<Self, ConfigError> {
        let extrinsics = cfg.extrinsics.build()?;
        let mut fsm_params = cfg.control.fsm.clone();
        let assessor = if cfg.landability.enabled {
            Some(LandabilityAssessor::new(cfg.landability.roi.clone(), scorer))
        } else {
            log::warn!("landability scoring disabled, descent is gated on pose only");
            fsm_params.require_landability = false;
            None
        };

        Ok(Self {
            estimator: PoseEstimator::new(cfg.estimator_params(), cfg.camera.model()),
            transform: FrameTransform::new(extrinsics, cfg.pose.frame),
            filter: TemporalFilter::new(cfg.pose.filter.clone()),
            assessor,
            safety: SafetySupervisor::new(cfg.control.safety.clone()),
            fsm: LandingFsm::new(fsm_params),
            guidance: GuidanceController::new(cfg.control.guidance.clone()),
            publisher: TargetPublisher::new(endpoint, cfg.publisher_settings()),
            landability: None,
            camera_ready: false,
            ticks: 0,
        })
    }

    pub fn fsm(&self) -> &LandingFsm {
        &self.fsm
    }

    pub fn state(&self) -> FsmStateKind {
        self.fsm.kind()
    }

    pub fn filtered_pose(&self) -> &FilteredPose {
        self.filter.pose()
    }

    pub fn publisher(&self) -> &TargetPublisher {
        &self.publisher
    }

    pub fn latest_landability(&self) -> Option<&LandabilityResult> {
        self.landability.as_ref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Leave `ABORT` for `IDLE`.
    pub fn reinitialize(&mut self) -> bool {
        let left = self.fsm.reinitialize();
        if left {
            self.clear_track();
        }
        left
    }

    /// External reset of any state back to `INIT`, watchdogs included.
    pub fn reset(&mut self) {
        self.fsm.reset();
        self.safety.reset();
        self.clear_track();
        self.camera_ready = false;
    }

    fn clear_track(&mut self) {
        self.filter.reset();
        if let Some(a) = self.assessor.as_mut() {
            a.reset();
        }
        self.landability = None;
        self.publisher.reset_rate();
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(tick = self.ticks, now = input.now.as_micros()))
    )]
    pub fn tick(&mut self, input: TickInput<'_>, transport: &mut dyn Transport) -> TickReport {
        self.ticks += 1;
        let now = input.now;

        let mut rejections = Vec::new();
        let mut best = None;
        if let Some(frame) = input.frame {
            self.camera_ready = true;
            self.safety.record_frame(frame.timestamp);
            let (chosen, all) = self.estimator.estimate_all(input.detections, frame.timestamp);
            rejections.extend(all.into_iter().filter_map(|p| p.rejection));
            best = chosen;
        }

        let observation = best
            .as_ref()
            .and_then(|raw| self.transform.apply(raw, input.vehicle_yaw));
        let filter_event = self.filter.update(observation.as_ref());

        if let (Some(frame), Some(assessor)) = (input.frame, self.assessor.as_mut()) {
            let marker = best.as_ref().map(|raw| raw.footprint);
            self.landability = Some(assessor.assess(&frame.view(), marker.as_ref(), frame.timestamp));
        }

        let safety = self
            .safety
            .check(now, &input.link, self.filter.pose(), self.landability.as_ref());

        let fsm = self.fsm.step(&TickInputs {
            now,
            pose: self.filter.pose(),
            landability: self.landability.as_ref(),
            link: input.link,
            camera_ready: self.camera_ready,
            sensor_fault: safety.sensor_fault(),
            commands: input.commands,
        });
        if fsm.reset_track {
            self.clear_track();
        }

        let publish = if fsm.publish() {
            Some(self.publisher.publish(self.filter.pose(), now, transport))
        } else {
            None
        };
        let setpoint = self.guidance.update(&fsm, self.filter.pose(), now);

        TickReport {
            tick: self.ticks,
            now,
            frame_seq: input.frame.map(|f| f.seq),
            fsm,
            filter: filter_event,
            pose: self.filter.pose().clone(),
            rejections,
            landability: self.landability.clone(),
            safety,
            publish,
            setpoint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ScriptedScorer, ScenarioGenerator};
    use scandium_mavlink::MemoryTransport;

    fn link_up(now: Timestamp) -> LinkHealth {
        LinkHealth {
            last_inbound: Some(now),
            last_outbound: None,
            connected: true,
        }
    }

    fn pipeline(score: f64) -> LandingPipeline {
        LandingPipeline::with_scorer(
            &LandingConfig::default(),
            MavEndpoint::default(),
            Box::new(ScriptedScorer::new(score)),
        )
        .expect("pipeline")
    }

    #[test]
    fn model_backend_needs_a_model() {
        let mut cfg = LandingConfig::default();
        cfg.landability.method = LandabilityBackend::Model;
        assert!(matches!(
            LandingPipeline::new(&cfg, MavEndpoint::default()),
            Err(ConfigError::ModelRequired)
        ));
    }

    #[test]
    fn waits_in_init_until_camera_and_link() {
        let mut p = pipeline(0.8);
        let mut link = MemoryTransport::new();
        let r = p.tick(TickInput::idle(Timestamp(0), link_up(Timestamp(0))), &mut link);
        assert_eq!(r.state(), FsmStateKind::Init);

        let gen = ScenarioGenerator::new(&LandingConfig::default());
        let frame = gen.frame(Timestamp(50_000), 1);
        let input = TickInput {
            frame: Some(&frame),
            ..TickInput::idle(Timestamp(50_000), LinkHealth::default())
        };
        assert_eq!(p.tick(input, &mut link).state(), FsmStateKind::Init);

        let input = TickInput {
            frame: Some(&frame),
            ..TickInput::idle(Timestamp(100_000), link_up(Timestamp(100_000)))
        };
        assert_eq!(p.tick(input, &mut link).state(), FsmStateKind::Idle);
        assert!(link.sent().is_empty());
    }

    #[test]
    fn rejected_detections_are_reported() {
        let cfg = LandingConfig::default();
        let mut p = pipeline(0.8);
        let mut link = MemoryTransport::new();
        let gen = ScenarioGenerator::new(&cfg);
        let frame = gen.frame(Timestamp(0), 0);
        let det = gen.detection(2, 0.0, 0.0, 2.0).expect("visible");
        let input = TickInput {
            frame: Some(&frame),
            detections: std::slice::from_ref(&det),
            ..TickInput::idle(Timestamp(0), link_up(Timestamp(0)))
        };
        let r = p.tick(input, &mut link);
        assert_eq!(r.rejections, vec![PoseRejection::NotAllowlisted { tag_id: 2 }]);
        assert_eq!(r.filter, FilterEvent::Idle);
        assert!(!r.pose.valid);
    }

    #[test]
    fn setpoint_follows_the_tracked_target() {
        let cfg = LandingConfig::default();
        let mut p = pipeline(0.8);
        let mut link = MemoryTransport::new();
        let gen = ScenarioGenerator::new(&cfg);
        let det = gen.detection(1, 0.4, 0.0, 2.0).expect("visible");

        let mut seen_search = false;
        let mut tracked = None;
        for i in 0..40u64 {
            let now = Timestamp(i * 50_000);
            let frame = gen.frame(now, i);
            let input = TickInput {
                frame: Some(&frame),
                detections: std::slice::from_ref(&det),
                commands: Commands { arm: i > 0, abort: false },
                ..TickInput::idle(now, link_up(now))
            };
            let r = p.tick(input, &mut link);
            match r.state() {
                FsmStateKind::Init | FsmStateKind::Idle => assert_eq!(r.setpoint, None),
                FsmStateKind::Search => {
                    seen_search = true;
                    assert!(r.setpoint.is_some());
                }
                s if s.is_tracking() => {
                    tracked = r.setpoint.map(|sp| (sp, r.pose.translation));
                    break;
                }
                _ => {}
            }
        }
        assert!(seen_search);
        let (sp, t) = tracked.expect("target tracked");
        assert!(sp.lateral_speed() > 0.0);
        assert!(sp.vx * t.x + sp.vy * t.y > 0.0);
    }
}
