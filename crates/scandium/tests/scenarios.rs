use scandium::config::LandingConfig;
use scandium::control::{AbortReason, FailsafeReason, FsmState};
use scandium::core::{HazardFlag, LinkHealth, Timestamp};
use scandium::mavlink::mavlink::common::MavMessage;
use scandium::mavlink::{decode_frame, MavEndpoint, MemoryTransport, PublishOutcome};
use scandium::pipeline::{LandingPipeline, TickInput, TickReport};
use scandium::sim::{
    run_simulation, DescentProfile, ScenarioGenerator, ScriptHandle, ScriptedScorer,
    SimulationOptions,
};
use scandium::FsmStateKind;
use std::time::Duration;

const PERIOD: Duration = Duration::from_millis(50);

/// Hand-stepped pipeline at 20 Hz with a scripted landability score.
struct Harness {
    pipeline: LandingPipeline,
    gen: ScenarioGenerator,
    link: MemoryTransport,
    script: ScriptHandle,
    now: Timestamp,
    seq: u64,
    marker: Option<(f64, f64, f64)>,
    camera: bool,
}

impl Harness {
    fn new(score: f64) -> Self {
        let cfg = LandingConfig::default();
        let scorer = ScriptedScorer::new(score);
        let script = scorer.handle();
        let pipeline = LandingPipeline::with_scorer(&cfg, MavEndpoint::default(), Box::new(scorer))
            .expect("pipeline");
        Self {
            pipeline,
            gen: ScenarioGenerator::new(&cfg),
            link: MemoryTransport::new(),
            script,
            now: Timestamp::ZERO,
            seq: 0,
            marker: Some((0.0, 0.0, 2.0)),
            camera: true,
        }
    }

    fn step_with(&mut self, arm: bool, link: LinkHealth) -> TickReport {
        self.now = self.now.saturating_add(PERIOD);
        self.seq += 1;
        let frame = self.gen.frame(self.now, self.seq);
        let dets: Vec<_> = self
            .marker
            .and_then(|(x, y, z)| self.gen.detection(1, x, y, z))
            .into_iter()
            .collect();
        let mut input = TickInput::idle(self.now, link);
        if self.camera {
            input.frame = Some(&frame);
            input.detections = &dets;
        }
        input.commands.arm = arm;
        self.pipeline.tick(input, &mut self.link)
    }

    fn step(&mut self, arm: bool) -> TickReport {
        let link = LinkHealth {
            last_inbound: Some(self.now),
            last_outbound: None,
            connected: true,
        };
        self.step_with(arm, link)
    }

    fn run_until(&mut self, state: FsmStateKind, max: usize) -> TickReport {
        for _ in 0..max {
            let r = self.step(false);
            if r.state() == state {
                return r;
            }
        }
        panic!("{:?} not reached in {} ticks", state, max);
    }

    fn landing_targets(&self) -> usize {
        self.link
            .sent()
            .iter()
            .filter(|f| matches!(decode_frame(f), Ok((_, MavMessage::LANDING_TARGET(_)))))
            .count()
    }
}

fn scripted(score: f64) -> SimulationOptions {
    SimulationOptions {
        landability: Some(score),
        ..SimulationOptions::default()
    }
}

#[test]
fn reaches_descend_within_fifty_ticks() {
    let cfg = LandingConfig::default();
    let opts = SimulationOptions {
        max_ticks: 50,
        stop_on_terminal: false,
        ..scripted(0.8)
    };
    let summary = run_simulation(&cfg, &opts).expect("simulate");

    let descend = summary.entered(FsmStateKind::Descend).expect("descend reached");
    assert!(descend < 50, "descend at tick {}", descend);

    let first = summary.published.first().expect("landing target sent");
    assert!(first.position_valid);
    assert!((first.distance - 2.0).abs() < 0.05, "distance {}", first.distance);
    assert!(first.angle_x.abs() < 1e-3 && first.angle_y.abs() < 1e-3);
    assert!(summary.heartbeats_sent >= 2);
}

#[test]
fn heuristic_scorer_accepts_the_synthetic_ground() {
    let cfg = LandingConfig::default();
    let opts = SimulationOptions {
        max_ticks: 50,
        stop_on_terminal: false,
        ..SimulationOptions::default()
    };
    let summary = run_simulation(&cfg, &opts).expect("simulate");
    assert!(summary.entered(FsmStateKind::Descend).is_some(), "{:?}", summary.transitions);
}

#[test]
fn states_progress_in_order_to_touchdown() {
    let cfg = LandingConfig::default();
    let summary = run_simulation(&cfg, &scripted(0.9)).expect("simulate");
    let path: Vec<_> = summary.transitions.iter().map(|c| c.to).collect();
    assert_eq!(
        path,
        vec![
            FsmStateKind::Idle,
            FsmStateKind::Search,
            FsmStateKind::Acquire,
            FsmStateKind::Align,
            FsmStateKind::Descend,
            FsmStateKind::Touchdown,
        ]
    );
    assert_eq!(summary.final_state, FsmStateKind::Touchdown);

    let distances: Vec<f32> = summary.published.iter().map(|m| m.distance).collect();
    assert!(distances.first() > distances.last());
}

#[test]
fn unlisted_tag_never_leaves_search() {
    let cfg = LandingConfig::default();
    let opts = SimulationOptions {
        max_ticks: 100,
        tag_id: 2,
        ..scripted(0.9)
    };
    let summary = run_simulation(&cfg, &opts).expect("simulate");
    assert_eq!(summary.final_state, FsmStateKind::Search);
    assert!(summary.published.is_empty());
}

#[test]
fn heartbeat_loss_enters_failsafe() {
    let cfg = LandingConfig::default();
    let opts = SimulationOptions {
        link_drop_at_tick: Some(30),
        profile: DescentProfile {
            hover_s: 30.0,
            ..DescentProfile::default()
        },
        ..scripted(0.9)
    };
    let summary = run_simulation(&cfg, &opts).expect("simulate");
    assert_eq!(summary.final_state, FsmStateKind::Failsafe);
    // last autopilot beat at tick 20 (1.0 s), timeout 3 s
    let failsafe = summary.entered(FsmStateKind::Failsafe).expect("failsafe");
    assert!((80..=82).contains(&failsafe), "failsafe at tick {}", failsafe);
}

#[test]
fn low_landability_in_align_aborts_and_silences_output() {
    let mut h = Harness::new(0.9);
    // off-center enough to hold in ALIGN
    h.marker = Some((0.0, 0.4, 2.0));
    h.step(false);
    h.step(true);
    h.run_until(FsmStateKind::Align, 60);
    let sent = h.landing_targets();
    assert!(sent > 0);

    h.script.set_score(0.1);
    let r = h.step(false);
    assert_eq!(r.state(), FsmStateKind::Abort);
    assert_eq!(r.publish, None);
    assert!(matches!(
        h.pipeline.fsm().state(),
        FsmState::Abort {
            reason: AbortReason::LowLandability { .. }
        }
    ));

    h.script.set_score(0.9);
    for _ in 0..20 {
        assert_eq!(h.step(false).state(), FsmStateKind::Abort);
    }
    assert_eq!(h.landing_targets(), sent);
}

#[test]
fn person_in_zone_aborts_from_acquire() {
    let mut h = Harness::new(0.9);
    h.step(false);
    h.step(true);
    h.run_until(FsmStateKind::Acquire, 20);

    h.script.set_flags([HazardFlag::HumanPresent]);
    let r = h.step(false);
    assert_eq!(r.state(), FsmStateKind::Abort);
    assert!(matches!(
        h.pipeline.fsm().state(),
        FsmState::Abort {
            reason: AbortReason::CriticalHazard {
                flag: HazardFlag::HumanPresent
            }
        }
    ));
}

#[test]
fn abort_recovers_to_idle_on_reinitialize() {
    let mut h = Harness::new(0.9);
    h.step(false);
    h.step(true);
    h.run_until(FsmStateKind::Acquire, 20);
    h.script.set_score(0.0);
    assert_eq!(h.step(false).state(), FsmStateKind::Abort);

    assert!(h.pipeline.reinitialize());
    assert_eq!(h.pipeline.state(), FsmStateKind::Idle);
    assert!(!h.pipeline.filtered_pose().valid);
}

#[test]
fn camera_silence_enters_failsafe() {
    let mut h = Harness::new(0.9);
    h.step(false);
    h.step(true);
    h.run_until(FsmStateKind::Acquire, 20);

    h.camera = false;
    // perception watchdog is 1 s
    let mut reached = None;
    for i in 0..40 {
        if h.step(false).state() == FsmStateKind::Failsafe {
            reached = Some(i);
            break;
        }
    }
    assert!(reached.is_some_and(|i| i >= 19));
    assert!(matches!(
        h.pipeline.fsm().state(),
        FsmState::Failsafe {
            reason: FailsafeReason::SensorFault
        }
    ));
}

#[test]
fn nothing_is_published_before_acquire() {
    let mut h = Harness::new(0.9);
    let mut reports = vec![h.step(false), h.step(true)];
    loop {
        let r = h.step(false);
        let state = r.state();
        reports.push(r);
        if state == FsmStateKind::Acquire || reports.len() > 30 {
            break;
        }
    }
    let (before, last) = reports.split_at(reports.len() - 1);
    assert!(before.iter().all(|r| r.publish.is_none()));
    assert_eq!(last[0].publish, Some(PublishOutcome::Sent));
}

#[test]
fn lost_marker_returns_to_search_after_grace() {
    let mut h = Harness::new(0.9);
    h.step(false);
    h.step(true);
    h.run_until(FsmStateKind::Acquire, 20);

    h.marker = None;
    let mut states = Vec::new();
    for _ in 0..60 {
        states.push(h.step(false).state());
    }
    let back = states
        .iter()
        .position(|s| *s == FsmStateKind::Search)
        .expect("search");
    // 2 s grace at 20 Hz
    assert!(back >= 39, "search after {} ticks", back);
}
