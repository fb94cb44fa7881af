//! Fixed-rate tick loop around a [`LandingPipeline`].
//!
//! The loop owns the publishing transport handle. Heartbeats run on their
//! own thread with a cloned handle and only share the [`LinkMonitor`], whose
//! snapshot the loop reads once per tick.

use crate::config::{ConfigError, LandingConfig};
use crate::pipeline::{LandingPipeline, TickInput, TickReport};
use crate::telemetry::TelemetryCollector;
use scandium_control::{Commands, FsmStateKind};
use scandium_core::{Clock, Frame, MarkerDetector};
use scandium_mavlink::{
    HeartbeatHandle, HeartbeatTask, LinkMonitor, MavEndpoint, PublishOutcome, Transport,
    TransportError,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Non-blocking camera.
pub trait FrameSource: Send {
    /// The next captured frame, or `None` if nothing new arrived.
    fn poll_frame(&mut self) -> Option<Frame>;
}

/// Arm and abort requests raised from other threads, consumed once.
#[derive(Debug, Default)]
pub struct CommandLatch {
    arm: AtomicBool,
    abort: AtomicBool,
}

impl CommandLatch {
    pub fn request_arm(&self) {
        self.arm.store(true, Ordering::Release);
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    /// Pending commands; clears them. See [`Runner::step`] for how an arm
    /// that arrives before the pipeline leaves INIT is kept.
    pub fn take(&self) -> Commands {
        Commands {
            arm: self.arm.swap(false, Ordering::AcqRel),
            abort: self.abort.swap(false, Ordering::AcqRel),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to start heartbeat thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub ticks: u64,
    pub frames: u64,
    /// Frames replaced by a newer one before a tick could use them.
    pub dropped_frames: u64,
    /// Ticks that ran longer than the period.
    pub overruns: u64,
    pub published: u64,
}

pub struct Runner {
    pipeline: LandingPipeline,
    source: Box<dyn FrameSource>,
    detector: Box<dyn MarkerDetector + Send>,
    transport: Box<dyn Transport>,
    monitor: Arc<LinkMonitor>,
    clock: Arc<dyn Clock>,
    commands: Arc<CommandLatch>,
    period: Duration,
    stats: LoopStats,
    telemetry: TelemetryCollector,
    heartbeat: Option<HeartbeatHandle>,
}

impl Runner {
    /// Assemble a runner from parts. No heartbeat thread is started; the
    /// caller keeps `monitor` fed.
    pub fn new(
        pipeline: LandingPipeline,
        source: Box<dyn FrameSource>,
        detector: Box<dyn MarkerDetector + Send>,
        transport: Box<dyn Transport>,
        monitor: Arc<LinkMonitor>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        Self {
            pipeline,
            source,
            detector,
            transport,
            monitor,
            clock,
            commands: Arc::new(CommandLatch::default()),
            period,
            stats: LoopStats::default(),
            telemetry: TelemetryCollector::new(),
            heartbeat: None,
        }
    }

    /// Open the configured link, start the heartbeat thread and build the
    /// heuristic pipeline.
    pub fn from_config(
        cfg: &LandingConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn MarkerDetector + Send>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RunnerError> {
        cfg.validate()?;
        let endpoint = MavEndpoint::new(cfg.mavlink.system_id, cfg.mavlink.component_id);
        let transport = cfg.mavlink.open_transport()?;
        log::info!("mavlink link open on {}", transport.describe());

        let monitor = Arc::new(LinkMonitor::new(cfg.mavlink.heartbeat_timeout()));
        let heartbeat = HeartbeatTask::new(
            transport.try_clone()?,
            endpoint.clone(),
            Arc::clone(&monitor),
            cfg.mavlink.heartbeat_period(),
        )
        .spawn(Arc::clone(&clock))?;

        let pipeline = LandingPipeline::new(cfg, endpoint)?;
        let mut runner = Self::new(
            pipeline,
            source,
            detector,
            transport,
            monitor,
            clock,
            cfg.control.tick_period(),
        );
        runner.heartbeat = Some(heartbeat);
        Ok(runner)
    }

    pub fn commands(&self) -> Arc<CommandLatch> {
        Arc::clone(&self.commands)
    }

    pub fn pipeline(&self) -> &LandingPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut LandingPipeline {
        &mut self.pipeline
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    /// Run one tick on the freshest available frame.
    ///
    /// An arm request consumed while the state machine is still in INIT is
    /// latched again, so it takes effect once links are up.
    pub fn step(&mut self) -> TickReport {
        let mut frame = None;
        while let Some(f) = self.source.poll_frame() {
            if frame.replace(f).is_some() {
                self.stats.dropped_frames += 1;
            }
        }
        let detections = match frame.as_ref() {
            Some(f) => {
                self.stats.frames += 1;
                self.detector.detect(&f.view())
            }
            None => Vec::new(),
        };

        let now = self.clock.now();
        let commands = self.commands.take();
        let input = TickInput {
            now,
            frame: frame.as_ref(),
            detections: &detections,
            link: self.monitor.health(now),
            vehicle_yaw: None,
            commands,
        };
        let report = self.pipeline.tick(input, self.transport.as_mut());
        if commands.arm && !commands.abort && report.fsm.previous == FsmStateKind::Init {
            log::debug!("arm received in INIT, holding it");
            self.commands.request_arm();
        }
        self.telemetry
            .record(&report, frame.as_ref().map(|f| f.timestamp), self.clock.now());
        self.stats.ticks += 1;
        if report.publish == Some(PublishOutcome::Sent) {
            self.stats.published += 1;
        }
        report
    }

    /// Tick at the configured period until `shutdown` is set or `max_ticks`
    /// ticks have run.
    pub fn run(
        &mut self,
        shutdown: &AtomicBool,
        max_ticks: Option<u64>,
        mut on_tick: impl FnMut(&TickReport),
    ) -> LoopStats {
        log::info!("tick loop started, period {:?}", self.period);
        let mut done = 0u64;
        while !shutdown.load(Ordering::Acquire) && max_ticks.map_or(true, |m| done < m) {
            let started = self.clock.now();
            let report = self.step();
            on_tick(&report);
            done += 1;

            let elapsed = self.clock.now().saturating_since(started);
            match self.period.checked_sub(elapsed) {
                Some(rest) if !rest.is_zero() => std::thread::sleep(rest),
                _ => {
                    self.stats.overruns += 1;
                    log::debug!("tick overran: {:?} > {:?}", elapsed, self.period);
                }
            }
        }
        let t = self.telemetry.summary();
        log::info!(
            "tick loop stopped after {} ticks, {} targets published, {:.1} fps, latency {:.1}/{:.1} ms mean/max",
            self.stats.ticks,
            self.stats.published,
            t.fps,
            t.latency_ms_mean,
            t.latency_ms_max
        );
        self.stats
    }

    /// Stop the heartbeat thread, if this runner started one.
    pub fn shutdown(mut self) {
        if let Some(h) = self.heartbeat.take() {
            h.stop();
        }
    }
}
