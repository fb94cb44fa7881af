//! Rolling loop telemetry: frame rate, capture-to-output latency and
//! track confidence.

use crate::pipeline::TickReport;
use scandium_control::FsmStateKind;
use scandium_core::Timestamp;
use serde::Serialize;
use std::collections::VecDeque;

/// Capture times kept for the frame-rate estimate.
pub const FRAME_WINDOW: usize = 30;
/// Latency and confidence samples kept.
pub const SAMPLE_WINDOW: usize = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TelemetrySummary {
    pub ticks: u64,
    pub frames: u64,
    /// Over the last [`FRAME_WINDOW`] frames; 0 until two have arrived.
    pub fps: f64,
    pub latency_ms_mean: f64,
    pub latency_ms_min: f64,
    pub latency_ms_max: f64,
    pub confidence_mean: f64,
    pub confidence_min: f64,
    pub state: Option<FsmStateKind>,
}

#[derive(Clone, Debug, Default)]
pub struct TelemetryCollector {
    frame_times: VecDeque<Timestamp>,
    latencies_ms: VecDeque<f64>,
    confidences: VecDeque<f64>,
    ticks: u64,
    frames: u64,
    state: Option<FsmStateKind>,
}

fn push_bounded<T>(q: &mut VecDeque<T>, v: T, cap: usize) {
    if q.len() == cap {
        q.pop_front();
    }
    q.push_back(v);
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one tick. `captured` is the capture time of the frame the
    /// tick consumed, `finished` the time its output was ready.
    pub fn record(&mut self, report: &TickReport, captured: Option<Timestamp>, finished: Timestamp) {
        self.ticks += 1;
        self.state = Some(report.state());
        if let Some(captured) = captured {
            self.frames += 1;
            push_bounded(&mut self.frame_times, captured, FRAME_WINDOW);
            let latency = finished.saturating_since(captured).as_secs_f64() * 1e3;
            push_bounded(&mut self.latencies_ms, latency, SAMPLE_WINDOW);
        }
        if report.pose.valid {
            push_bounded(&mut self.confidences, report.pose.confidence, SAMPLE_WINDOW);
        }
    }

    pub fn fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.frame_times.front(), self.frame_times.back()) else {
            return 0.0;
        };
        let span = last.saturating_since(*first).as_secs_f64();
        if self.frame_times.len() < 2 || span <= 0.0 {
            return 0.0;
        }
        (self.frame_times.len() - 1) as f64 / span
    }

    pub fn summary(&self) -> TelemetrySummary {
        let (latency_ms_mean, latency_ms_min, latency_ms_max) = stats(&self.latencies_ms);
        let (confidence_mean, confidence_min, _) = stats(&self.confidences);
        TelemetrySummary {
            ticks: self.ticks,
            frames: self.frames,
            fps: self.fps(),
            latency_ms_mean,
            latency_ms_min,
            latency_ms_max,
            confidence_mean,
            confidence_min,
            state: self.state,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Mean, min and max; zeros when empty.
fn stats(values: &VecDeque<f64>) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let (sum, min, max) = values.iter().fold((0.0, f64::INFINITY, f64::NEG_INFINITY), |(s, lo, hi), &v| {
        (s + v, lo.min(v), hi.max(v))
    });
    (sum / values.len() as f64, min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LandingConfig;
    use crate::pipeline::{LandingPipeline, TickInput};
    use crate::sim::ScriptedScorer;
    use approx::assert_abs_diff_eq;
    use scandium_core::LinkHealth;
    use scandium_mavlink::{MavEndpoint, MemoryTransport};

    fn report() -> TickReport {
        let cfg = LandingConfig::default();
        let mut pipeline =
            LandingPipeline::with_scorer(&cfg, MavEndpoint::default(), Box::new(ScriptedScorer::new(0.9)))
                .expect("pipeline");
        let mut link = MemoryTransport::new();
        pipeline.tick(TickInput::idle(Timestamp::ZERO, LinkHealth::default()), &mut link)
    }

    fn ms(v: u64) -> Timestamp {
        Timestamp(v * 1000)
    }

    #[test]
    fn empty_collector_reports_zeros() {
        let t = TelemetryCollector::new();
        assert_eq!(t.summary(), TelemetrySummary::default());
    }

    #[test]
    fn fps_needs_two_frames_and_uses_the_window() {
        let r = report();
        let mut t = TelemetryCollector::new();
        t.record(&r, Some(ms(0)), ms(5));
        assert_eq!(t.fps(), 0.0);

        // 50 frames at 20 Hz; only the last 30 count
        for i in 1..50 {
            t.record(&r, Some(ms(i * 50)), ms(i * 50 + 5));
        }
        assert_abs_diff_eq!(t.fps(), 20.0, epsilon = 1e-9);
        assert_eq!(t.summary().frames, 50);
    }

    #[test]
    fn latency_and_state_are_tracked() {
        let r = report();
        let mut t = TelemetryCollector::new();
        t.record(&r, Some(ms(0)), ms(4));
        t.record(&r, None, ms(30));
        t.record(&r, Some(ms(50)), ms(62));
        let s = t.summary();
        assert_eq!(s.ticks, 3);
        assert_eq!(s.frames, 2);
        assert_abs_diff_eq!(s.latency_ms_mean, 8.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s.latency_ms_min, 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s.latency_ms_max, 12.0, epsilon = 1e-9);
        assert_eq!(s.state, Some(r.state()));

        t.reset();
        assert_eq!(t.summary().ticks, 0);
    }

    #[test]
    fn confidence_counts_valid_poses_only() {
        let mut r = report();
        let mut t = TelemetryCollector::new();
        t.record(&r, None, ms(0));
        r.pose.valid = true;
        r.pose.confidence = 1.0;
        t.record(&r, None, ms(50));
        r.pose.confidence = 0.6;
        t.record(&r, None, ms(100));
        let s = t.summary();
        assert_abs_diff_eq!(s.confidence_mean, 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(s.confidence_min, 0.6, epsilon = 1e-12);
    }
}
