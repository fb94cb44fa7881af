use crate::endpoint::MavEndpoint;
use crate::link::LinkMonitor;
use crate::messages::LandingTargetMessage;
use crate::rate::{RateLimiter, DEFAULT_PUBLISH_RATE_HZ};
use crate::transport::Transport;
use scandium_core::{FilteredPose, TargetFrame, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    pub rate_hz: f64,
    pub target_num: u8,
    pub frame: TargetFrame,
    /// Physical marker side, for the angular size fields.
    pub marker_size_m: f64,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            rate_hz: DEFAULT_PUBLISH_RATE_HZ,
            target_num: 0,
            frame: TargetFrame::BodyNed,
            marker_size_m: 0.20,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    Sent,
    /// Within the current publish period; the estimate is simply not sent.
    RateLimited,
    /// No valid pose to describe.
    Skipped,
    Failed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    pub sent: u64,
    pub rate_limited: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Rate-limited LANDING_TARGET sender.
///
/// Only ever sends the estimate it is handed; nothing is queued, so a late
/// tick can never release a stale pose.
pub struct TargetPublisher {
    endpoint: MavEndpoint,
    settings: PublisherSettings,
    limiter: RateLimiter,
    monitor: Option<Arc<LinkMonitor>>,
    stats: PublisherStats,
    last: Option<LandingTargetMessage>,
}

impl TargetPublisher {
    pub fn new(endpoint: MavEndpoint, settings: PublisherSettings) -> Self {
        Self {
            limiter: RateLimiter::new(settings.rate_hz),
            endpoint,
            settings,
            monitor: None,
            stats: PublisherStats::default(),
            last: None,
        }
    }

    /// Record every successful send as outbound traffic.
    pub fn with_monitor(mut self, monitor: Arc<LinkMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn settings(&self) -> &PublisherSettings {
        &self.settings
    }

    pub fn stats(&self) -> PublisherStats {
        self.stats
    }

    /// The most recently sent message.
    pub fn last_sent(&self) -> Option<&LandingTargetMessage> {
        self.last.as_ref()
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self, pose, transport)))]
    pub fn publish(
        &mut self,
        pose: &FilteredPose,
        now: Timestamp,
        transport: &mut dyn Transport,
    ) -> PublishOutcome {
        let s = &self.settings;
        let Some(msg) = LandingTargetMessage::from_pose(pose, s.frame, s.target_num, s.marker_size_m)
        else {
            self.stats.skipped += 1;
            return PublishOutcome::Skipped;
        };
        if !self.limiter.should_run(now) {
            self.stats.rate_limited += 1;
            return PublishOutcome::RateLimited;
        }

        match self
            .endpoint
            .encode(&msg.to_mavlink())
            .and_then(|frame| transport.send(&frame))
        {
            Ok(()) => {
                self.stats.sent += 1;
                if let Some(m) = &self.monitor {
                    m.record_outbound(now);
                }
                log::debug!(
                    "landing_target sent: angle_x {:.4} angle_y {:.4} distance {:.2} (#{})",
                    msg.angle_x,
                    msg.angle_y,
                    msg.distance,
                    self.stats.sent
                );
                self.last = Some(msg);
                PublishOutcome::Sent
            }
            Err(e) => {
                self.stats.failed += 1;
                log::warn!("landing_target send failed on {}: {}", transport.describe(), e);
                PublishOutcome::Failed
            }
        }
    }

    /// Restart the publish cadence, e.g. when a new track begins.
    pub fn reset_rate(&mut self) {
        self.limiter.reset();
    }
}
