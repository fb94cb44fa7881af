use scandium_core::Timestamp;
use std::time::Duration;

pub const MIN_PUBLISH_RATE_HZ: f64 = 10.0;
pub const MAX_PUBLISH_RATE_HZ: f64 = 50.0;
pub const DEFAULT_PUBLISH_RATE_HZ: f64 = 20.0;

/// Admits at most one event per period, keeping a steady cadence when
/// callers arrive slightly late.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    period: Duration,
    next: Option<Timestamp>,
}

impl RateLimiter {
    /// Clamps `rate_hz` to `MIN_PUBLISH_RATE_HZ..=MAX_PUBLISH_RATE_HZ`; a
    /// non-finite rate falls back to the default.
    pub fn new(rate_hz: f64) -> Self {
        let rate_hz = if rate_hz.is_finite() {
            rate_hz.clamp(MIN_PUBLISH_RATE_HZ, MAX_PUBLISH_RATE_HZ)
        } else {
            DEFAULT_PUBLISH_RATE_HZ
        };
        Self {
            period: Duration::from_secs_f64(1.0 / rate_hz),
            next: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn should_run(&mut self, now: Timestamp) -> bool {
        if let Some(next) = self.next {
            if now < next {
                return false;
            }
        }
        // stay on the grid unless we fell a whole period behind
        let base = match self.next {
            Some(next) if now.saturating_since(next) < self.period => next,
            _ => now,
        };
        self.next = Some(base.saturating_add(self.period));
        true
    }

    pub fn reset(&mut self) {
        self.next = None;
    }
}
