use scandium_core::{LinkHealth, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(3);

/// Heartbeat bookkeeping shared between the heartbeat task (writer) and the
/// tick loop (reader).
///
/// Each field is one atomic holding `micros + 1`, zero meaning never.
#[derive(Debug)]
pub struct LinkMonitor {
    last_inbound: AtomicU64,
    last_outbound: AtomicU64,
    timeout: Duration,
}

impl Default for LinkMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_TIMEOUT)
    }
}

fn pack(t: Timestamp) -> u64 {
    t.as_micros().saturating_add(1)
}

fn unpack(v: u64) -> Option<Timestamp> {
    v.checked_sub(1).map(Timestamp)
}

impl LinkMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_inbound: AtomicU64::new(0),
            last_outbound: AtomicU64::new(0),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Autopilot heartbeat received at `t`.
    pub fn record_inbound(&self, t: Timestamp) {
        self.last_inbound.fetch_max(pack(t), Ordering::AcqRel);
    }

    pub fn record_outbound(&self, t: Timestamp) {
        self.last_outbound.fetch_max(pack(t), Ordering::AcqRel);
    }

    pub fn last_inbound(&self) -> Option<Timestamp> {
        unpack(self.last_inbound.load(Ordering::Acquire))
    }

    pub fn last_outbound(&self) -> Option<Timestamp> {
        unpack(self.last_outbound.load(Ordering::Acquire))
    }

    /// Connected while the last inbound heartbeat is at most `timeout` old.
    pub fn health(&self, now: Timestamp) -> LinkHealth {
        let last_inbound = self.last_inbound();
        LinkHealth {
            last_inbound,
            last_outbound: self.last_outbound(),
            connected: last_inbound.map_or(false, |t| now.saturating_since(t) <= self.timeout),
        }
    }

    /// Forget all heartbeats, e.g. after reconnecting the transport.
    pub fn clear(&self) {
        self.last_inbound.store(0, Ordering::Release);
        self.last_outbound.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Timestamp {
        Timestamp::from_secs_f64(s)
    }

    #[test]
    fn never_seen_is_not_established() {
        let m = LinkMonitor::default();
        let h = m.health(secs(100.0));
        assert!(!h.connected);
        assert!(!h.established());
        assert!(!h.lost());
    }

    #[test]
    fn heartbeat_at_time_zero_counts() {
        let m = LinkMonitor::default();
        m.record_inbound(Timestamp::ZERO);
        assert_eq!(m.last_inbound(), Some(Timestamp::ZERO));
        assert!(m.health(secs(1.0)).connected);
    }

    #[test]
    fn times_out_after_timeout() {
        let m = LinkMonitor::default();
        m.record_inbound(secs(10.0));
        m.record_outbound(secs(10.5));
        assert!(m.health(secs(13.0)).connected);
        let h = m.health(secs(13.001));
        assert!(h.lost());
        assert_eq!(h.last_outbound, Some(secs(10.5)));
    }

    #[test]
    fn stale_update_does_not_rewind() {
        let m = LinkMonitor::default();
        m.record_inbound(secs(5.0));
        m.record_inbound(secs(4.0));
        assert_eq!(m.last_inbound(), Some(secs(5.0)));
        m.clear();
        assert_eq!(m.last_inbound(), None);
    }
}
