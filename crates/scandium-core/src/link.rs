use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Snapshot of autopilot link liveness, read once per tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkHealth {
    pub last_inbound: Option<Timestamp>,
    pub last_outbound: Option<Timestamp>,
    /// `now - last_inbound < timeout`.
    pub connected: bool,
}

impl LinkHealth {
    /// At least one inbound heartbeat has been seen.
    pub fn established(&self) -> bool {
        self.last_inbound.is_some()
    }

    /// The link was up at some point and has since timed out.
    pub fn lost(&self) -> bool {
        self.established() && !self.connected
    }
}
