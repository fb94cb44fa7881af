use crate::error::TransportError;
use crate::messages::encode_frame;
use mavlink::common::MavMessage;
use mavlink::MavHeader;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

pub const DEFAULT_SYSTEM_ID: u8 = 42;
/// `MAV_COMP_ID_USER76`, not claimed by any standard component.
pub const DEFAULT_COMPONENT_ID: u8 = 200;

/// Our identity on the link plus the shared outgoing sequence counter.
///
/// Clones share the counter, so the heartbeat task and the publisher number
/// their frames from one sequence.
#[derive(Clone, Debug)]
pub struct MavEndpoint {
    system_id: u8,
    component_id: u8,
    sequence: Arc<AtomicU8>,
}

impl Default for MavEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_ID, DEFAULT_COMPONENT_ID)
    }
}

impl MavEndpoint {
    pub fn new(system_id: u8, component_id: u8) -> Self {
        Self {
            system_id,
            component_id,
            sequence: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn system_id(&self) -> u8 {
        self.system_id
    }

    pub fn component_id(&self) -> u8 {
        self.component_id
    }

    /// Whether a received header carries our own ids (loopback or echo).
    pub fn is_self(&self, header: &MavHeader) -> bool {
        header.system_id == self.system_id && header.component_id == self.component_id
    }

    pub fn next_header(&self) -> MavHeader {
        MavHeader {
            system_id: self.system_id,
            component_id: self.component_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn encode(&self, msg: &MavMessage) -> Result<Vec<u8>, TransportError> {
        encode_frame(self.next_header(), msg)
    }
}
