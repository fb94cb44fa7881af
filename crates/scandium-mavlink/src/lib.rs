//! MAVLink side of the landing loop.
//!
//! - [`TargetPublisher`]: filtered pose -> rate-limited `LANDING_TARGET`.
//! - [`HeartbeatTask`]: 1 Hz companion heartbeat out, autopilot heartbeat
//!   in, recorded in a lock-free [`LinkMonitor`].
//! - [`Transport`]: UDP, serial/TCP streams and an in-memory link.
//!
//! ```
//! use nalgebra::Vector3;
//! use scandium_core::{FilteredPose, Timestamp};
//! use scandium_mavlink::{MavEndpoint, MemoryTransport, PublishOutcome, PublisherSettings, TargetPublisher};
//!
//! let mut link = MemoryTransport::new();
//! let mut publisher = TargetPublisher::new(MavEndpoint::default(), PublisherSettings::default());
//!
//! let mut pose = FilteredPose::empty();
//! pose.translation = Vector3::new(0.0, 0.0, 2.0);
//! pose.valid = true;
//! assert_eq!(publisher.publish(&pose, Timestamp(0), &mut link), PublishOutcome::Sent);
//! assert_eq!(link.sent_messages().len(), 1);
//! ```

mod endpoint;
mod error;
mod heartbeat;
mod link;
mod messages;
mod publisher;
mod rate;
mod transport;

pub use endpoint::{MavEndpoint, DEFAULT_COMPONENT_ID, DEFAULT_SYSTEM_ID};
pub use error::{DecodeError, TransportError};
pub use heartbeat::{AutopilotInfo, HeartbeatHandle, HeartbeatTask, DEFAULT_HEARTBEAT_PERIOD};
pub use link::{LinkMonitor, DEFAULT_HEARTBEAT_TIMEOUT};
pub use messages::{
    decode_frame, encode_frame, heartbeat_message, FrameSplitter, LandingTargetMessage,
    HEARTBEAT_ID, LANDING_TARGET_ID, TARGET_TYPE_VISION_FIDUCIAL,
};
pub use publisher::{PublishOutcome, PublisherSettings, PublisherStats, TargetPublisher};
pub use rate::{RateLimiter, DEFAULT_PUBLISH_RATE_HZ, MAX_PUBLISH_RATE_HZ, MIN_PUBLISH_RATE_HZ};
pub use transport::{
    DuplexStream, MemoryTransport, SerialTransport, StreamTransport, Transport, UdpTransport, STREAM_READ_TIMEOUT,
};

pub use mavlink;
