//! LANDING_TARGET and HEARTBEAT payloads plus raw frame encode/decode.
//!
//! Framing, CRC_EXTRA and payload truncation are handled by the `mavlink`
//! crate; this module only decides what goes into the fields.

use crate::error::{DecodeError, TransportError};
use mavlink::common::{
    LandingTargetType, MavAutopilot, MavFrame, MavMessage, MavModeFlag, MavState, MavType,
    HEARTBEAT_DATA, LANDING_TARGET_DATA,
};
use mavlink::peek_reader::PeekReader;
use mavlink::MavHeader;
use scandium_core::{FilteredPose, TargetFrame};
use serde::Serialize;

pub const HEARTBEAT_ID: u32 = 0;
pub const LANDING_TARGET_ID: u32 = 149;

pub const MAVLINK_V1_STX: u8 = 0xFE;
pub const MAVLINK_V2_STX: u8 = 0xFD;

/// `LANDING_TARGET.type` for a printed fiducial.
pub const TARGET_TYPE_VISION_FIDUCIAL: u8 = 2;

const MAVLINK_VERSION: u8 = 3;

/// One LANDING_TARGET as it goes on the wire.
///
/// Built fresh from the filtered pose every publish tick. `time_usec` is the
/// capture time of the frame the pose came from, never the send time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LandingTargetMessage {
    pub time_usec: u64,
    pub target_num: u8,
    pub frame: TargetFrame,
    /// Horizontal angular offset, rad. Positive means the target is right.
    pub angle_x: f32,
    /// Vertical angular offset, rad. Positive means the target is below.
    pub angle_y: f32,
    pub distance: f32,
    /// Apparent marker size, rad.
    pub size_x: f32,
    pub size_y: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// `[w, x, y, z]`.
    pub q: [f32; 4],
    pub target_type: u8,
    pub position_valid: bool,
}

impl LandingTargetMessage {
    /// `None` for an invalid pose or one with no usable range.
    pub fn from_pose(
        pose: &FilteredPose,
        frame: TargetFrame,
        target_num: u8,
        marker_size_m: f64,
    ) -> Option<Self> {
        if !pose.valid {
            return None;
        }
        let t = &pose.translation;
        let distance = t.norm();
        if !distance.is_finite() || distance <= 0.0 {
            return None;
        }
        let size = 2.0 * (marker_size_m / 2.0 / distance).atan();
        let q = pose
            .orientation
            .map(|q| [q.w as f32, q.i as f32, q.j as f32, q.k as f32])
            .unwrap_or([1.0, 0.0, 0.0, 0.0]);

        Some(Self {
            time_usec: pose.timestamp.as_micros(),
            target_num,
            frame,
            angle_x: t.x.atan2(t.z) as f32,
            angle_y: t.y.atan2(t.z) as f32,
            distance: distance as f32,
            size_x: size as f32,
            size_y: size as f32,
            x: t.x as f32,
            y: t.y as f32,
            z: t.z as f32,
            q,
            target_type: TARGET_TYPE_VISION_FIDUCIAL,
            position_valid: true,
        })
    }

    pub fn to_mavlink(&self) -> MavMessage {
        MavMessage::LANDING_TARGET(LANDING_TARGET_DATA {
            time_usec: self.time_usec,
            angle_x: self.angle_x,
            angle_y: self.angle_y,
            distance: self.distance,
            size_x: self.size_x,
            size_y: self.size_y,
            target_num: self.target_num,
            frame: mav_frame(self.frame),
            x: self.x,
            y: self.y,
            z: self.z,
            q: self.q,
            mavtype: target_type(self.target_type),
            position_valid: u8::from(self.position_valid),
        })
    }

    /// `None` when the frame is not one this system publishes in.
    pub fn from_mavlink(data: &LANDING_TARGET_DATA) -> Option<Self> {
        Some(Self {
            time_usec: data.time_usec,
            target_num: data.target_num,
            frame: target_frame(data.frame)?,
            angle_x: data.angle_x,
            angle_y: data.angle_y,
            distance: data.distance,
            size_x: data.size_x,
            size_y: data.size_y,
            x: data.x,
            y: data.y,
            z: data.z,
            q: data.q,
            target_type: data.mavtype as u8,
            position_valid: data.position_valid != 0,
        })
    }
}

fn mav_frame(frame: TargetFrame) -> MavFrame {
    match frame {
        TargetFrame::LocalNed => MavFrame::MAV_FRAME_LOCAL_NED,
        TargetFrame::BodyNed => MavFrame::MAV_FRAME_BODY_NED,
        TargetFrame::BodyFrd => MavFrame::MAV_FRAME_BODY_FRD,
    }
}

fn target_frame(frame: MavFrame) -> Option<TargetFrame> {
    match frame {
        MavFrame::MAV_FRAME_LOCAL_NED => Some(TargetFrame::LocalNed),
        MavFrame::MAV_FRAME_BODY_NED => Some(TargetFrame::BodyNed),
        MavFrame::MAV_FRAME_BODY_FRD => Some(TargetFrame::BodyFrd),
        _ => None,
    }
}

fn target_type(id: u8) -> LandingTargetType {
    match id {
        0 => LandingTargetType::LANDING_TARGET_TYPE_LIGHT_BEACON,
        1 => LandingTargetType::LANDING_TARGET_TYPE_RADIO_BEACON,
        3 => LandingTargetType::LANDING_TARGET_TYPE_VISION_OTHER,
        _ => LandingTargetType::LANDING_TARGET_TYPE_VISION_FIDUCIAL,
    }
}

/// Companion-computer heartbeat: onboard controller, no autopilot, active.
pub fn heartbeat_message() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: MAVLINK_VERSION,
    })
}

/// Serialize one message as a MAVLink v2 frame.
pub fn encode_frame(header: MavHeader, msg: &MavMessage) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::with_capacity(64);
    mavlink::write_v2_msg(&mut buf, header, msg)
        .map_err(|e| TransportError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Parse exactly one v1 or v2 frame from the start of `bytes`.
pub fn decode_frame(bytes: &[u8]) -> Result<(MavHeader, MavMessage), DecodeError> {
    let mut reader = PeekReader::new(bytes);
    let parsed: Result<(MavHeader, MavMessage), _> = match bytes.first() {
        Some(&MAVLINK_V2_STX) => mavlink::read_v2_msg(&mut reader),
        Some(&MAVLINK_V1_STX) => mavlink::read_v1_msg(&mut reader),
        _ => return Err(DecodeError::NotAFrame),
    };
    parsed.map_err(|e| DecodeError::Invalid(e.to_string()))
}

/// Longest frame we accept: v2 with full payload and signature.
const MAX_FRAME_LEN: usize = 10 + 255 + 2 + 13;

/// Reassembles frames from a byte stream that may split or merge them.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buf: Vec<u8>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        // a stream of garbage must not grow without bound
        if self.buf.len() > 4 * MAX_FRAME_LEN {
            let excess = self.buf.len() - 2 * MAX_FRAME_LEN;
            self.buf.drain(..excess);
        }
    }

    /// Next complete candidate frame. Checksums are verified by the decoder.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let Some(start) = self
            .buf
            .iter()
            .position(|&b| b == MAVLINK_V2_STX || b == MAVLINK_V1_STX)
        else {
            self.buf.clear();
            return None;
        };
        self.buf.drain(..start);

        let len = frame_len(&self.buf)?;
        if self.buf.len() < len {
            return None;
        }
        Some(self.buf.drain(..len).collect())
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn frame_len(buf: &[u8]) -> Option<usize> {
    let payload = *buf.get(1)? as usize;
    match buf[0] {
        MAVLINK_V2_STX => {
            let incompat = *buf.get(2)?;
            let signature = if incompat & 0x01 != 0 { 13 } else { 0 };
            Some(10 + payload + 2 + signature)
        }
        _ => Some(6 + payload + 2),
    }
}
