//! JSON configuration for the landing pipeline.
//!
//! Every section has `#[serde(default)]`, so a config file only needs the
//! values that differ from the deployed defaults. [`LandingConfig::validate`]
//! runs once at startup; everything downstream trusts the values.

use scandium_control::{FsmParams, GuidanceParams, SafetyLimits};
use scandium_core::{CameraIntrinsics, CameraModel, RadialTangentialDistortion, TargetFrame};
use scandium_landability::{HeuristicParams, ModelScorerParams, RoiPolicy};
use scandium_mavlink::{
    PublisherSettings, SerialTransport, StreamTransport, Transport, TransportError, UdpTransport,
    MAX_PUBLISH_RATE_HZ, MIN_PUBLISH_RATE_HZ,
};
use scandium_pose::{Extrinsics, FilterParams, FrameError, MountPreset, PoseEstimatorParams};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};
use std::time::Duration;
use std::{fs, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum ConfigIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {}", .problems.join("; "))]
    Invalid { problems: Vec<String> },
    #[error(transparent)]
    Extrinsics(#[from] FrameError),
    #[error("landability.method is \"model\" but no segmentation model was supplied")]
    ModelRequired,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: usize,
    pub height: usize,
    pub fps: u32,
    /// Calibrated intrinsics; nominal (`f = width`) when absent.
    pub intrinsics: Option<CameraIntrinsics>,
    /// `[k1, k2, p1, p2, k3]`.
    pub distortion: [f64; 5],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            intrinsics: None,
            distortion: [0.0; 5],
        }
    }
}

impl CameraConfig {
    pub fn model(&self) -> CameraModel {
        CameraModel {
            intrinsics: self
                .intrinsics
                .unwrap_or_else(|| CameraIntrinsics::nominal(self.width, self.height)),
            distortion: RadialTangentialDistortion::from_coeffs(self.distortion),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtrinsicsConfig {
    pub preset: MountPreset,
    /// Row-major body-from-camera rotation; overrides `preset`.
    pub rotation: Option<[[f64; 3]; 3]>,
    /// Camera position in body coordinates, meters.
    pub translation: [f64; 3],
}

impl Default for ExtrinsicsConfig {
    fn default() -> Self {
        Self {
            preset: MountPreset::DownwardFacing,
            rotation: None,
            translation: [0.0; 3],
        }
    }
}

impl ExtrinsicsConfig {
    pub fn build(&self) -> Result<Extrinsics, FrameError> {
        match self.rotation {
            Some(rows) => Extrinsics::from_rows(rows, self.translation),
            None => {
                if !self.translation.iter().all(|v| v.is_finite()) {
                    return Err(FrameError::NonFinite);
                }
                Ok(Extrinsics::from_preset(self.preset, self.translation.into()))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiducialsConfig {
    pub marker_size_m: f64,
    pub allowlist: Vec<u32>,
    /// Allowed relative disagreement between apparent-size depth and solved
    /// depth.
    pub size_tolerance: f64,
    pub min_tag_area_px: f64,
}

impl Default for FiducialsConfig {
    fn default() -> Self {
        let p = PoseEstimatorParams::default();
        Self {
            marker_size_m: p.marker_size_m,
            allowlist: p.allowlist,
            size_tolerance: p.size_tolerance,
            min_tag_area_px: p.min_tag_area_px,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    pub frame: TargetFrame,
    pub max_reprojection_error_px: f64,
    pub max_iterations: usize,
    pub filter: FilterParams,
}

impl Default for PoseConfig {
    fn default() -> Self {
        let p = PoseEstimatorParams::default();
        Self {
            frame: TargetFrame::BodyNed,
            max_reprojection_error_px: p.max_reprojection_error_px,
            max_iterations: p.max_iterations,
            filter: FilterParams::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandabilityBackend {
    #[default]
    Heuristic,
    /// External segmentation model, heuristics as fallback.
    Model,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandabilityConfig {
    pub enabled: bool,
    pub method: LandabilityBackend,
    pub roi: RoiPolicy,
    pub heuristic: HeuristicParams,
    pub model: ModelScorerParams,
}

impl Default for LandabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: LandabilityBackend::Heuristic,
            roi: RoiPolicy::default(),
            heuristic: HeuristicParams::default(),
            model: ModelScorerParams::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub fsm_rate_hz: f64,
    pub fsm: FsmParams,
    pub safety: SafetyLimits,
    pub guidance: GuidanceParams,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            fsm_rate_hz: 20.0,
            fsm: FsmParams::default(),
            safety: SafetyLimits::default(),
            guidance: GuidanceParams::default(),
        }
    }
}

impl ControlConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fsm_rate_hz.max(1.0))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Send to `udp.address:udp.port`.
    #[default]
    Udp,
    /// Listen on `udp.port` and answer the autopilot.
    UdpIn,
    Serial,
    Tcp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 14550,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub device: String,
    /// Line rate, applied when the port is opened (8N1, no flow control).
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyAMA0".to_string(),
            baud: 921_600,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MavlinkConfig {
    pub transport: TransportKind,
    pub udp: UdpConfig,
    pub serial: SerialConfig,
    pub system_id: u8,
    pub component_id: u8,
    pub target_num: u8,
    pub landing_target_rate_hz: f64,
    pub heartbeat_rate_hz: f64,
    pub heartbeat_timeout_s: f64,
}

impl Default for MavlinkConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Udp,
            udp: UdpConfig::default(),
            serial: SerialConfig::default(),
            system_id: scandium_mavlink::DEFAULT_SYSTEM_ID,
            component_id: scandium_mavlink::DEFAULT_COMPONENT_ID,
            target_num: 0,
            landing_target_rate_hz: scandium_mavlink::DEFAULT_PUBLISH_RATE_HZ,
            heartbeat_rate_hz: 1.0,
            heartbeat_timeout_s: 3.0,
        }
    }
}

impl MavlinkConfig {
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.heartbeat_rate_hz.max(1e-3))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_timeout_s.max(0.0))
    }

    /// Open the configured link.
    pub fn open_transport(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(match self.transport {
            TransportKind::Udp => Box::new(UdpTransport::connect((
                self.udp.address.as_str(),
                self.udp.port,
            ))?),
            TransportKind::UdpIn => {
                let ip: Ipv4Addr = self
                    .udp
                    .address
                    .parse()
                    .map_err(|_| TransportError::Unsupported("non-IPv4 listen address"))?;
                Box::new(UdpTransport::listen(SocketAddrV4::new(ip, self.udp.port))?)
            }
            TransportKind::Serial => Box::new(SerialTransport::open_serial(
                &self.serial.device,
                self.serial.baud,
            )?),
            TransportKind::Tcp => Box::new(StreamTransport::<TcpStream>::connect_tcp((
                self.udp.address.as_str(),
                self.udp.port,
            ))?),
        })
    }
}

/// Complete pipeline configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub log_level: String,
    pub camera: CameraConfig,
    pub extrinsics: ExtrinsicsConfig,
    pub fiducials: FiducialsConfig,
    pub pose: PoseConfig,
    pub landability: LandabilityConfig,
    pub control: ControlConfig,
    pub mavlink: MavlinkConfig,
}

impl Default for LandingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            camera: CameraConfig::default(),
            extrinsics: ExtrinsicsConfig::default(),
            fiducials: FiducialsConfig::default(),
            pose: PoseConfig::default(),
            landability: LandabilityConfig::default(),
            control: ControlConfig::default(),
            mavlink: MavlinkConfig::default(),
        }
    }
}

impl LandingConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn estimator_params(&self) -> PoseEstimatorParams {
        PoseEstimatorParams {
            marker_size_m: self.fiducials.marker_size_m,
            allowlist: self.fiducials.allowlist.clone(),
            min_tag_area_px: self.fiducials.min_tag_area_px,
            max_reprojection_error_px: self.pose.max_reprojection_error_px,
            size_tolerance: self.fiducials.size_tolerance,
            max_iterations: self.pose.max_iterations,
        }
    }

    pub fn publisher_settings(&self) -> PublisherSettings {
        PublisherSettings {
            rate_hz: self.mavlink.landing_target_rate_hz,
            target_num: self.mavlink.target_num,
            frame: self.pose.frame,
            marker_size_m: self.fiducials.marker_size_m,
        }
    }

    /// Range and consistency checks. Reports every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let mut check = |ok: bool, msg: &str| {
            if !ok {
                problems.push(msg.to_string());
            }
        };

        check(
            scandium_core::parse_level(&self.log_level).is_some(),
            "log_level must be one of trace, debug, info, warn, error, off",
        );

        let cam = &self.camera;
        check(cam.width > 0 && cam.height > 0, "camera.width and camera.height must be positive");
        check((1..=120).contains(&cam.fps), "camera.fps must be in 1..=120");
        check(cam.model().intrinsics.is_valid(), "camera.intrinsics must be finite with non-zero focal lengths");
        check(cam.distortion.iter().all(|k| k.is_finite()), "camera.distortion must be finite");

        let f = &self.fiducials;
        check(f.marker_size_m > 0.0, "fiducials.marker_size_m must be positive");
        check(!f.allowlist.is_empty(), "fiducials.allowlist must contain at least one id");
        check(f.size_tolerance > 0.0, "fiducials.size_tolerance must be positive");
        check(f.min_tag_area_px >= 0.0, "fiducials.min_tag_area_px must be non-negative");

        let p = &self.pose;
        check(p.max_reprojection_error_px > 0.0, "pose.max_reprojection_error_px must be positive");
        check(p.max_iterations > 0, "pose.max_iterations must be positive");
        let fl = &p.filter;
        check(fl.alpha > 0.0 && fl.alpha <= 1.0, "pose.filter.alpha must be in (0, 1]");
        check(fl.outlier_threshold > 0.0, "pose.filter.outlier_threshold must be positive");
        check(fl.variance_floor > 0.0, "pose.filter.variance_floor must be positive");
        check(fl.initial_variance >= fl.variance_floor, "pose.filter.initial_variance must be >= variance_floor");
        check(fl.outlier_inflation >= 1.0 && fl.miss_inflation >= 1.0, "pose.filter inflation factors must be >= 1");
        check(fl.process_noise >= 0.0, "pose.filter.process_noise must be non-negative");
        check(fl.measurement_variance > 0.0, "pose.filter.measurement_variance must be positive");

        let l = &self.landability;
        let w = &l.heuristic.weights;
        check((w.sum() - 1.0).abs() < 1e-6, "landability.heuristic.weights must sum to 1");
        check(l.heuristic.texture_var_min > 0.0, "landability.heuristic.texture_var_min must be positive");
        check(
            (0.0..=1.0).contains(&l.heuristic.motion_threshold),
            "landability.heuristic.motion_threshold must be in [0, 1]",
        );
        check(
            l.heuristic.canny_low <= l.heuristic.canny_high,
            "landability.heuristic.canny_low must not exceed canny_high",
        );
        check(l.roi.marker_scale > 0.0, "landability.roi.marker_scale must be positive");

        let c = &self.control;
        let fsm = &c.fsm;
        check((1.0..=100.0).contains(&c.fsm_rate_hz), "control.fsm_rate_hz must be in 1..=100");
        check(
            (0.0..=1.0).contains(&fsm.acquire_confidence),
            "control.fsm.acquire_confidence must be in [0, 1]",
        );
        check(
            (0.0..=1.0).contains(&fsm.abort_landability),
            "control.fsm.abort_landability must be in [0, 1]",
        );
        check(
            fsm.abort_landability < fsm.acquire_confidence,
            "control.fsm.abort_landability should be less than acquire_confidence",
        );
        check(fsm.align_error_m > 0.0, "control.fsm.align_error_m must be positive");
        check(fsm.touchdown_altitude_m > 0.0, "control.fsm.touchdown_altitude_m must be positive");
        check(fsm.loss_grace_s >= 0.0, "control.fsm.loss_grace_s must be non-negative");
        check(fsm.stable_variance > 0.0, "control.fsm.stable_variance must be positive");
        check(c.safety.perception_timeout_s > 0.0, "control.safety.perception_timeout_s must be positive");
        check(
            c.safety.max_lateral_speed_mps > 0.0 && c.safety.max_descent_speed_mps > 0.0,
            "control.safety speed limits must be positive",
        );
        let g = &c.guidance;
        check(g.lateral_gain >= 0.0, "control.guidance.lateral_gain must be non-negative");
        check(g.descent_rate_mps >= 0.0, "control.guidance.descent_rate_mps must be non-negative");
        check(
            (0.0..=1.0).contains(&g.misaligned_descent_scale),
            "control.guidance.misaligned_descent_scale must be in [0, 1]",
        );
        check(g.search_period_s > 0.0, "control.guidance.search_period_s must be positive");
        check(
            g.max_lateral_speed_mps <= c.safety.max_lateral_speed_mps
                && g.max_descent_speed_mps <= c.safety.max_descent_speed_mps,
            "control.guidance speed limits must not exceed control.safety limits",
        );

        let m = &self.mavlink;
        check(
            (MIN_PUBLISH_RATE_HZ..=MAX_PUBLISH_RATE_HZ).contains(&m.landing_target_rate_hz),
            "mavlink.landing_target_rate_hz must be in 10..=50",
        );
        check(m.heartbeat_rate_hz > 0.0, "mavlink.heartbeat_rate_hz must be positive");
        check(
            m.heartbeat_timeout_s > 1.0 / m.heartbeat_rate_hz.max(1e-3),
            "mavlink.heartbeat_timeout_s must exceed the heartbeat period",
        );
        check(m.system_id >= 1 && m.component_id >= 1, "mavlink ids must be in 1..=255");
        if matches!(m.transport, TransportKind::Serial) {
            check(!m.serial.device.is_empty(), "mavlink.serial.device is required for serial transport");
            check(m.serial.baud > 0, "mavlink.serial.baud must be positive");
        }

        self.extrinsics.build()?;

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = LandingConfig::default();
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.fiducials.allowlist, vec![1]);
        assert_eq!(cfg.mavlink.udp.port, 14550);
        assert_eq!(cfg.mavlink.system_id, 42);
        assert_eq!(cfg.pose.frame, TargetFrame::BodyNed);
        assert_eq!(cfg.publisher_settings().rate_hz, 20.0);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: LandingConfig = serde_json::from_str(
            r#"{ "fiducials": { "allowlist": [3, 4] }, "mavlink": { "transport": "serial" } }"#,
        )
        .expect("parse");
        assert_eq!(cfg.fiducials.allowlist, vec![3, 4]);
        assert_eq!(cfg.fiducials.marker_size_m, 0.20);
        assert_eq!(cfg.mavlink.transport, TransportKind::Serial);
        assert_eq!(cfg.mavlink.serial.device, "/dev/ttyAMA0");
        assert_eq!(cfg.pose.filter.alpha, 0.35);
    }

    #[test]
    fn out_of_range_values_are_all_reported() {
        let mut cfg = LandingConfig::default();
        cfg.mavlink.landing_target_rate_hz = 60.0;
        cfg.fiducials.allowlist.clear();
        cfg.pose.filter.alpha = 0.0;
        let Err(ConfigError::Invalid { problems }) = cfg.validate() else {
            panic!("expected invalid config");
        };
        assert_eq!(problems.len(), 3, "{:?}", problems);
    }

    #[test]
    fn bad_extrinsic_rotation_is_rejected() {
        let mut cfg = LandingConfig::default();
        cfg.extrinsics.rotation = Some([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 2.0]]);
        assert!(matches!(cfg.validate(), Err(ConfigError::Extrinsics(_))));
    }

    #[test]
    fn custom_intrinsics_are_used() {
        let mut cfg = LandingConfig::default();
        cfg.camera.intrinsics = Some(CameraIntrinsics {
            fx: 900.0,
            fy: 910.0,
            cx: 640.0,
            cy: 360.0,
        });
        assert_eq!(cfg.camera.model().intrinsics.fx, 900.0);
        assert_eq!(LandingConfig::default().camera.model().intrinsics.fx, 1280.0);
    }

    #[test]
    fn kalman_and_guidance_sections_parse_and_validate() {
        let cfg: LandingConfig = serde_json::from_str(
            r#"{ "pose": { "filter": { "type": "kalman", "process_noise": 0.2 } },
                 "control": { "guidance": { "lateral_gain": 0.8 } } }"#,
        )
        .expect("parse");
        assert_eq!(cfg.pose.filter.kind, scandium_pose::FilterKind::Kalman);
        assert_eq!(cfg.pose.filter.process_noise, 0.2);
        assert_eq!(cfg.control.guidance.lateral_gain, 0.8);
        assert_eq!(cfg.control.guidance.search_period_s, 10.0);
        cfg.validate().expect("valid");

        let mut bad = cfg.clone();
        bad.control.guidance.max_lateral_speed_mps = 3.0;
        bad.pose.filter.process_noise = -1.0;
        bad.mavlink.transport = TransportKind::Serial;
        bad.mavlink.serial.baud = 0;
        let Err(ConfigError::Invalid { problems }) = bad.validate() else {
            panic!("expected invalid config");
        };
        assert_eq!(problems.len(), 3, "{:?}", problems);
    }
}
