use crate::geometry::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Coordinate frames the tracking service can relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CoordinateFrame {
    GlobalWgs84,
    AreaDescription,
    StartOfService,
    PreviousDevicePose,
    Device,
    Imu,
    Display,
    CameraColor,
    CameraDepth,
    CameraFisheye,
}

impl CoordinateFrame {
    pub const ALL: [CoordinateFrame; 10] = [
        CoordinateFrame::GlobalWgs84,
        CoordinateFrame::AreaDescription,
        CoordinateFrame::StartOfService,
        CoordinateFrame::PreviousDevicePose,
        CoordinateFrame::Device,
        CoordinateFrame::Imu,
        CoordinateFrame::Display,
        CoordinateFrame::CameraColor,
        CoordinateFrame::CameraDepth,
        CoordinateFrame::CameraFisheye,
    ];

    /// Frames whose pose only the live tracker knows.
    pub fn is_trackable(self) -> bool {
        matches!(
            self,
            CoordinateFrame::GlobalWgs84
                | CoordinateFrame::AreaDescription
                | CoordinateFrame::StartOfService
                | CoordinateFrame::PreviousDevicePose
        )
    }

    /// Frames rigidly attached to the device body.
    pub fn is_body_fixed(self) -> bool {
        !self.is_trackable()
    }

    pub fn is_camera(self) -> bool {
        matches!(
            self,
            CoordinateFrame::CameraColor | CoordinateFrame::CameraDepth | CoordinateFrame::CameraFisheye
        )
    }
}

impl std::fmt::Display for CoordinateFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CoordinateFrame::GlobalWgs84 => "global_wgs84",
            CoordinateFrame::AreaDescription => "area_description",
            CoordinateFrame::StartOfService => "start_of_service",
            CoordinateFrame::PreviousDevicePose => "previous_device_pose",
            CoordinateFrame::Device => "device",
            CoordinateFrame::Imu => "imu",
            CoordinateFrame::Display => "display",
            CoordinateFrame::CameraColor => "camera_color",
            CoordinateFrame::CameraDepth => "camera_depth",
            CoordinateFrame::CameraFisheye => "camera_fisheye",
        };
        f.write_str(name)
    }
}

/// Target frame expressed in base frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramePair {
    pub base: CoordinateFrame,
    pub target: CoordinateFrame,
}

impl FramePair {
    pub const fn new(base: CoordinateFrame, target: CoordinateFrame) -> Self {
        Self { base, target }
    }
}

impl Default for FramePair {
    fn default() -> Self {
        Self::new(CoordinateFrame::StartOfService, CoordinateFrame::Device)
    }
}

impl std::fmt::Display for FramePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.base, self.target)
    }
}

/// Tracking validity attached to every pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoseStatus {
    Initializing,
    Valid,
    Invalid,
    #[default]
    Unknown,
}

/// Pose as delivered by the tracking service, in vendor axes and meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPose {
    pub translation: [f64; 3],
    /// Quaternion `[x, y, z, w]`.
    pub orientation: [f64; 4],
    pub frame: FramePair,
    pub status: PoseStatus,
    /// Seconds since the service started.
    pub timestamp: f64,
}

impl RawPose {
    pub fn new(frame: FramePair, translation: [f64; 3], orientation: [f64; 4], timestamp: f64) -> Self {
        Self {
            translation,
            orientation,
            frame,
            status: PoseStatus::Valid,
            timestamp,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.translation)
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_xyzw(self.orientation)
    }

    /// Integrate a relative motion sample on top of this one:
    /// p = q_self * p_next + p_self, q = q_self * q_next.
    pub fn accumulate(&self, next: &RawPose) -> RawPose {
        let q = self.rotation();
        RawPose {
            translation: (q * next.position() + self.position()).to_array(),
            orientation: (q * next.rotation()).to_xyzw(),
            ..*next
        }
    }
}

/// Pose resolved into host-engine axes and world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub position: Vec3,
    pub rotation: Quat,
    /// `[roll, pitch, yaw]` in degrees, derived from `rotation`.
    pub euler_deg: [f64; 3],
    pub frame: FramePair,
    pub status: PoseStatus,
    pub timestamp: f64,
}

impl PoseSample {
    pub fn new(position: Vec3, rotation: Quat, frame: FramePair, status: PoseStatus, timestamp: f64) -> Self {
        Self {
            position,
            rotation,
            euler_deg: rotation.to_euler_deg(),
            frame,
            status,
            timestamp,
        }
    }

    /// Zero pose with an `Invalid` status, returned for unresolvable queries.
    pub fn invalid(frame: FramePair) -> Self {
        Self {
            frame,
            status: PoseStatus::Invalid,
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == PoseStatus::Valid
    }
}

impl Default for PoseSample {
    fn default() -> Self {
        Self::new(
            Vec3::ZERO,
            Quat::IDENTITY,
            FramePair::default(),
            PoseStatus::Unknown,
            0.0,
        )
    }
}

/// Double precision pose relative to the global (WGS84/ECEF) frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Wgs84Pose {
    pub position: [f64; 3],
    pub orientation: [f64; 4],
    pub frame: FramePair,
    pub status: PoseStatus,
    pub timestamp: f64,
}

/// Kinds of asynchronous service event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    AreaLearning,
    ColorCamera,
    FeatureTracking,
    FisheyeCamera,
    General,
    Imu,
    Unknown,
}

/// Well-known event keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKey {
    AreaDescriptionSaveProgress,
    ServiceException,
    ColorOverExposed,
    ColorUnderExposed,
    FisheyeOverExposed,
    FisheyeUnderExposed,
    TooFewFeatures,
    ImportResult,
    ExportResult,
    Unknown,
}

/// Status or error event posted by the tracking service.
#[derive(Debug, Clone, PartialEq)]
pub struct TangoEvent {
    pub key: EventKey,
    pub kind: EventType,
    pub message: String,
    pub timestamp: f64,
}

impl TangoEvent {
    pub fn new(key: EventKey, kind: EventType, message: impl Into<String>, timestamp: f64) -> Self {
        Self {
            key,
            kind,
            message: message.into(),
            timestamp,
        }
    }

    /// Events that belong to an outstanding area save rather than to listeners.
    pub fn is_save_feedback(&self) -> bool {
        matches!(
            self.key,
            EventKey::AreaDescriptionSaveProgress | EventKey::ExportResult
        )
    }
}

/// A persisted map the tracker can relocalize against.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AreaDescription {
    /// Identifier assigned by the tracking service.
    pub uuid: String,
    pub filename: String,
}

impl AreaDescription {
    pub fn new(uuid: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            filename: filename.into(),
        }
    }
}

/// Metadata stored alongside an area description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AreaDescriptionMetadata {
    pub name: String,
    pub millis_since_unix_epoch: u64,
    pub position: [f64; 3],
    pub orientation: [f64; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraId {
    Color,
    Depth,
    Fisheye,
    RgbIr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationType {
    Equidistant,
    Polynomial2,
    Polynomial3,
    Polynomial5,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraIntrinsics {
    pub camera: CameraId,
    pub calibration: CalibrationType,
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub distortion: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Rgba8888,
    Yv12,
    YCrCb420Sp,
}

/// Decoded camera frame handed over by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    pub camera: CameraId,
    pub width: u32,
    pub height: u32,
    pub timestamp: f64,
    pub frame_number: u64,
    pub format: ImageFormat,
    pub data: Vec<u8>,
}

/// Depth points `[x, y, z, confidence]` in the depth camera frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointCloud {
    pub timestamp: f64,
    pub points: Vec<[f32; 4]>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Snapshot shared with consumers until the next tick replaces it.
pub type SharedPointCloud = Arc<PointCloud>;

bitflags::bitflags! {
    /// Submodules currently alive in a session.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const MOTION        = 1 << 0;
        const IMAGE         = 1 << 1;
        const DEPTH         = 1 << 2;
        const AREA_LEARNING = 1 << 3;
    }
}

/// Lifecycle of the device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Disconnected because the host app was paused; resumes automatically.
    PausedByHostApp,
}
