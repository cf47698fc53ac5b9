//! Boundary to the vendor tracking service.
//!
//! Every call is fallible and reports an [`SdkStatus`]. Callbacks are invoked
//! on service-owned threads; implementations may call them concurrently with
//! anything the session does on its tick thread.

use crate::config::{Config, RuntimeConfig};
use crate::error::SdkResult;
use crate::types::{
    AreaDescriptionMetadata, CameraId, CameraIntrinsics, FramePair, ImageBuffer, PointCloud, RawPose,
    TangoEvent,
};
use std::path::Path;
use std::sync::Arc;

pub type PoseCallback = Arc<dyn Fn(&RawPose) + Send + Sync>;
pub type EventCallback = Arc<dyn Fn(&TangoEvent) + Send + Sync>;
pub type PointCloudCallback = Arc<dyn Fn(&PointCloud) + Send + Sync>;
pub type FrameCallback = Arc<dyn Fn(&ImageBuffer) + Send + Sync>;

/// How an export request finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The export returned synchronously with this success flag.
    Completed(bool),
    /// The result arrives later as an export-result event.
    Pending,
}

/// Operations the session needs from the tracking service.
pub trait TangoSdk: Send + Sync {
    /// Apply `config` and bind to the service.
    fn connect(&self, config: &Config) -> SdkResult<()>;

    /// Unbind from the service and drop every registered callback.
    fn disconnect(&self);

    fn apply_runtime_config(&self, runtime: &RuntimeConfig) -> SdkResult<()>;

    /// Replace the pose callback and the set of pairs it reports.
    fn connect_on_pose_available(&self, pairs: &[FramePair], callback: PoseCallback) -> SdkResult<()>;

    fn connect_on_event(&self, callback: EventCallback) -> SdkResult<()>;

    fn connect_on_point_cloud(&self, callback: PointCloudCallback) -> SdkResult<()>;

    fn connect_on_frame_available(&self, camera: CameraId, callback: FrameCallback) -> SdkResult<()>;

    fn disconnect_camera(&self, camera: CameraId) -> SdkResult<()>;

    /// Pose of `pair` at `timestamp`; a timestamp of 0 asks for the latest.
    fn get_pose_at_time(&self, timestamp: f64, pair: FramePair) -> SdkResult<RawPose>;

    fn get_camera_intrinsics(&self, camera: CameraId) -> SdkResult<CameraIntrinsics>;

    fn reset_motion_tracking(&self);

    /// Persist the current map. Blocks until the service has written it and
    /// returns the UUID it assigned.
    fn save_area_description(&self) -> SdkResult<String>;

    fn get_area_description_metadata(&self, uuid: &str) -> SdkResult<AreaDescriptionMetadata>;

    fn save_area_description_metadata(&self, uuid: &str, metadata: &AreaDescriptionMetadata) -> SdkResult<()>;

    fn delete_area_description(&self, uuid: &str) -> SdkResult<()>;

    fn list_area_description_uuids(&self) -> SdkResult<Vec<String>>;

    /// Import a file and return the UUID it was stored under.
    fn import_area_description(&self, path: &Path) -> SdkResult<String>;

    fn export_area_description(&self, uuid: &str, path: &Path) -> SdkResult<ExportOutcome>;
}
