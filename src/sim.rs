//! In-process stand-in for the tracking service.
//!
//! `SimulatedSdk` keeps scripted poses and an in-memory area store, counts
//! the calls the session makes, and lets a test or demo drive the registered
//! callbacks from whichever thread it likes.

use crate::config::{Config, RuntimeConfig};
use crate::error::{SdkResult, SdkStatus};
use crate::sdk::{
    EventCallback, ExportOutcome, FrameCallback, PointCloudCallback, PoseCallback, TangoSdk,
};
use crate::types::{
    AreaDescriptionMetadata, CalibrationType, CameraId, CameraIntrinsics, FramePair, ImageBuffer,
    PointCloud, RawPose, TangoEvent,
};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Holds `save_area_description` blocked until released or dropped.
pub struct SaveGate {
    sender: Sender<()>,
}

impl SaveGate {
    pub fn release(self) {
        let _ = self.sender.send(());
    }
}

#[derive(Default)]
struct Callbacks {
    pose: Option<(Vec<FramePair>, PoseCallback)>,
    event: Option<EventCallback>,
    point_cloud: Option<PointCloudCallback>,
    frames: HashMap<CameraId, FrameCallback>,
}

pub struct SimulatedSdk {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_pose_queries: AtomicBool,
    pose_queries: AtomicUsize,
    pose_connects: AtomicUsize,
    connects: AtomicUsize,
    next_uuid: AtomicU64,
    poses: Mutex<HashMap<FramePair, RawPose>>,
    callbacks: Mutex<Callbacks>,
    intrinsics: Mutex<HashMap<CameraId, CameraIntrinsics>>,
    areas: Mutex<BTreeMap<String, AreaDescriptionMetadata>>,
    save_gate: Mutex<Option<Receiver<()>>>,
    export_outcome: Mutex<ExportOutcome>,
    exports: Mutex<Vec<(String, String)>>,
    runtime: Mutex<Option<RuntimeConfig>>,
}

impl Default for SimulatedSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSdk {
    pub fn new() -> Self {
        let mut intrinsics = HashMap::new();
        intrinsics.insert(
            CameraId::Color,
            CameraIntrinsics {
                camera: CameraId::Color,
                calibration: CalibrationType::Polynomial3,
                width: 1280,
                height: 720,
                fx: 1040.0,
                fy: 1040.0,
                cx: 640.0,
                cy: 360.0,
                distortion: vec![0.23, -0.68, 0.64],
            },
        );
        Self {
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_pose_queries: AtomicBool::new(false),
            pose_queries: AtomicUsize::new(0),
            pose_connects: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            next_uuid: AtomicU64::new(1),
            poses: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Callbacks::default()),
            intrinsics: Mutex::new(intrinsics),
            areas: Mutex::new(BTreeMap::new()),
            save_gate: Mutex::new(None),
            export_outcome: Mutex::new(ExportOutcome::Completed(true)),
            exports: Mutex::new(Vec::new()),
            runtime: Mutex::new(None),
        }
    }

    /// Script the answer `get_pose_at_time` gives for `pose.frame`.
    pub fn set_pose(&self, pose: RawPose) {
        self.poses.lock().insert(pose.frame, pose);
    }

    pub fn clear_pose(&self, pair: FramePair) {
        self.poses.lock().remove(&pair);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_pose_queries(&self, fail: bool) {
        self.fail_pose_queries.store(fail, Ordering::SeqCst);
    }

    pub fn set_export_outcome(&self, outcome: ExportOutcome) {
        *self.export_outcome.lock() = outcome;
    }

    /// Block the next save until the returned gate is released.
    pub fn hold_saves(&self) -> SaveGate {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        *self.save_gate.lock() = Some(receiver);
        SaveGate { sender }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn pose_query_count(&self) -> usize {
        self.pose_queries.load(Ordering::SeqCst)
    }

    /// Number of times the pose callback was (re)registered.
    pub fn pose_connect_count(&self) -> usize {
        self.pose_connects.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn registered_pose_pairs(&self) -> Vec<FramePair> {
        self.callbacks
            .lock()
            .pose
            .as_ref()
            .map(|(pairs, _)| pairs.clone())
            .unwrap_or_default()
    }

    pub fn has_frame_callback(&self, camera: CameraId) -> bool {
        self.callbacks.lock().frames.contains_key(&camera)
    }

    pub fn last_runtime_config(&self) -> Option<RuntimeConfig> {
        *self.runtime.lock()
    }

    pub fn exports(&self) -> Vec<(String, String)> {
        self.exports.lock().clone()
    }

    /// Deliver a pose through the registered callback, if its pair was requested.
    pub fn emit_pose(&self, pose: &RawPose) -> bool {
        let cb = {
            let callbacks = self.callbacks.lock();
            match &callbacks.pose {
                Some((pairs, cb)) if pairs.contains(&pose.frame) => Some(cb.clone()),
                _ => None,
            }
        };
        match cb {
            Some(cb) => {
                cb(pose);
                true
            }
            None => false,
        }
    }

    pub fn emit_event(&self, event: &TangoEvent) -> bool {
        let cb = self.callbacks.lock().event.clone();
        cb.map(|cb| cb(event)).is_some()
    }

    pub fn emit_point_cloud(&self, cloud: &PointCloud) -> bool {
        let cb = self.callbacks.lock().point_cloud.clone();
        cb.map(|cb| cb(cloud)).is_some()
    }

    pub fn emit_frame(&self, buffer: &ImageBuffer) -> bool {
        let cb = self.callbacks.lock().frames.get(&buffer.camera).cloned();
        cb.map(|cb| cb(buffer)).is_some()
    }

    fn require_connected(&self) -> SdkResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SdkStatus::NotReady)
        }
    }
}

impl TangoSdk for SimulatedSdk {
    fn connect(&self, _config: &Config) -> SdkResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SdkStatus::Error);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.callbacks.lock() = Callbacks::default();
    }

    fn apply_runtime_config(&self, runtime: &RuntimeConfig) -> SdkResult<()> {
        *self.runtime.lock() = Some(*runtime);
        Ok(())
    }

    fn connect_on_pose_available(&self, pairs: &[FramePair], callback: PoseCallback) -> SdkResult<()> {
        self.require_connected()?;
        self.pose_connects.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().pose = Some((pairs.to_vec(), callback));
        Ok(())
    }

    fn connect_on_event(&self, callback: EventCallback) -> SdkResult<()> {
        self.require_connected()?;
        self.callbacks.lock().event = Some(callback);
        Ok(())
    }

    fn connect_on_point_cloud(&self, callback: PointCloudCallback) -> SdkResult<()> {
        self.require_connected()?;
        self.callbacks.lock().point_cloud = Some(callback);
        Ok(())
    }

    fn connect_on_frame_available(&self, camera: CameraId, callback: FrameCallback) -> SdkResult<()> {
        self.require_connected()?;
        self.callbacks.lock().frames.insert(camera, callback);
        Ok(())
    }

    fn disconnect_camera(&self, camera: CameraId) -> SdkResult<()> {
        self.callbacks.lock().frames.remove(&camera);
        Ok(())
    }

    fn get_pose_at_time(&self, timestamp: f64, pair: FramePair) -> SdkResult<RawPose> {
        self.pose_queries.fetch_add(1, Ordering::SeqCst);
        self.require_connected()?;
        if self.fail_pose_queries.load(Ordering::SeqCst) {
            return Err(SdkStatus::Error);
        }
        let mut pose = *self.poses.lock().get(&pair).ok_or(SdkStatus::NotReady)?;
        if timestamp != 0.0 {
            pose.timestamp = timestamp;
        }
        Ok(pose)
    }

    fn get_camera_intrinsics(&self, camera: CameraId) -> SdkResult<CameraIntrinsics> {
        self.require_connected()?;
        self.intrinsics
            .lock()
            .get(&camera)
            .cloned()
            .ok_or(SdkStatus::InvalidArgument)
    }

    fn reset_motion_tracking(&self) {
        log::info!("Simulated motion tracking reset");
    }

    fn save_area_description(&self) -> SdkResult<String> {
        let gate = self.save_gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        let uuid = format!("sim-adf-{:04}", self.next_uuid.fetch_add(1, Ordering::SeqCst));
        self.areas.lock().insert(uuid.clone(), AreaDescriptionMetadata::default());
        Ok(uuid)
    }

    fn get_area_description_metadata(&self, uuid: &str) -> SdkResult<AreaDescriptionMetadata> {
        self.areas.lock().get(uuid).cloned().ok_or(SdkStatus::InvalidArgument)
    }

    fn save_area_description_metadata(&self, uuid: &str, metadata: &AreaDescriptionMetadata) -> SdkResult<()> {
        match self.areas.lock().get_mut(uuid) {
            Some(slot) => {
                *slot = metadata.clone();
                Ok(())
            }
            None => Err(SdkStatus::InvalidArgument),
        }
    }

    fn delete_area_description(&self, uuid: &str) -> SdkResult<()> {
        self.areas
            .lock()
            .remove(uuid)
            .map(|_| ())
            .ok_or(SdkStatus::InvalidArgument)
    }

    fn list_area_description_uuids(&self) -> SdkResult<Vec<String>> {
        Ok(self.areas.lock().keys().cloned().collect())
    }

    fn import_area_description(&self, path: &Path) -> SdkResult<String> {
        let uuid = format!("sim-adf-{:04}", self.next_uuid.fetch_add(1, Ordering::SeqCst));
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.areas.lock().insert(
            uuid.clone(),
            AreaDescriptionMetadata {
                name,
                ..AreaDescriptionMetadata::default()
            },
        );
        Ok(uuid)
    }

    fn export_area_description(&self, uuid: &str, path: &Path) -> SdkResult<ExportOutcome> {
        if !self.areas.lock().contains_key(uuid) {
            return Err(SdkStatus::InvalidArgument);
        }
        self.exports
            .lock()
            .push((uuid.to_string(), path.to_string_lossy().to_string()));
        Ok(*self.export_outcome.lock())
    }
}
