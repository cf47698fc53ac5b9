//! The device session: connection lifecycle, submodules and the per-tick
//! update that hands service data to listeners.

use crate::ar::{ArCameraModel, ViewportSource, DEFAULT_FAR_CLIP, DEFAULT_NEAR_CLIP};
use crate::area_learning::{AreaLearning, SaveCoordinator, SaveTask};
use crate::config::{Config, RuntimeConfig};
use crate::event::EventBroker;
use crate::image::{ImageResolver, VideoTexture};
use crate::listener::{
    EventListener, ListenerId, PointCloudListener, PointCloudListeners, PoseListener, PoseListeners,
};
use crate::motion::MotionResolver;
use crate::point_cloud::PointCloudManager;
use crate::sdk::{EventCallback, ExportOutcome, TangoSdk};
use crate::types::{
    AreaDescription, AreaDescriptionMetadata, CameraId, CameraIntrinsics, Capabilities, CoordinateFrame,
    FramePair, PoseSample, SessionState, SharedPointCloud, TangoEvent, Wgs84Pose,
};
use crate::{Result, TangoError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Status bits shared between the session and its submodules.
#[derive(Debug, Default)]
pub struct SessionFlags {
    running: AtomicBool,
    data_ready: AtomicBool,
}

impl SessionFlags {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Running, and the camera model needed to interpret poses is known.
    pub fn is_data_ready(&self) -> bool {
        self.is_running() && self.data_ready.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn set_data_ready(&self, ready: bool) {
        self.data_ready.store(ready, Ordering::SeqCst);
    }
}

/// Submodules alive for the current connection.
#[derive(Default)]
struct Submodules {
    motion: Option<MotionResolver>,
    image: Option<ImageResolver>,
    point_cloud: Option<PointCloudManager>,
    area_learning: Option<AreaLearning>,
}

impl Submodules {
    fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::empty();
        caps.set(Capabilities::MOTION, self.motion.is_some());
        caps.set(Capabilities::IMAGE, self.image.is_some());
        caps.set(Capabilities::DEPTH, self.point_cloud.is_some());
        caps.set(Capabilities::AREA_LEARNING, self.area_learning.is_some());
        caps
    }
}

/// One session with the tracking service.
///
/// All methods are meant to be called from a single tick thread. Service
/// callbacks only append to buffers that [`DeviceSession::tick`] drains.
pub struct DeviceSession {
    sdk: Arc<dyn TangoSdk>,
    state: SessionState,
    flags: Arc<SessionFlags>,
    config: Option<Config>,
    runtime: RuntimeConfig,
    submodules: Submodules,
    events: EventBroker,
    pose_listeners: PoseListeners,
    point_cloud_listeners: PointCloudListeners,
    requests_changed: bool,
    saves: SaveCoordinator,
    texture: Arc<VideoTexture>,
    viewport: Option<Arc<dyn ViewportSource>>,
    ar: Option<ArCameraModel>,
    area_dir: PathBuf,
    resume_after_pause: bool,
}

impl DeviceSession {
    /// Create a disconnected session. Area descriptions are exported under `area_dir`.
    pub fn new(sdk: Arc<dyn TangoSdk>, area_dir: impl Into<PathBuf>) -> Self {
        Self {
            sdk,
            state: SessionState::Disconnected,
            flags: Arc::new(SessionFlags::default()),
            config: None,
            runtime: RuntimeConfig::default(),
            submodules: Submodules::default(),
            events: EventBroker::new(),
            pose_listeners: PoseListeners::new(),
            point_cloud_listeners: PointCloudListeners::new(),
            requests_changed: false,
            saves: SaveCoordinator::new(),
            texture: VideoTexture::new(),
            viewport: None,
            ar: None,
            area_dir: area_dir.into(),
            resume_after_pause: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.flags.is_running()
    }

    pub fn is_data_ready(&self) -> bool {
        self.flags.is_data_ready()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.submodules.capabilities()
    }

    /// Connect-time configuration of the current or last connection.
    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        self.runtime
    }

    // ---- lifecycle ----

    /// Connect with `config`. When already connected with an equivalent
    /// configuration only `runtime` is applied; a different one reconnects.
    pub fn start_service(&mut self, config: Config, runtime: RuntimeConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            log::error!("start_service: {}", e);
            return Err(e);
        }

        if self.state == SessionState::Connected {
            let unchanged = self
                .config
                .as_ref()
                .is_some_and(|current| !current.requires_reconnect(&config));
            if unchanged {
                log::info!("start_service: configuration unchanged, applying runtime config only");
                return self.set_runtime_config(runtime, false);
            }
            log::info!("start_service: configuration changed, reconnecting");
            self.disconnect(false);
        }

        self.resume_after_pause = false;
        self.state = SessionState::Connecting;
        log::info!("Connecting to tracking service");
        match self.connect(config, runtime) {
            Ok(()) => {
                self.state = SessionState::Connected;
                log::info!("Tracking service connected ({:?})", self.capabilities());
                self.events.broadcast_connect();
                Ok(())
            }
            Err(e) => {
                log::error!("Connecting to tracking service failed: {}", e);
                self.teardown();
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Tear the session down completely, then start it again.
    pub fn restart_service(&mut self, config: Config, runtime: RuntimeConfig) -> Result<()> {
        if self.state != SessionState::Disconnected {
            self.disconnect(false);
        }
        self.resume_after_pause = false;
        self.start_service(config, runtime)
    }

    /// Disconnect and release every submodule. No-op when already disconnected.
    pub fn stop_service(&mut self) {
        self.resume_after_pause = false;
        match self.state {
            SessionState::Disconnected => {}
            SessionState::PausedByHostApp => self.state = SessionState::Disconnected,
            SessionState::Connecting | SessionState::Connected => self.disconnect(false),
        }
    }

    /// Apply the mutable subset of the configuration. Before connecting, or
    /// with `is_pre_connect`, the values are only stored for the next start.
    pub fn set_runtime_config(&mut self, update: RuntimeConfig, is_pre_connect: bool) -> Result<()> {
        if is_pre_connect || self.state != SessionState::Connected {
            self.runtime = update;
            return Ok(());
        }
        self.sdk
            .apply_runtime_config(&update)
            .map_err(TangoError::sdk("apply_runtime_config"))?;
        let allowed = match &self.config {
            Some(config) => update.limited_by(config),
            None => update,
        };
        if let Some(image) = self.submodules.image.as_mut() {
            image.set_runtime_config(&allowed)?;
        }
        self.runtime = update;
        Ok(())
    }

    /// Host application went to the background.
    pub fn on_app_pause(&mut self) {
        if self.state == SessionState::Connected {
            log::info!("Host app paused, disconnecting");
            self.disconnect(true);
            self.resume_after_pause = true;
        }
    }

    /// Host application came back; reconnects if a pause disconnected us.
    pub fn on_app_resume(&mut self) -> Result<()> {
        if self.state != SessionState::PausedByHostApp || !self.resume_after_pause {
            return Ok(());
        }
        self.resume_after_pause = false;
        self.state = SessionState::Disconnected;
        let Some(config) = self.config.clone() else {
            return Ok(());
        };
        log::info!("Host app resumed, reconnecting");
        self.start_service(config, self.runtime)
    }

    fn connect(&mut self, config: Config, runtime: RuntimeConfig) -> Result<()> {
        let sdk = self.sdk.clone();
        sdk.connect(&config)
            .map_err(|status| TangoError::Configuration(format!("connect: {}", status)))?;
        sdk.apply_runtime_config(&runtime)
            .map_err(|status| TangoError::Configuration(format!("runtime config: {}", status)))?;

        let sink = self.events.sink();
        let on_event: EventCallback = Arc::new(move |event: &TangoEvent| sink.push(event.clone()));
        sdk.connect_on_event(on_event)
            .map_err(|status| TangoError::Configuration(format!("event callback: {}", status)))?;

        self.flags.set_running(true);

        if config.enable_motion_tracking {
            let mut motion = MotionResolver::new(sdk.clone(), self.flags.clone(), config.meters_to_world_scale);
            motion.check_for_change_in_requests(&self.pose_listeners);
            self.submodules.motion = Some(motion);
        }
        self.submodules.image = Some(ImageResolver::new(
            sdk.clone(),
            self.texture.clone(),
            &runtime.limited_by(&config),
        ));
        if config.enable_depth {
            let manager = PointCloudManager::new(sdk.clone(), config.max_point_cloud_elements);
            manager.connect_callback()?;
            self.submodules.point_cloud = Some(manager);
        }
        self.submodules.area_learning = Some(AreaLearning::new(sdk, self.area_dir.clone())?);

        self.config = Some(config);
        self.runtime = runtime;
        self.requests_changed = false;
        self.update_data_ready();
        Ok(())
    }

    fn disconnect(&mut self, by_pause: bool) {
        log::info!("Disconnecting from tracking service{}", if by_pause { " (pause)" } else { "" });
        self.teardown();
        if by_pause {
            self.state = SessionState::PausedByHostApp;
        } else {
            self.state = SessionState::Disconnected;
            self.events.broadcast_disconnect();
        }
    }

    fn teardown(&mut self) {
        self.flags.set_running(false);
        self.flags.set_data_ready(false);
        self.submodules = Submodules::default();
        self.ar = None;
        self.sdk.disconnect();
    }

    // ---- per tick ----

    /// Advance one frame: deliver events, poses, camera frames and depth.
    pub fn tick(&mut self) {
        let saves = self.saves.clone();
        self.events.drain_and_broadcast(|event| saves.handle_event(event));

        if self.pose_listeners.prune() > 0 {
            self.requests_changed = true;
        }
        self.events.prune();
        self.point_cloud_listeners.prune();

        if self.state != SessionState::Connected {
            return;
        }
        self.update_data_ready();

        if let Some(motion) = self.submodules.motion.as_mut() {
            if self.requests_changed {
                motion.check_for_change_in_requests(&self.pose_listeners);
                self.requests_changed = false;
            }
            motion.tick(&self.pose_listeners);
        }
        if let Some(image) = self.submodules.image.as_mut() {
            image.tick();
        }
        if let Some(point_cloud) = self.submodules.point_cloud.as_mut() {
            point_cloud.tick(&self.point_cloud_listeners);
        }
    }

    fn update_data_ready(&mut self) {
        if !self.flags.is_running() {
            self.flags.set_data_ready(false);
            return;
        }
        if self.ar.is_none() {
            self.ar = self.fill_ar_camera();
        }
        self.flags.set_data_ready(self.ar.is_some());
    }

    fn fill_ar_camera(&self) -> Option<ArCameraModel> {
        let intrinsics = match self.sdk.get_camera_intrinsics(CameraId::Color) {
            Ok(intrinsics) => intrinsics,
            Err(status) => {
                log::debug!("Color intrinsics not available yet: {}", status);
                return None;
            }
        };
        let viewport = match &self.viewport {
            Some(source) => source.viewport_size()?,
            None => (intrinsics.width, intrinsics.height),
        };
        match ArCameraModel::new(intrinsics, viewport, DEFAULT_NEAR_CLIP, DEFAULT_FAR_CLIP) {
            Ok(model) => Some(model),
            Err(e) => {
                log::warn!("AR camera model unavailable: {}", e);
                None
            }
        }
    }

    // ---- listeners ----

    /// Receive poses for `pairs` once per tick while `listener` is alive.
    pub fn add_pose_listener(&mut self, listener: Weak<dyn PoseListener>, pairs: Vec<FramePair>) -> ListenerId {
        self.requests_changed = true;
        self.pose_listeners.add(listener, pairs)
    }

    pub fn remove_pose_listener(&mut self, id: ListenerId) -> bool {
        let removed = self.pose_listeners.remove(id);
        self.requests_changed |= removed;
        removed
    }

    pub fn add_event_listener(&mut self, listener: Weak<dyn EventListener>) -> ListenerId {
        self.events.add_listener(listener)
    }

    pub fn remove_event_listener(&mut self, id: ListenerId) -> bool {
        self.events.remove_listener(id)
    }

    pub fn add_point_cloud_listener(&mut self, listener: Weak<dyn PointCloudListener>) -> ListenerId {
        self.point_cloud_listeners.add(listener, ())
    }

    pub fn remove_point_cloud_listener(&mut self, id: ListenerId) -> bool {
        self.point_cloud_listeners.remove(id)
    }

    // ---- submodules ----

    pub fn motion(&self) -> Option<&MotionResolver> {
        self.submodules.motion.as_ref()
    }

    pub fn image(&self) -> Option<&ImageResolver> {
        self.submodules.image.as_ref()
    }

    pub fn point_cloud(&self) -> Option<&PointCloudManager> {
        self.submodules.point_cloud.as_ref()
    }

    pub fn area_learning(&self) -> Option<&AreaLearning> {
        self.submodules.area_learning.as_ref()
    }

    fn require_area_learning(&self) -> Result<&AreaLearning> {
        self.submodules
            .area_learning
            .as_ref()
            .ok_or(TangoError::ServiceNotRunning)
    }

    // ---- poses ----

    /// Pose of `pair` at `timestamp` (0 for the latest). Never fails: an
    /// unavailable pose comes back with an `Unknown` or `Invalid` status.
    pub fn get_pose_at_time(&mut self, pair: FramePair, timestamp: f64) -> PoseSample {
        match self.submodules.motion.as_mut() {
            Some(motion) => motion.get_pose_at_time(pair, timestamp),
            None => PoseSample::default(),
        }
    }

    pub fn get_wgs84_pose_at_time(&self, target: CoordinateFrame, timestamp: f64) -> Wgs84Pose {
        self.motion()
            .map(|m| m.get_wgs84_pose_at_time(target, timestamp))
            .unwrap_or_default()
    }

    pub fn is_localized(&self, use_area_description: bool) -> bool {
        self.motion().is_some_and(|m| m.is_localized(use_area_description))
    }

    pub fn reset_motion_tracking(&self) -> Result<()> {
        let motion = self.motion().ok_or(TangoError::ServiceNotRunning)?;
        motion.reset_motion_tracking();
        Ok(())
    }

    // ---- camera, texture, depth ----

    /// Calibration of `camera`. A camera the service has no calibration for
    /// fails with [`TangoError::QueryFailure`].
    pub fn camera_intrinsics(&self, camera: CameraId) -> Result<CameraIntrinsics> {
        if !self.is_running() {
            return Err(TangoError::ServiceNotRunning);
        }
        self.sdk
            .get_camera_intrinsics(camera)
            .map_err(TangoError::QueryFailure)
    }

    /// Supply the host viewport size used by the AR camera model.
    pub fn set_viewport_source(&mut self, source: Arc<dyn ViewportSource>) {
        self.viewport = Some(source);
        self.ar = None;
        self.update_data_ready();
    }

    pub fn ar_camera(&self) -> Option<&ArCameraModel> {
        self.ar.as_ref()
    }

    pub fn video_texture(&self) -> Arc<VideoTexture> {
        self.texture.clone()
    }

    pub fn latest_point_cloud(&self) -> Option<SharedPointCloud> {
        self.point_cloud().and_then(PointCloudManager::latest)
    }

    // ---- area descriptions ----

    /// Area description selected in the current configuration.
    pub fn loaded_area_description(&self) -> Option<&AreaDescription> {
        self.config.as_ref().and_then(|c| c.area_description.as_ref())
    }

    pub fn area_descriptions(&self) -> Result<Vec<AreaDescription>> {
        self.require_area_learning()?.area_descriptions()
    }

    pub fn delete_area_description(&self, uuid: &str) -> Result<()> {
        self.require_area_learning()?.delete_area_description(uuid)
    }

    pub fn area_description_metadata(&self, uuid: &str) -> Result<AreaDescriptionMetadata> {
        self.require_area_learning()?.metadata(uuid)
    }

    pub fn save_area_description_metadata(&self, uuid: &str, metadata: &AreaDescriptionMetadata) -> Result<()> {
        self.require_area_learning()?.save_metadata(uuid, metadata)
    }

    pub fn import_area_description(&self, path: &Path) -> Result<AreaDescription> {
        self.require_area_learning()?.import(path)
    }

    pub fn export_area_description(&self, uuid: &str, path: &Path) -> Result<ExportOutcome> {
        self.require_area_learning()?.export(uuid, path)
    }

    /// Save the learned area as `filename` on a worker thread.
    ///
    /// Only one save per `target` may be outstanding; a second one is
    /// rejected without touching the first. If the session cannot save right
    /// now the returned task has already failed.
    pub fn save_current_area(&self, target: &str, filename: &str) -> Result<SaveTask> {
        let job = match (self.area_learning(), self.save_blocker()) {
            (_, Some(reason)) => Err(reason),
            (Some(learning), None) => Ok(learning.save_job(filename)),
            (None, None) => Err("tracking service is not running".to_string()),
        };
        self.saves.start(target, job)
    }

    pub fn save_coordinator(&self) -> &SaveCoordinator {
        &self.saves
    }

    fn save_blocker(&self) -> Option<String> {
        let Some(config) = self.config.as_ref().filter(|_| self.is_running()) else {
            return Some("tracking service is not running".into());
        };
        if !config.enable_learning_mode {
            return Some("learning mode is disabled".into());
        }
        let Some(motion) = self.motion() else {
            return Some("motion tracking is disabled".into());
        };
        if !motion.is_localized(true) {
            return Some("not localized yet".into());
        }
        None
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.is_running() {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SdkStatus;
    use crate::sim::SimulatedSdk;
    use crate::types::{PoseStatus, RawPose};

    fn session() -> (Arc<SimulatedSdk>, DeviceSession, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sdk = Arc::new(SimulatedSdk::new());
        let session = DeviceSession::new(sdk.clone(), dir.path());
        (sdk, session, dir)
    }

    #[test]
    fn test_capabilities_follow_config() {
        let (_sdk, mut session, _dir) = session();
        assert!(session.capabilities().is_empty());

        let config = Config {
            enable_depth: true,
            ..Config::default()
        };
        session.start_service(config, RuntimeConfig::default()).unwrap();
        assert_eq!(session.capabilities(), Capabilities::all());

        session.stop_service();
        assert!(session.capabilities().is_empty());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_invalid_config_never_connects() {
        let (sdk, mut session, _dir) = session();
        let config = Config {
            meters_to_world_scale: 0.0,
            ..Config::default()
        };
        assert!(matches!(
            session.start_service(config, RuntimeConfig::default()),
            Err(TangoError::Configuration(_))
        ));
        assert_eq!(sdk.connect_count(), 0);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_connect_failure_stays_disconnected() {
        let (sdk, mut session, _dir) = session();
        sdk.set_fail_connect(true);
        assert!(session.start_service(Config::default(), RuntimeConfig::default()).is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_running());
        assert!(session.motion().is_none());
    }

    #[test]
    fn test_same_config_does_not_reconnect() {
        let (sdk, mut session, _dir) = session();
        session.start_service(Config::default(), RuntimeConfig::default()).unwrap();
        session.start_service(Config::default(), RuntimeConfig::default()).unwrap();
        assert_eq!(sdk.connect_count(), 1);

        let changed = Config {
            enable_learning_mode: true,
            ..Config::default()
        };
        session.start_service(changed, RuntimeConfig::default()).unwrap();
        assert_eq!(sdk.connect_count(), 2);
        assert!(session.config().unwrap().enable_learning_mode);
    }

    #[test]
    fn test_pause_and_resume() {
        let (sdk, mut session, _dir) = session();
        session.start_service(Config::default(), RuntimeConfig::default()).unwrap();
        session.on_app_pause();
        assert_eq!(session.state(), SessionState::PausedByHostApp);
        assert!(!sdk.is_connected());

        session.on_app_resume().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(sdk.connect_count(), 2);

        // Resume without a preceding pause does nothing.
        session.on_app_resume().unwrap();
        assert_eq!(sdk.connect_count(), 2);
    }

    #[test]
    fn test_stop_while_paused_cancels_resume() {
        let (sdk, mut session, _dir) = session();
        session.start_service(Config::default(), RuntimeConfig::default()).unwrap();
        session.on_app_pause();
        session.stop_service();
        session.on_app_resume().unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(sdk.connect_count(), 1);
    }

    #[test]
    fn test_data_ready_needs_viewport() {
        struct NoViewport;
        impl ViewportSource for NoViewport {
            fn viewport_size(&self) -> Option<(u32, u32)> {
                None
            }
        }

        let (sdk, mut session, _dir) = session();
        session.set_viewport_source(Arc::new(NoViewport));
        session.start_service(Config::default(), RuntimeConfig::default()).unwrap();
        assert!(session.is_running());
        assert!(!session.is_data_ready());

        let pair = FramePair::new(CoordinateFrame::StartOfService, CoordinateFrame::Device);
        sdk.set_pose(RawPose::new(pair, [0.0; 3], [0.0, 0.0, 0.0, 1.0], 1.0));
        assert_eq!(session.get_pose_at_time(pair, 1.0).status, PoseStatus::Unknown);
        assert_eq!(sdk.pose_query_count(), 0);
    }

    #[test]
    fn test_missing_intrinsics_is_query_failure() {
        let (_sdk, mut session, _dir) = session();
        session.start_service(Config::default(), RuntimeConfig::default()).unwrap();
        assert_eq!(session.camera_intrinsics(CameraId::Color).unwrap().width, 1280);
        assert!(matches!(
            session.camera_intrinsics(CameraId::Fisheye),
            Err(TangoError::QueryFailure(SdkStatus::InvalidArgument))
        ));
    }

    #[test]
    fn test_area_calls_require_connection() {
        let (_sdk, session, _dir) = session();
        assert!(matches!(session.area_descriptions(), Err(TangoError::ServiceNotRunning)));
        assert!(matches!(session.reset_motion_tracking(), Err(TangoError::ServiceNotRunning)));
        assert!(matches!(
            session.camera_intrinsics(CameraId::Color),
            Err(TangoError::ServiceNotRunning)
        ));
    }
}
