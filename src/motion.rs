//! Pose resolution: live queries, per-tick fan-out of streamed poses, and
//! the subscription table behind it.

use crate::conversion::{self, SpaceConversionPair};
use crate::listener::{guarded, ListenerId, PoseListeners};
use crate::sdk::{PoseCallback, TangoSdk};
use crate::session::SessionFlags;
use crate::types::{CoordinateFrame, FramePair, PoseSample, PoseStatus, RawPose, Wgs84Pose};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Relative motion since the previous pose; samples of this pair integrate.
pub const DELTA_PAIR: FramePair =
    FramePair::new(CoordinateFrame::PreviousDevicePose, CoordinateFrame::Device);

/// Raw samples appended by the service's pose callback.
#[derive(Clone, Default)]
pub struct PoseBuffer {
    samples: Arc<Mutex<Vec<RawPose>>>,
}

impl PoseBuffer {
    pub fn push(&self, pose: RawPose) {
        self.samples.lock().push(pose);
    }

    fn take(&self) -> Vec<RawPose> {
        std::mem::take(&mut *self.samples.lock())
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Subscription {
    conversion: SpaceConversionPair,
    listener_ids: Vec<ListenerId>,
}

/// Result of the previous `get_pose_at_time`, valid for one tick.
struct Memo {
    pair: FramePair,
    timestamp: f64,
    frame: u64,
    pose: PoseSample,
}

pub struct MotionResolver {
    sdk: Arc<dyn TangoSdk>,
    flags: Arc<SessionFlags>,
    meters_to_world: f64,
    buffer: PoseBuffer,
    latest_by_frame: HashMap<FramePair, RawPose>,
    /// Queried pair -> requested pair -> who wants it.
    subscriptions: HashMap<FramePair, HashMap<FramePair, Subscription>>,
    frame: u64,
    memo: Option<Memo>,
    callback_connected: bool,
}

impl MotionResolver {
    pub fn new(sdk: Arc<dyn TangoSdk>, flags: Arc<SessionFlags>, meters_to_world: f64) -> Self {
        log::info!("Creating motion resolver (scale {} units/m)", meters_to_world);
        Self {
            sdk,
            flags,
            meters_to_world,
            buffer: PoseBuffer::default(),
            latest_by_frame: HashMap::new(),
            subscriptions: HashMap::new(),
            frame: 0,
            memo: None,
            callback_connected: false,
        }
    }

    /// Monotonic tick counter.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Producer handle used by the pose callback.
    pub fn buffer(&self) -> PoseBuffer {
        self.buffer.clone()
    }

    /// Coalesced raw sample for `pair` from the most recent tick that had one.
    pub fn latest_raw(&self, pair: FramePair) -> Option<RawPose> {
        self.latest_by_frame.get(&pair).copied()
    }

    /// Pairs currently registered with the service's pose callback.
    pub fn subscribed_pairs(&self) -> Vec<FramePair> {
        self.subscriptions.keys().copied().collect()
    }

    /// Pose of `pair` at `timestamp`, resolved into engine space.
    ///
    /// Repeating the previous request within the same tick returns the
    /// remembered answer without touching the service.
    pub fn get_pose_at_time(&mut self, pair: FramePair, timestamp: f64) -> PoseSample {
        if let Some(memo) = &self.memo {
            if memo.frame == self.frame && memo.timestamp == timestamp && memo.pair == pair {
                return memo.pose;
            }
        }

        if !self.flags.is_running() || !self.flags.is_data_ready() {
            return self.remember(pair, timestamp, PoseSample::default());
        }

        let conv = match conversion::resolve(pair) {
            Ok(conv) => conv,
            Err(e) => {
                log::warn!("get_pose_at_time: {}", e);
                return PoseSample::invalid(pair);
            }
        };

        if conv.is_static {
            let pose = conversion::apply(&conv, &conversion::identity_raw(&conv, timestamp), self.meters_to_world);
            return self.remember(pair, timestamp, pose);
        }

        let pose = match self.sdk.get_pose_at_time(timestamp, conv.query) {
            Ok(raw) => conversion::apply(&conv, &raw, self.meters_to_world),
            Err(status) => {
                log::warn!("get_pose_at_time: query for {} failed: {}", conv.query, status);
                PoseSample::default()
            }
        };
        self.remember(pair, timestamp, pose)
    }

    fn remember(&mut self, pair: FramePair, timestamp: f64, pose: PoseSample) -> PoseSample {
        self.memo = Some(Memo {
            pair,
            timestamp,
            frame: self.frame,
            pose,
        });
        pose
    }

    /// Global pose of `target`, in raw double precision. Only answered once
    /// the session is localized against an area description.
    pub fn get_wgs84_pose_at_time(&self, target: CoordinateFrame, timestamp: f64) -> Wgs84Pose {
        if !self.flags.is_running() || !self.is_localized(true) {
            return Wgs84Pose::default();
        }
        let pair = FramePair::new(CoordinateFrame::GlobalWgs84, target);
        match self.sdk.get_pose_at_time(timestamp, pair) {
            Ok(raw) => Wgs84Pose {
                position: raw.translation,
                orientation: raw.orientation,
                frame: raw.frame,
                status: raw.status,
                timestamp: raw.timestamp,
            },
            Err(status) => {
                log::warn!("get_wgs84_pose_at_time: query for {} failed: {}", pair, status);
                Wgs84Pose::default()
            }
        }
    }

    /// Whether tracking has a valid fix relative to service start, or to the
    /// loaded area description when `use_area_description` is set.
    pub fn is_localized(&self, use_area_description: bool) -> bool {
        if !self.flags.is_running() {
            return false;
        }
        let base = if use_area_description {
            CoordinateFrame::AreaDescription
        } else {
            CoordinateFrame::StartOfService
        };
        let pair = FramePair::new(base, CoordinateFrame::Device);
        match self.sdk.get_pose_at_time(0.0, pair) {
            Ok(raw) => raw.status == PoseStatus::Valid,
            Err(status) => {
                log::debug!("is_localized: query for {} failed: {}", pair, status);
                false
            }
        }
    }

    pub fn reset_motion_tracking(&self) {
        log::info!("Resetting motion tracking");
        self.sdk.reset_motion_tracking();
    }

    /// Advance one tick: coalesce buffered samples and deliver each subscribed
    /// pair to its listeners once.
    pub fn tick(&mut self, listeners: &PoseListeners) {
        self.frame += 1;

        let samples = self.buffer.take();
        if samples.is_empty() {
            return;
        }
        let mut coalesced: HashMap<FramePair, RawPose> = HashMap::with_capacity(self.subscriptions.len());
        for sample in samples {
            let merged = match coalesced.get(&sample.frame) {
                Some(previous) if sample.frame == DELTA_PAIR => previous.accumulate(&sample),
                _ => sample,
            };
            coalesced.insert(sample.frame, merged);
        }

        for (queried, raw) in &coalesced {
            let Some(requests) = self.subscriptions.get(queried) else {
                log::trace!("Dropping pose for unsubscribed pair {}", queried);
                continue;
            };
            for (requested, sub) in requests {
                let pose = conversion::apply(&sub.conversion, raw, self.meters_to_world);
                for &id in &sub.listener_ids {
                    if let Some(listener) = listeners.get(id) {
                        guarded("pose", id, || listener.on_pose_available(&pose, *requested));
                    }
                }
            }
        }

        self.latest_by_frame.extend(coalesced);
    }

    /// Rebuild the subscription table from the current listeners and
    /// re-register the pose callback if the set of queried pairs changed.
    /// Returns whether the callback was (re)registered.
    pub fn check_for_change_in_requests(&mut self, listeners: &PoseListeners) -> bool {
        let mut rebuilt: HashMap<FramePair, HashMap<FramePair, Subscription>> = HashMap::new();
        for (id, _, pairs) in listeners.iter() {
            for &requested in pairs {
                let conv = match conversion::resolve(requested) {
                    Ok(conv) => conv,
                    Err(e) => {
                        log::warn!("Pose listener {} ignored: {}", id, e);
                        continue;
                    }
                };
                // Static pairs never change, nothing to stream.
                if conv.is_static {
                    continue;
                }
                let sub = rebuilt
                    .entry(conv.query)
                    .or_default()
                    .entry(requested)
                    .or_insert_with(|| Subscription {
                        conversion: conv,
                        listener_ids: Vec::new(),
                    });
                if !sub.listener_ids.contains(&id) {
                    sub.listener_ids.push(id);
                }
            }
        }

        let changed = rebuilt.len() != self.subscriptions.len()
            || rebuilt.keys().any(|k| !self.subscriptions.contains_key(k));
        self.subscriptions = rebuilt;

        if changed || !self.callback_connected {
            self.connect_callback();
            return true;
        }
        false
    }

    fn connect_callback(&mut self) {
        let pairs = self.subscribed_pairs();
        let buffer = self.buffer.clone();
        let callback: PoseCallback = Arc::new(move |pose: &RawPose| buffer.push(*pose));
        match self.sdk.connect_on_pose_available(&pairs, callback) {
            Ok(()) => {
                log::info!("Pose callback connected for {} pair(s)", pairs.len());
                self.callback_connected = true;
            }
            Err(status) => {
                log::error!("Connecting pose callback failed: {}", status);
                self.callback_connected = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::geometry::{Quat, Vec3};
    use crate::listener::PoseListener;
    use crate::sim::SimulatedSdk;
    use std::sync::Weak;
    use CoordinateFrame::*;

    #[derive(Default)]
    struct Recorder {
        poses: Mutex<Vec<(PoseSample, FramePair)>>,
    }

    impl PoseListener for Recorder {
        fn on_pose_available(&self, pose: &PoseSample, requested: FramePair) {
            self.poses.lock().push((*pose, requested));
        }
    }

    fn setup() -> (Arc<SimulatedSdk>, MotionResolver) {
        let sdk = Arc::new(SimulatedSdk::new());
        sdk.connect(&Config::default()).unwrap();
        let flags = Arc::new(SessionFlags::default());
        flags.set_running(true);
        flags.set_data_ready(true);
        let motion = MotionResolver::new(sdk.clone(), flags, 100.0);
        (sdk, motion)
    }

    fn listen(listeners: &mut PoseListeners, rec: &Arc<Recorder>, pairs: &[FramePair]) -> ListenerId {
        let weak: Weak<dyn PoseListener> = Arc::downgrade(rec) as Weak<dyn PoseListener>;
        listeners.add(weak, pairs.to_vec())
    }

    #[test]
    fn test_not_running_returns_unknown_without_query() {
        let sdk = Arc::new(SimulatedSdk::new());
        let flags = Arc::new(SessionFlags::default());
        let mut motion = MotionResolver::new(sdk.clone(), flags, 100.0);
        let pose = motion.get_pose_at_time(FramePair::new(StartOfService, Device), 1.0);
        assert_eq!(pose.status, PoseStatus::Unknown);
        assert_eq!(pose.position, Vec3::ZERO);
        assert_eq!(pose.rotation, Quat::IDENTITY);
        assert_eq!(sdk.pose_query_count(), 0);
    }

    #[test]
    fn test_repeated_query_is_memoized_within_a_tick() {
        let (sdk, mut motion) = setup();
        let pair = FramePair::new(StartOfService, Device);
        sdk.set_pose(RawPose::new(pair, [1.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0], 3.0));

        let a = motion.get_pose_at_time(pair, 3.0);
        let b = motion.get_pose_at_time(pair, 3.0);
        assert_eq!(a, b);
        assert_eq!(sdk.pose_query_count(), 1);

        motion.get_pose_at_time(pair, 4.0);
        assert_eq!(sdk.pose_query_count(), 2);

        motion.tick(&PoseListeners::new());
        motion.get_pose_at_time(pair, 4.0);
        assert_eq!(sdk.pose_query_count(), 3);
    }

    #[test]
    fn test_failed_query_is_unknown_and_memoized() {
        let (sdk, mut motion) = setup();
        sdk.set_fail_pose_queries(true);
        let pair = FramePair::new(AreaDescription, Device);
        let pose = motion.get_pose_at_time(pair, 1.5);
        assert_eq!(pose.status, PoseStatus::Unknown);
        motion.get_pose_at_time(pair, 1.5);
        assert_eq!(sdk.pose_query_count(), 1);
    }

    #[test]
    fn test_static_pair_skips_the_device() {
        let (sdk, mut motion) = setup();
        let pose = motion.get_pose_at_time(FramePair::new(Device, Imu), 7.25);
        assert_eq!(pose.status, PoseStatus::Valid);
        assert_eq!(pose.timestamp, 7.25);
        assert_eq!(sdk.pose_query_count(), 0);
    }

    #[test]
    fn test_retargeted_query_asks_for_device() {
        let (sdk, mut motion) = setup();
        let device_pair = FramePair::new(StartOfService, Device);
        sdk.set_pose(RawPose::new(device_pair, [0.0; 3], [0.0, 0.0, 0.0, 1.0], 2.0));
        let pose = motion.get_pose_at_time(FramePair::new(StartOfService, CameraDepth), 2.0);
        assert_eq!(pose.status, PoseStatus::Valid);
        assert_eq!(pose.frame, FramePair::new(StartOfService, CameraDepth));
        assert_eq!(sdk.pose_query_count(), 1);
    }

    #[test]
    fn test_invalid_pair_reports_invalid() {
        let (sdk, mut motion) = setup();
        let pose = motion.get_pose_at_time(FramePair::new(Device, StartOfService), 1.0);
        assert_eq!(pose.status, PoseStatus::Invalid);
        assert_eq!(sdk.pose_query_count(), 0);
    }

    #[test]
    fn test_delta_samples_accumulate_within_a_tick() {
        let (sdk, mut motion) = setup();
        let rec = Arc::new(Recorder::default());
        let mut listeners = PoseListeners::new();
        listen(&mut listeners, &rec, &[DELTA_PAIR]);
        motion.check_for_change_in_requests(&listeners);

        let qa = Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), 0.5);
        let qb = Quat::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), 0.25);
        let a = RawPose::new(DELTA_PAIR, [1.0, 2.0, 3.0], qa.to_xyzw(), 1.0);
        let b = RawPose::new(DELTA_PAIR, [0.5, -1.0, 0.0], qb.to_xyzw(), 1.1);
        assert!(sdk.emit_pose(&a));
        assert!(sdk.emit_pose(&b));
        motion.tick(&listeners);

        let merged = motion.latest_raw(DELTA_PAIR).unwrap();
        let expected_pos = qa * Vec3::from_array(b.translation) + Vec3::from_array(a.translation);
        assert!((merged.position() - expected_pos).length() < 1e-12);
        assert!(merged.rotation().approx_eq(qa * qb, 1e-12));
        assert_eq!(merged.timestamp, 1.1);
        assert_eq!(rec.poses.lock().len(), 1);
    }

    #[test]
    fn test_other_pairs_overwrite() {
        let (sdk, mut motion) = setup();
        let rec = Arc::new(Recorder::default());
        let mut listeners = PoseListeners::new();
        let pair = FramePair::new(StartOfService, Device);
        listen(&mut listeners, &rec, &[pair]);
        motion.check_for_change_in_requests(&listeners);

        sdk.emit_pose(&RawPose::new(pair, [1.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0], 1.0));
        sdk.emit_pose(&RawPose::new(pair, [2.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0], 2.0));
        motion.tick(&listeners);
        assert_eq!(motion.latest_raw(pair).unwrap().translation, [2.0, 0.0, 0.0]);

        let poses = rec.poses.lock();
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].0.timestamp, 2.0);
    }

    #[test]
    fn test_sensor_request_streams_device_pair_once_per_listener() {
        let (sdk, mut motion) = setup();
        let rec = Arc::new(Recorder::default());
        let mut listeners = PoseListeners::new();
        let requested = FramePair::new(StartOfService, CameraColor);
        listen(&mut listeners, &rec, &[requested, requested]);
        motion.check_for_change_in_requests(&listeners);
        assert_eq!(sdk.registered_pose_pairs(), vec![FramePair::new(StartOfService, Device)]);

        sdk.emit_pose(&RawPose::new(
            FramePair::new(StartOfService, Device),
            [0.0; 3],
            [0.0, 0.0, 0.0, 1.0],
            5.0,
        ));
        motion.tick(&listeners);
        motion.tick(&listeners);

        let poses = rec.poses.lock();
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].1, requested);
        assert_eq!(poses[0].0.frame, requested);
    }

    #[test]
    fn test_callback_only_reconnected_on_change() {
        let (sdk, mut motion) = setup();
        let rec = Arc::new(Recorder::default());
        let mut listeners = PoseListeners::new();
        listen(&mut listeners, &rec, &[FramePair::new(StartOfService, Device)]);

        assert!(motion.check_for_change_in_requests(&listeners));
        assert!(!motion.check_for_change_in_requests(&listeners));
        assert_eq!(sdk.pose_connect_count(), 1);

        // A retargeted sensor request on the same base shares the device pair.
        listen(&mut listeners, &rec, &[FramePair::new(StartOfService, CameraColor)]);
        assert!(!motion.check_for_change_in_requests(&listeners));

        listen(&mut listeners, &rec, &[FramePair::new(AreaDescription, Device)]);
        assert!(motion.check_for_change_in_requests(&listeners));
        assert_eq!(sdk.pose_connect_count(), 2);
    }

    #[test]
    fn test_is_localized_requires_valid_status() {
        let (sdk, motion) = setup();
        let sos = FramePair::new(StartOfService, Device);
        let adf = FramePair::new(AreaDescription, Device);
        assert!(!motion.is_localized(false));

        let mut pose = RawPose::new(sos, [0.0; 3], [0.0, 0.0, 0.0, 1.0], 0.0);
        sdk.set_pose(pose);
        assert!(motion.is_localized(false));
        assert!(!motion.is_localized(true));

        pose.status = PoseStatus::Initializing;
        sdk.set_pose(pose);
        assert!(!motion.is_localized(false));

        sdk.set_pose(RawPose::new(adf, [0.0; 3], [0.0, 0.0, 0.0, 1.0], 0.0));
        assert!(motion.is_localized(true));
        sdk.set_fail_pose_queries(true);
        assert!(!motion.is_localized(true));
    }

    #[test]
    fn test_wgs84_requires_area_localization() {
        let (sdk, motion) = setup();
        let global = FramePair::new(GlobalWgs84, Device);
        sdk.set_pose(RawPose::new(global, [4.0e6, 1.0e5, 4.9e6], [0.0, 0.0, 0.0, 1.0], 0.0));
        assert_eq!(motion.get_wgs84_pose_at_time(Device, 0.0).status, PoseStatus::Unknown);

        sdk.set_pose(RawPose::new(
            FramePair::new(AreaDescription, Device),
            [0.0; 3],
            [0.0, 0.0, 0.0, 1.0],
            0.0,
        ));
        let pose = motion.get_wgs84_pose_at_time(Device, 0.0);
        assert_eq!(pose.status, PoseStatus::Valid);
        assert_eq!(pose.position, [4.0e6, 1.0e5, 4.9e6]);
    }
}
