//! Frame pair resolution and vendor-to-engine axis conversion.
//!
//! Vendor frames follow three axis conventions:
//! - trackable frames (start of service, area description, previous device
//!   pose, global): X right, Y forward, Z up;
//! - device body frames (device, IMU, display): X right, Y up, Z toward the
//!   user;
//! - camera frames: X right, Y down, Z along the optical axis.
//!
//! The host engine is left-handed with X forward, Y right, Z up and measures
//! distances in world units (`meters_to_world_scale` per meter).
//!
//! Everything here is pure and never touches a live session.

use crate::geometry::{Mat3, Quat, RigidTransform, Vec3};
use crate::types::{CoordinateFrame, FramePair, PoseSample, RawPose};
use crate::{Result, TangoError};

/// Trackable axes to engine axes.
const TRACKABLE_TO_ENGINE: Mat3 = Mat3::from_rows([
    [0.0, 1.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0],
]);

/// Device body axes to engine axes.
const BODY_TO_ENGINE: Mat3 = Mat3::from_rows([
    [0.0, 0.0, -1.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
]);

/// Camera axes to engine axes.
const CAMERA_TO_ENGINE: Mat3 = Mat3::from_rows([
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 0.0],
    [0.0, -1.0, 0.0],
]);

/// How a resolved pair is answered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceConversionPair {
    /// The pair the caller asked for.
    pub requested: FramePair,
    /// The pair actually sent to the service. Differs from `requested` only
    /// when `needs_device_query` is set, in which case the target is `device`.
    pub query: FramePair,
    /// Answerable from the fixed extrinsics table alone.
    pub is_static: bool,
    /// Must be asked of the service as `base -> device` and then composed with
    /// the device-to-target extrinsic.
    pub needs_device_query: bool,
    /// Base frame axes into engine axes.
    pub base_to_engine: Mat3,
    /// Engine axes into requested target frame axes.
    pub engine_to_target: Mat3,
    /// Transform appended to the queried pose: device-to-target for
    /// retargeted queries, base-to-target for static ones.
    pub target_offset: RigidTransform,
}

/// Axis change from `frame` into engine axes.
pub fn axes_to_engine(frame: CoordinateFrame) -> Mat3 {
    if frame.is_trackable() {
        TRACKABLE_TO_ENGINE
    } else if frame.is_camera() {
        CAMERA_TO_ENGINE
    } else {
        BODY_TO_ENGINE
    }
}

/// Axis change from engine axes into `frame`.
pub fn engine_to_axes(frame: CoordinateFrame) -> Mat3 {
    axes_to_engine(frame).transpose()
}

/// Nominal pose of a body-fixed frame in the device frame (meters).
pub fn nominal_extrinsic(frame: CoordinateFrame) -> Option<RigidTransform> {
    // Cameras look out of the back of the device: 180 degrees about X.
    let flip = Quat::new(1.0, 0.0, 0.0, 0.0);
    let t = match frame {
        CoordinateFrame::Device => RigidTransform::IDENTITY,
        CoordinateFrame::Display => RigidTransform::IDENTITY,
        CoordinateFrame::Imu => RigidTransform::new(Vec3::new(0.0, 0.0, -0.005), Quat::IDENTITY),
        CoordinateFrame::CameraColor => RigidTransform::new(Vec3::new(0.061, 0.004, -0.004), flip),
        CoordinateFrame::CameraDepth => RigidTransform::new(Vec3::new(0.062, 0.0, -0.004), flip),
        CoordinateFrame::CameraFisheye => RigidTransform::new(Vec3::new(0.013, 0.0, -0.004), flip),
        _ => return None,
    };
    Some(t)
}

/// Map a requested frame pair to the recipe that answers it.
pub fn resolve(pair: FramePair) -> Result<SpaceConversionPair> {
    let FramePair { base, target } = pair;
    let invalid = || TangoError::InvalidFramePair(pair);

    let mut conv = SpaceConversionPair {
        requested: pair,
        query: pair,
        is_static: false,
        needs_device_query: false,
        base_to_engine: axes_to_engine(base),
        engine_to_target: engine_to_axes(target),
        target_offset: RigidTransform::IDENTITY,
    };

    if base.is_body_fixed() {
        if target.is_trackable() {
            return Err(invalid());
        }
        let base_ext = nominal_extrinsic(base).ok_or_else(invalid)?;
        let target_ext = nominal_extrinsic(target).ok_or_else(invalid)?;
        conv.is_static = true;
        conv.target_offset = base_ext.inverse().compose(target_ext);
        return Ok(conv);
    }

    match target {
        CoordinateFrame::Device => Ok(conv),
        CoordinateFrame::StartOfService if base == CoordinateFrame::AreaDescription => Ok(conv),
        t if t.is_trackable() => Err(invalid()),
        // Relative motion is only reported for the device itself.
        _ if base == CoordinateFrame::PreviousDevicePose => Err(invalid()),
        t => {
            conv.needs_device_query = true;
            conv.query = FramePair::new(base, CoordinateFrame::Device);
            conv.target_offset = nominal_extrinsic(t).ok_or_else(invalid)?;
            Ok(conv)
        }
    }
}

/// Turn a vendor pose for `conv.query` into an engine pose for
/// `conv.requested`.
pub fn apply(conv: &SpaceConversionPair, raw: &RawPose, meters_to_world: f64) -> PoseSample {
    let queried = RigidTransform::new(raw.position(), raw.rotation());
    let t = queried.compose(conv.target_offset);
    let position = (conv.base_to_engine * t.translation).scale(meters_to_world);
    let rotation = (conv.base_to_engine * t.rotation.to_matrix() * conv.engine_to_target).to_quat();
    PoseSample::new(position, rotation, conv.requested, raw.status, raw.timestamp)
}

/// Identity pose for `conv.query`, used to answer static pairs.
pub fn identity_raw(conv: &SpaceConversionPair, timestamp: f64) -> RawPose {
    RawPose::new(conv.query, [0.0; 3], Quat::IDENTITY.to_xyzw(), timestamp)
}

/// Express a vendor transform (meters, `base` axes) in engine space.
pub fn convert_transform_from_tango(
    transform: RigidTransform,
    base: CoordinateFrame,
    meters_to_world: f64,
) -> RigidTransform {
    let b = axes_to_engine(base);
    RigidTransform::new(
        (b * transform.translation).scale(meters_to_world),
        (b * transform.rotation.to_matrix() * b.transpose()).to_quat(),
    )
}

/// Express an engine transform in vendor space (meters, `target` axes).
pub fn convert_transform_to_tango(
    transform: RigidTransform,
    target: CoordinateFrame,
    meters_to_world: f64,
) -> RigidTransform {
    let b = engine_to_axes(target);
    RigidTransform::new(
        (b * transform.translation).scale(1.0 / meters_to_world),
        (b * transform.rotation.to_matrix() * b.transpose()).to_quat(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PoseStatus;
    use std::f64::consts::FRAC_PI_2;
    use CoordinateFrame::*;

    fn pair(base: CoordinateFrame, target: CoordinateFrame) -> FramePair {
        FramePair::new(base, target)
    }

    #[test]
    fn test_axis_changes_are_left_handed_flips() {
        for m in [TRACKABLE_TO_ENGINE, BODY_TO_ENGINE, CAMERA_TO_ENGINE] {
            assert!((m.determinant() + 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_resolve_is_deterministic_for_every_pair() {
        for base in CoordinateFrame::ALL {
            for target in CoordinateFrame::ALL {
                let p = pair(base, target);
                match (resolve(p), resolve(p)) {
                    (Ok(a), Ok(b)) => assert_eq!(a, b),
                    (Err(_), Err(_)) => {}
                    _ => panic!("resolve({}) not deterministic", p),
                }
            }
        }
    }

    #[test]
    fn test_static_pairs() {
        for p in [pair(Device, Imu), pair(Device, Display), pair(CameraColor, Device), pair(Imu, CameraDepth)] {
            let conv = resolve(p).unwrap();
            assert!(conv.is_static, "{} should be static", p);
            assert!(!conv.needs_device_query);
        }
    }

    #[test]
    fn test_trackable_to_sensor_is_retargeted() {
        let conv = resolve(pair(StartOfService, CameraColor)).unwrap();
        assert!(conv.needs_device_query);
        assert!(!conv.is_static);
        assert_eq!(conv.query, pair(StartOfService, Device));
        assert_eq!(conv.requested, pair(StartOfService, CameraColor));
    }

    #[test]
    fn test_direct_pairs_are_not_retargeted() {
        for p in [pair(StartOfService, Device), pair(AreaDescription, StartOfService), pair(PreviousDevicePose, Device)] {
            let conv = resolve(p).unwrap();
            assert!(!conv.is_static && !conv.needs_device_query);
            assert_eq!(conv.query, p);
        }
    }

    #[test]
    fn test_unrepresentable_pairs_fail() {
        for p in [
            pair(StartOfService, GlobalWgs84),
            pair(StartOfService, AreaDescription),
            pair(Device, StartOfService),
            pair(PreviousDevicePose, CameraColor),
            pair(StartOfService, StartOfService),
        ] {
            assert!(
                matches!(resolve(p), Err(TangoError::InvalidFramePair(q)) if q == p),
                "{} should fail",
                p
            );
        }
    }

    #[test]
    fn test_upright_device_maps_to_engine_identity() {
        // At service start the device faces +Y of the start frame, which is a
        // quarter turn about X from the device body axes.
        let conv = resolve(pair(StartOfService, Device)).unwrap();
        let q = Quat::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), FRAC_PI_2);
        let raw = RawPose::new(conv.query, [1.0, 2.0, 3.0], q.to_xyzw(), 4.5);
        let pose = apply(&conv, &raw, 100.0);
        assert!(pose.rotation.approx_eq(Quat::IDENTITY, 1e-9));
        assert!((pose.position - Vec3::new(200.0, 100.0, 300.0)).length() < 1e-9);
        assert_eq!(pose.timestamp, 4.5);
        assert_eq!(pose.status, PoseStatus::Valid);
    }

    #[test]
    fn test_color_camera_looks_forward_when_upright() {
        let conv = resolve(pair(StartOfService, CameraColor)).unwrap();
        let q = Quat::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), FRAC_PI_2);
        let raw = RawPose::new(conv.query, [0.0; 3], q.to_xyzw(), 0.0);
        let pose = apply(&conv, &raw, 1.0);
        assert!(pose.rotation.approx_eq(Quat::IDENTITY, 1e-9));
        assert_eq!(pose.frame, pair(StartOfService, CameraColor));
    }

    #[test]
    fn test_static_identity_pair_is_identity() {
        let conv = resolve(pair(Device, Device)).unwrap();
        let pose = apply(&conv, &identity_raw(&conv, 2.0), 100.0);
        assert!(pose.rotation.approx_eq(Quat::IDENTITY, 1e-12));
        assert!(pose.position.length() < 1e-12);
        assert_eq!(pose.timestamp, 2.0);
    }

    #[test]
    fn test_transform_round_trip_through_engine() {
        let t = RigidTransform::new(
            Vec3::new(0.5, -1.0, 2.0),
            Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), 0.3),
        );
        let engine = convert_transform_from_tango(t, StartOfService, 100.0);
        let back = convert_transform_to_tango(engine, StartOfService, 100.0);
        assert!((back.translation - t.translation).length() < 1e-9);
        assert!(back.rotation.approx_eq(t.rotation, 1e-9));
    }
}
