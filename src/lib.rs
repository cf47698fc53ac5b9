//! # tango_session - device session and pose resolution for a visual-inertial tracker
//!
//! Wraps a motion-tracking and depth-sensing service behind a single
//! [`DeviceSession`]. Provides:
//! - Connect / reconnect / pause lifecycle with configuration diffing
//! - "Where is frame X relative to frame Y at time T" queries in engine axes
//! - Per-tick fan-out of streamed poses, events, camera frames and depth
//! - Area description management and asynchronous saves
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use tango_session::sim::SimulatedSdk;
//! use tango_session::{Config, CoordinateFrame, DeviceSession, FramePair, RuntimeConfig};
//!
//! let sdk = Arc::new(SimulatedSdk::new());
//! let mut session = DeviceSession::new(sdk, "area_learning");
//! session.start_service(Config::default(), RuntimeConfig::default()).unwrap();
//!
//! let pair = FramePair::new(CoordinateFrame::StartOfService, CoordinateFrame::Device);
//! for _ in 0..100 {
//!     session.tick();
//!     let pose = session.get_pose_at_time(pair, 0.0);
//!     println!("{:?} {:?}", pose.status, pose.position);
//! }
//! ```

pub mod error;
pub mod types;
pub mod geometry;
pub mod config;
pub mod conversion;
pub mod sdk;
pub mod sim;
pub mod listener;
pub mod event;
pub mod motion;
pub mod image;
pub mod point_cloud;
pub mod area_learning;
pub mod ar;
pub mod session;

pub use error::{SdkResult, SdkStatus, TangoError};
pub use types::*;
pub use config::{Config, RuntimeConfig, SessionConfig};
pub use geometry::{Mat3, Quat, RigidTransform, Vec3};
pub use conversion::SpaceConversionPair;
pub use sdk::{ExportOutcome, TangoSdk};
pub use listener::{EventListener, ListenerId, PointCloudListener, PoseListener};
pub use area_learning::{SaveStatus, SaveTask};
pub use ar::{ArCameraModel, ViewportSource};
pub use image::{ImageConnectionState, VideoTexture};
pub use session::DeviceSession;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, TangoError>;
