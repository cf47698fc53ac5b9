//! Drive a session over the simulated service and print resolved poses.
//!
//! Usage: cargo run --example simulated [session.toml]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tango_session::sim::SimulatedSdk;
use tango_session::{
    CoordinateFrame, DeviceSession, FramePair, PoseListener, PoseSample, Quat, RawPose, SessionConfig, Vec3,
};

struct Printer {
    count: Mutex<u64>,
}

impl PoseListener for Printer {
    fn on_pose_available(&self, pose: &PoseSample, requested: FramePair) {
        let mut count = self.count.lock();
        *count += 1;
        // Every ~30th tick to avoid flooding the terminal
        if *count % 30 == 1 {
            println!(
                "{}  ts={:<8.3}  pos=[{:+8.2}, {:+8.2}, {:+8.2}]  rpy=[{:+7.2}, {:+7.2}, {:+7.2}]  {:?}",
                requested,
                pose.timestamp,
                pose.position.x, pose.position.y, pose.position.z,
                pose.euler_deg[0], pose.euler_deg[1], pose.euler_deg[2],
                pose.status,
            );
        }
    }
}

fn main() {
    env_logger::init();

    let settings = match std::env::args().nth(1) {
        Some(path) => match SessionConfig::load(&path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => SessionConfig::default(),
    };
    let config = settings.config.with_env_overrides();

    let sdk = Arc::new(SimulatedSdk::new());
    let area_dir = std::env::temp_dir().join("tango-session-demo");
    let mut session = DeviceSession::new(sdk.clone(), area_dir);

    if let Err(e) = session.start_service(config, settings.runtime) {
        eprintln!("Failed to start service: {}", e);
        std::process::exit(1);
    }
    session.video_texture().mark_ready();

    let printer = Arc::new(Printer { count: Mutex::new(0) });
    let weak: Weak<dyn PoseListener> = Arc::downgrade(&printer) as Weak<dyn PoseListener>;
    session.add_pose_listener(
        weak,
        vec![
            FramePair::new(CoordinateFrame::StartOfService, CoordinateFrame::Device),
            FramePair::new(CoordinateFrame::StartOfService, CoordinateFrame::CameraColor),
        ],
    );

    // Service thread: walk the device around a 1 m circle at ~200 Hz.
    let stop = Arc::new(AtomicBool::new(false));
    let producer = {
        let sdk = sdk.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            let pair = FramePair::new(CoordinateFrame::StartOfService, CoordinateFrame::Device);
            while !stop.load(Ordering::Relaxed) {
                let t = start.elapsed().as_secs_f64();
                let heading = Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), t * 0.5);
                let pose = RawPose::new(pair, [t.cos(), t.sin(), 1.2], heading.to_xyzw(), t);
                sdk.set_pose(pose);
                sdk.emit_pose(&pose);
                std::thread::sleep(Duration::from_millis(5));
            }
        })
    };

    println!("Ticking at 60 Hz for 3 s...");
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(3) {
        session.tick();
        std::thread::sleep(Duration::from_millis(16));
    }

    stop.store(true, Ordering::Relaxed);
    let _ = producer.join();

    let pose = session.get_pose_at_time(
        FramePair::new(CoordinateFrame::StartOfService, CoordinateFrame::Device),
        0.0,
    );
    println!("\nFinal pose: {:?} at {:?}", pose.status, pose.position);
    println!("Deliveries: {}", *printer.count.lock());
    session.stop_service();
}
