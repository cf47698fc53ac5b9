//! Learn an area over the simulated service and save it asynchronously.
//!
//! Usage: cargo run --example save_area [filename]

use std::sync::Arc;
use std::time::Duration;
use tango_session::sim::SimulatedSdk;
use tango_session::{Config, CoordinateFrame, DeviceSession, FramePair, RawPose, RuntimeConfig, SaveStatus};

fn main() {
    env_logger::init();

    let filename = std::env::args().nth(1).unwrap_or_else(|| "demo.adf".to_string());
    let sdk = Arc::new(SimulatedSdk::new());
    let area_dir = std::env::temp_dir().join("tango-session-demo");
    let mut session = DeviceSession::new(sdk.clone(), &area_dir);

    let config = Config {
        enable_learning_mode: true,
        ..Config::default()
    };
    if let Err(e) = session.start_service(config, RuntimeConfig::default()) {
        eprintln!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    // Pretend the tracker localized against the map being learned.
    sdk.set_pose(RawPose::new(
        FramePair::new(CoordinateFrame::AreaDescription, CoordinateFrame::Device),
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
        0.0,
    ));
    println!("Localized: {}", session.is_localized(true));

    let mut task = match session.save_current_area("demo", &filename) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Save rejected: {}", e);
            std::process::exit(1);
        }
    };

    while !task.is_done() {
        session.tick();
        println!("Saving... {:.0}%", task.percent_done() * 100.0);
        std::thread::sleep(Duration::from_millis(50));
    }
    task.finish();

    match task.status() {
        SaveStatus::Succeeded(adf) => println!("Saved {} -> {}", adf.uuid, adf.filename),
        SaveStatus::Failed(reason) => {
            eprintln!("Save failed: {}", reason);
            std::process::exit(1);
        }
        SaveStatus::Pending => unreachable!(),
    }

    match session.area_descriptions() {
        Ok(list) => {
            for adf in list {
                println!("  {}  {}", adf.uuid, adf.filename);
            }
        }
        Err(e) => eprintln!("Listing failed: {}", e),
    }
    session.stop_service();
}
