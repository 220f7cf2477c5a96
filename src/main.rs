//! depthstream demo: synthetic sensors driven through the full pipeline

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{debug, info};

use depthstream::sensor::{SyntheticRig, SyntheticSensor};
use depthstream::settings::WiredSyncMode;
use depthstream::{utils, Config, Device, SyncCoordinator};

const MASTER_SERIAL: &str = "SYN-000001";
const SUBORDINATE_SERIAL: &str = "SYN-000002";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    utils::init_tracing("depthstream=debug");

    info!("depthstream launching...");

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = utils::load_config(path.as_deref())?;
    depthstream::CONFIG.store(Arc::new(config.clone()));

    let mut rig = SyntheticRig::new()
        .with_sensor(
            SyntheticSensor::new(MASTER_SERIAL)
                .with_resolution((320, 288), (640, 360))
                .with_sync_cables(false, true)
                .with_realtime(true)
                .with_body_tracking(true),
        )
        .with_sensor(
            SyntheticSensor::new(SUBORDINATE_SERIAL)
                .with_resolution((320, 288), (640, 360))
                .with_sync_cables(true, false)
                .with_clock_offset(100)
                .with_realtime(true),
        );

    let mut devices = Vec::new();
    let mut coordinator = None;

    if config.device.wired_sync_mode == WiredSyncMode::Standalone {
        let mut device = Device::open_by_serial(&mut rig, MASTER_SERIAL)?;
        device.start_streaming()?;
        devices.push(device);
    } else {
        let mut master = Device::open_by_serial(&mut rig, MASTER_SERIAL)?.with_settings(
            depthstream::DeviceSettings {
                wired_sync_mode: WiredSyncMode::Master,
                ..config.device.clone()
            },
        );
        let mut subordinate = Device::open_by_serial(&mut rig, SUBORDINATE_SERIAL)?.with_settings(
            depthstream::DeviceSettings {
                wired_sync_mode: WiredSyncMode::Subordinate,
                ..config.device.clone()
            },
        );

        let mut sync = SyncCoordinator::new(config.sync.clone());
        sync.set_master(&mut master)?;
        sync.add_subordinate(&mut subordinate)?;
        // subordinates first so they are listening when the master fires
        subordinate.start_streaming()?;
        master.start_streaming()?;
        sync.start()?;

        devices.push(master);
        devices.push(subordinate);
        coordinator = Some(sync);
    }

    consume(&mut devices, &config).await;

    if let Some(mut sync) = coordinator {
        let stats = sync.stats();
        sync.stop();
        info!(?stats, "Sync coordinator summary");
    }
    for device in devices.iter_mut() {
        info!(serial = %device.serial_number(), stats = ?device.stats(), "Device summary");
        device.close();
    }

    info!("depthstream shutting down");
    Ok(())
}

/// Consumer loop: tick every device at twice the camera rate until ctrl-c.
async fn consume(devices: &mut [Device<SyntheticSensor>], config: &Config) {
    let hz = u64::from(config.device.camera_fps.hz());
    let mut tick = tokio::time::interval(Duration::from_micros(500_000 / hz));
    let mut report = tokio::time::interval(Duration::from_secs(5));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            _ = tick.tick() => {
                for device in devices.iter_mut() {
                    if device.update() && device.is_frame_new() {
                        debug!(
                            serial = %device.serial_number(),
                            cycle = device.frame().cycle,
                            points = device.point_cloud().num_points(),
                            bodies = device.bodies().body_ids.len(),
                            depth_us = device.depth_device_time().as_micros() as u64,
                            color_us = device.color_device_time().as_micros() as u64,
                            "New frame"
                        );
                    }
                }
            }
            _ = report.tick() => {
                for device in devices.iter() {
                    info!(serial = %device.serial_number(), stats = ?device.stats(), "Pipeline stats");
                }
            }
        }
    }
}
