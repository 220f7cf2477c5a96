//! Integration tests for the single-device pipeline

use std::thread;
use std::time::{Duration, Instant};

use depthstream::sensor::synthetic::Pattern;
use depthstream::sensor::{PlaneKind, SyntheticSensor};
use depthstream::settings::{ColorResolution, ImageFormat};
use depthstream::{BodyTrackingSettings, Device, DeviceSettings, DeviceState, Error};

fn settings() -> DeviceSettings {
    DeviceSettings {
        color_resolution: ColorResolution::P720,
        ..Default::default()
    }
}

fn sensor(serial: &str) -> SyntheticSensor {
    SyntheticSensor::new(serial).with_resolution((8, 8), (16, 16))
}

fn update_until(
    device: &mut Device<SyntheticSensor>,
    mut done: impl FnMut(&Device<SyntheticSensor>) -> bool,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        device.update();
        if done(device) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_timeouts_keep_streaming() {
    let sensor = sensor("timeouts");
    let control = sensor.control();
    control.inject_timeouts(3);

    let mut device = Device::attach(sensor).with_settings(settings());
    device.start_streaming().unwrap();
    assert!(update_until(&mut device, |d| d.is_frame_new()));

    let stats = device.stats();
    assert_eq!(stats.capture_timeouts, 3);
    assert_eq!(device.state(), DeviceState::Streaming);

    // a timed out acquire never reaches the handoff
    let delivered = control.captures_delivered();
    assert!(stats.frames_produced <= delivered);
    assert!(delivered - stats.frames_produced <= 1, "{delivered} vs {stats:?}");
    device.stop_streaming().unwrap();
}

#[test]
fn test_capture_errors_are_counted() {
    let sensor = sensor("errors");
    sensor.control().inject_failures(2);

    let mut device = Device::attach(sensor).with_settings(settings());
    device.start_streaming().unwrap();
    assert!(update_until(&mut device, |d| d.is_frame_new()));
    assert_eq!(device.stats().capture_errors, 2);
    assert!(device.is_streaming());
}

#[test]
fn test_frames_are_never_torn() {
    let sensor = sensor("torn").with_pattern(Pattern::FrameIndex);
    let mut device = Device::attach(sensor).with_settings(settings());
    device.start_streaming().unwrap();

    let mut checked = 0;
    let done = update_until(&mut device, |d| {
        if !d.is_frame_new() {
            return false;
        }
        let frame = d.frame();
        assert_eq!(frame.depth.cycle, frame.cycle);
        assert_eq!(frame.ir.cycle, frame.cycle);
        assert_eq!(frame.depth.device_timestamp, frame.ir.device_timestamp);

        let value = frame.depth.data[0];
        assert!(frame.depth.data.iter().all(|d| *d == value));
        assert!(frame.ir.data.iter().all(|ir| *ir == value / 4 + 1));
        checked += 1;
        checked >= 50
    });
    assert!(done);
    device.stop_streaming().unwrap();
}

#[test]
fn test_missing_planes_are_counted() {
    let sensor = sensor("holes");
    sensor.control().drop_planes(PlaneKind::Infrared, 2);

    let mut device = Device::attach(sensor).with_settings(settings());
    device.start_streaming().unwrap();
    assert!(update_until(&mut device, |d| d.stats().missing_planes >= 2));
    assert!(device.is_streaming());
}

#[test]
fn test_point_cloud_and_reprojection() {
    let mut device = Device::attach(sensor("world")).with_settings(settings());
    device.start_streaming().unwrap();
    assert!(update_until(&mut device, |d| d.frame().cycle > 0));

    let table = device.depth_to_world_table().unwrap();
    assert_eq!(table.dims(), (8, 8));
    assert!(device.point_cloud().num_points() > 0);
    assert!(device.point_cloud().num_points() <= 64);
    assert_eq!(device.depth_in_color().width, 16);
    assert_eq!(device.color_in_depth().width, 8);
    assert_eq!(device.color_in_depth().channels, 4);
}

#[test]
fn test_async_mjpeg_decode() {
    let settings = DeviceSettings {
        color_format: ImageFormat::Mjpeg,
        async_color_decode: true,
        ..settings()
    };
    let mut device = Device::attach(sensor("mjpeg")).with_settings(settings);
    device.start_streaming().unwrap();

    assert!(update_until(&mut device, |d| d.color_plane().is_allocated()));
    let color = device.color_plane();
    assert_eq!((color.width, color.height, color.channels), (16, 16, 4));
    assert_eq!(color.data.len(), 16 * 16 * 4);
    device.stop_streaming().unwrap();
}

#[test]
fn test_unsupported_tracking_stays_open() {
    let tracking = BodyTrackingSettings {
        update_bodies: true,
        ..Default::default()
    };
    let mut device = Device::attach(sensor("no-tracker"))
        .with_settings(settings())
        .with_body_tracking(tracking.clone());

    assert!(matches!(device.start_streaming(), Err(Error::Unsupported(_))));
    assert_eq!(device.state(), DeviceState::Open);

    let mut device = Device::attach(sensor("tracker").with_body_tracking(true))
        .with_settings(settings())
        .with_body_tracking(tracking);
    device.start_streaming().unwrap();
    assert!(update_until(&mut device, |d| !d.bodies().body_ids.is_empty()));
    assert_eq!(device.bodies().skeletons.len(), 1);
}
