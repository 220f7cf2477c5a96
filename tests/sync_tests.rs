//! Integration tests for wired master/subordinate synchronization

use std::thread;
use std::time::{Duration, Instant};

use depthstream::sensor::SyntheticSensor;
use depthstream::settings::{ColorResolution, WiredSyncMode};
use depthstream::sync::SyncStats;
use depthstream::{Device, DeviceSettings, Error, SyncConfig, SyncCoordinator};

const SUBORDINATE_DELAY: u32 = 160;
const TOLERANCE: u32 = 160;

fn settings(role: WiredSyncMode) -> DeviceSettings {
    DeviceSettings {
        color_resolution: ColorResolution::P720,
        wired_sync_mode: role,
        subordinate_delay_usec: SUBORDINATE_DELAY,
        ..Default::default()
    }
}

fn master() -> SyntheticSensor {
    SyntheticSensor::new("master")
        .with_resolution((8, 8), (8, 8))
        .with_sync_cables(false, true)
}

fn subordinate(serial: &str) -> SyntheticSensor {
    SyntheticSensor::new(serial)
        .with_resolution((8, 8), (8, 8))
        .with_sync_cables(true, false)
}

fn config() -> SyncConfig {
    SyncConfig {
        max_time_offset_usec: TOLERANCE,
        reconcile_timeout_ms: 5_000,
        compare_subordinate_depth: false,
    }
}

fn wait_for(coordinator: &SyncCoordinator<SyntheticSensor>, done: impl Fn(SyncStats) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done(coordinator.stats()) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_lagging_subordinate_catches_up() {
    let master_sensor = master();
    master_sensor.control().skip_frames(2);

    let mut master = Device::attach(master_sensor).with_settings(settings(WiredSyncMode::Master));
    let mut sub = Device::attach(subordinate("sub")).with_settings(settings(WiredSyncMode::Subordinate));

    let mut sync = SyncCoordinator::new(config());
    sync.set_master(&mut master).unwrap();
    sync.add_subordinate(&mut sub).unwrap();
    sub.start_streaming().unwrap();
    master.start_streaming().unwrap();
    sync.start().unwrap();

    assert!(wait_for(&sync, |s| s.rounds >= 3));
    sync.stop();

    let stats = sync.stats();
    assert!(stats.subordinate_recaptures >= 2, "{stats:?}");
    assert_eq!(stats.timeouts, 0);

    // both middle slots come from the last round
    assert!(master.update());
    assert!(sub.update());
    assert_eq!(master.frame().cycle, master.depth_plane().cycle);
    let expected = master.color_device_time().as_micros() as i64 + i64::from(SUBORDINATE_DELAY);
    let actual = sub.color_device_time().as_micros() as i64;
    assert!((actual - expected).abs() <= i64::from(TOLERANCE), "{actual} vs {expected}");

    sub.stop_streaming().unwrap();
    master.stop_streaming().unwrap();
}

#[test]
fn test_subordinate_ahead_recaptures_master() {
    let sub_sensor = subordinate("ahead");
    sub_sensor.control().skip_frames(3);

    let mut master = Device::attach(master()).with_settings(settings(WiredSyncMode::Master));
    let mut sub = Device::attach(sub_sensor).with_settings(settings(WiredSyncMode::Subordinate));

    let mut sync = SyncCoordinator::new(config());
    sync.set_master(&mut master).unwrap();
    sync.add_subordinate(&mut sub).unwrap();
    sub.start_streaming().unwrap();
    master.start_streaming().unwrap();
    sync.start().unwrap();

    assert!(wait_for(&sync, |s| s.rounds >= 1));
    sync.stop();
    assert!(sync.stats().master_recaptures >= 3, "{:?}", sync.stats());
}

#[test]
fn test_roles_are_checked() {
    let mut standalone = Device::attach(master()).with_settings(DeviceSettings::default());
    let mut sync = SyncCoordinator::new(config());
    assert!(matches!(sync.set_master(&mut standalone), Err(Error::Sync(_))));
    assert!(matches!(sync.start(), Err(Error::Sync(_))));

    let mut master = Device::attach(master()).with_settings(settings(WiredSyncMode::Master));
    sync.set_master(&mut master).unwrap();
    // a subordinate must be registered and streaming
    assert!(sync.start().is_err());

    let mut sub = Device::attach(subordinate("idle")).with_settings(settings(WiredSyncMode::Subordinate));
    sync.add_subordinate(&mut sub).unwrap();
    assert!(sync.start().is_err());
    assert!(!sync.is_running());
}

#[test]
fn test_subordinate_without_cable_is_rejected_at_start() {
    let mut master = Device::attach(master()).with_settings(settings(WiredSyncMode::Master));
    let mut sub = Device::attach(SyntheticSensor::new("loose").with_resolution((8, 8), (8, 8)))
        .with_settings(settings(WiredSyncMode::Subordinate));

    let mut sync = SyncCoordinator::new(config());
    sync.set_master(&mut master).unwrap();
    sync.add_subordinate(&mut sub).unwrap();
    sub.start_streaming().unwrap();
    master.start_streaming().unwrap();

    // without a sync-in cable the stream falls back to standalone
    assert_eq!(sub.wired_sync_mode(), WiredSyncMode::Standalone);
    assert!(matches!(sync.start(), Err(Error::Sync(_))));
}

#[test]
fn test_reconcile_timeout_aborts_the_round() {
    let mut master = Device::attach(master()).with_settings(settings(WiredSyncMode::Master));
    // a constant clock skew that a zero tolerance never accepts
    let mut sub = Device::attach(subordinate("skewed").with_clock_offset(10))
        .with_settings(settings(WiredSyncMode::Subordinate));

    let mut sync = SyncCoordinator::new(SyncConfig {
        max_time_offset_usec: 0,
        reconcile_timeout_ms: 20,
        compare_subordinate_depth: false,
    });
    sync.set_master(&mut master).unwrap();
    sync.add_subordinate(&mut sub).unwrap();
    sub.start_streaming().unwrap();
    master.start_streaming().unwrap();
    sync.start().unwrap();

    assert!(wait_for(&sync, |s| s.timeouts >= 2));
    sync.stop();

    let stats = sync.stats();
    assert_eq!(stats.rounds, 0, "{stats:?}");
    assert!(stats.aborted >= stats.timeouts);
    // nothing was handed over from an aborted round
    assert!(!master.update());
    assert!(!sub.update());
    assert_eq!(master.stats().frames_produced, 0);
}

#[test]
fn test_stopped_device_pauses_rounds_quietly() {
    let mut master = Device::attach(master()).with_settings(settings(WiredSyncMode::Master));
    let mut sub = Device::attach(subordinate("leaving")).with_settings(settings(WiredSyncMode::Subordinate));

    let mut sync = SyncCoordinator::new(config());
    sync.set_master(&mut master).unwrap();
    sync.add_subordinate(&mut sub).unwrap();
    sub.start_streaming().unwrap();
    master.start_streaming().unwrap();
    sync.start().unwrap();
    assert!(wait_for(&sync, |s| s.rounds >= 1));

    sub.stop_streaming().unwrap();
    // let a round that finished just before the stop be counted
    thread::sleep(Duration::from_millis(20));
    let rounds = sync.stats().rounds;
    let aborted = sync.stats().aborted;
    thread::sleep(Duration::from_millis(300));

    let stats = sync.stats();
    assert!(sync.is_running());
    assert_eq!(stats.rounds, rounds);
    // backed off between attempts instead of spinning
    assert!(stats.aborted - aborted < 20, "{stats:?}");
    sync.stop();
}
