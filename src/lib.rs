pub mod capture;
pub mod error;
pub mod pipeline;
pub mod projection;
pub mod recorder;
pub mod sensor;
pub mod settings;
pub mod sync;
pub mod utils;

use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::frame::Frame;
pub use error::{Error, Result};
pub use pipeline::{Device, DeviceState, PipelineStats};
pub use settings::{BodyTrackingSettings, DeviceSettings};
pub use sync::SyncCoordinator;

/// Global configuration that can be atomically swapped at runtime.
///
/// Devices snapshot it when opened; a running stream never sees later stores.
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceSettings,
    pub body_tracking: BodyTrackingSettings,
    pub pipeline: PipelineConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bound on a single capture acquire
    pub capture_timeout_ms: u64,
    /// Decode worker poll interval on an empty task channel
    pub decode_poll_interval_us: u64,
    /// Sleep between capture loop iterations
    pub loop_pause_us: u64,
    /// Pin capture threads to this core
    pub capture_core: Option<usize>,
    /// Decoded color frames held for the consumer before the oldest is dropped
    pub decoded_backlog: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture_timeout_ms: 1000,
            decode_poll_interval_us: 100,
            loop_pause_us: 100,
            capture_core: None,
            decoded_backlog: 2,
        }
    }
}

impl PipelineConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn decode_poll_interval(&self) -> Duration {
        Duration::from_micros(self.decode_poll_interval_us)
    }

    pub fn loop_pause(&self) -> Duration {
        Duration::from_micros(self.loop_pause_us)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Largest accepted difference between expected and actual subordinate
    /// timestamps
    pub max_time_offset_usec: u32,
    pub reconcile_timeout_ms: u64,
    /// Compare the subordinate's depth image instead of its color image
    pub compare_subordinate_depth: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_time_offset_usec: 160,
            reconcile_timeout_ms: 60_000,
            compare_subordinate_depth: false,
        }
    }
}

impl SyncConfig {
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_millis(self.reconcile_timeout_ms)
    }
}
