//! Crate-wide error type

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("device {0} already open")]
    AlreadyOpen(String),

    #[error("device is not open")]
    NotOpen,

    #[error("device {0} is already streaming")]
    AlreadyStreaming(String),

    #[error("device is not streaming")]
    NotStreaming,

    #[error("no device found matching {0}")]
    DeviceNotFound(String),

    #[error("calibration unavailable: {0}")]
    Calibration(String),

    #[error("failed to start cameras: {0}")]
    ModeStart(String),

    #[error("projection table allocation failed for {width}x{height}")]
    TableAllocation { width: u32, height: u32 },

    #[error("image dims mismatch! {frame:?} vs {table:?}")]
    DimensionMismatch { frame: (u32, u32), table: (u32, u32) },

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("color decode failed: {0}")]
    Decode(String),

    #[error("image transformation failed: {0}")]
    Transform(String),

    #[error("body tracker error: {0}")]
    Tracker(String),

    #[error("recorder error: {0}")]
    Recorder(String),

    #[error("synchronized capture: {0}")]
    Sync(String),

    #[error("{0} is not supported by this sensor")]
    Unsupported(&'static str),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
