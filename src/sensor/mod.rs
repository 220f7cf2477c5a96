//! Capability interface to the sensor vendor layer.
//!
//! The pipeline is written once against these traits. A live device, a
//! playback file and the synthetic test rig are all just implementations.

pub mod playback;
pub mod synthetic;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::frame::BodyFrame;
use crate::settings::{BodyTrackingSettings, DeviceSettings, ImageFormat};
use crate::{Error, Result};

pub use playback::{PlaybackControl, PlaybackSensor, Recording};
pub use synthetic::{SyntheticControl, SyntheticRig, SyntheticSensor};

/// Plane kinds a capture may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaneKind {
    Depth,
    Color,
    Infrared,
}

/// Optical geometry a projection refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraKind {
    Depth,
    Color,
}

#[derive(Debug, Clone, Copy)]
pub enum ImageData<'a> {
    /// 16-bit samples (depth, infrared)
    Samples(&'a [u16]),
    /// Raw bytes (BGRA pixels or a compressed stream)
    Bytes(&'a [u8]),
}

/// Borrowed view of one plane inside a capture
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub device_timestamp: Duration,
    pub data: ImageData<'a>,
}

impl<'a> ImageView<'a> {
    pub fn samples(&self) -> Option<&'a [u16]> {
        match self.data {
            ImageData::Samples(samples) => Some(samples),
            ImageData::Bytes(_) => None,
        }
    }

    pub fn bytes(&self) -> Option<&'a [u8]> {
        match self.data {
            ImageData::Bytes(bytes) => Some(bytes),
            ImageData::Samples(_) => None,
        }
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// One synchronized set of planes. Dropping the capture releases it.
pub trait Capture: Send {
    fn plane(&self, kind: PlaneKind) -> Option<ImageView<'_>>;
}

/// Converts image-space pixels to camera-space rays and points.
pub trait Calibration: Send + Sync {
    type Transformation: Transformation;

    /// Pixel dimensions of the given camera, `None` if it is not calibrated.
    fn resolution(&self, camera: CameraKind) -> Option<(u32, u32)>;

    /// Unproject `pixel` at `depth` into 3D in the same camera's space.
    /// `None` when the calibration has no mapping for that pixel.
    fn unproject(&self, pixel: [f32; 2], depth: f32, camera: CameraKind) -> Option<[f32; 3]>;

    /// Build the cross-space image transformation for this calibration.
    fn transformation(&self) -> Result<Self::Transformation>;
}

/// Moves whole images between the depth and color coordinate spaces.
pub trait Transformation: Send {
    /// Fill `out` (color resolution, one sample per pixel) with depth as seen
    /// from the color camera.
    fn depth_to_color(&mut self, depth: &ImageView<'_>, color_size: (u32, u32), out: &mut [u16])
        -> Result<()>;

    /// Fill `out` (depth resolution, BGRA) with color as seen from the depth
    /// camera.
    fn color_to_depth(&mut self, depth: &ImageView<'_>, color: &ImageView<'_>, out: &mut [u8])
        -> Result<()>;
}

/// Skeleton inference collaborator
pub trait BodyTracker<C>: Send {
    fn enqueue(&mut self, capture: &C) -> Result<()>;

    /// Latest result, if inference finished for an enqueued capture.
    fn pop(&mut self) -> Option<BodyFrame>;
}

/// Recording collaborator, fed the still-valid capture once per produced frame
pub trait Recorder<C>: Send {
    fn begin(&mut self, serial: &str, settings: &DeviceSettings) -> Result<()>;
    fn write(&mut self, capture: &C) -> Result<()>;
    fn end(&mut self) -> Result<()>;
}

/// An opened sensor handle
pub trait Sensor: Send + 'static {
    type Capture: Capture + 'static;
    type Calibration: Calibration + 'static;

    fn serial_number(&self) -> &str;

    /// Configure the mode and start the cameras, returning the calibration
    /// for that mode.
    fn start(&mut self, settings: &DeviceSettings) -> Result<Self::Calibration>;

    fn stop(&mut self);

    /// Next capture, `Ok(None)` when `timeout` elapsed without one.
    /// `None` as timeout waits indefinitely.
    fn next_capture(&mut self, timeout: Option<Duration>) -> Result<Option<Self::Capture>>;

    /// Mode the data was captured with, for sensors replaying a recording.
    /// Its mode fields take precedence over the requested settings.
    fn recorded_settings(&self) -> Option<DeviceSettings> {
        None
    }

    fn is_sync_in_connected(&self) -> bool {
        false
    }

    fn is_sync_out_connected(&self) -> bool {
        false
    }

    fn create_tracker(
        &self,
        _calibration: &Self::Calibration,
        _settings: &BodyTrackingSettings,
    ) -> Result<Box<dyn BodyTracker<Self::Capture>>> {
        Err(Error::Unsupported("body tracking"))
    }
}

/// Enumerates and opens sensors
pub trait SensorProvider {
    type Sensor: Sensor;

    fn installed_count(&self) -> usize;

    fn open(&mut self, index: usize) -> Result<Self::Sensor>;

    /// Open the sensor with the given serial number, skipping indices that
    /// fail to open (they may already be in use).
    fn open_by_serial(&mut self, serial: &str) -> Result<(usize, Self::Sensor)> {
        for index in 0..self.installed_count() {
            match self.open(index) {
                Ok(sensor) if sensor.serial_number() == serial => return Ok((index, sensor)),
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(index, error = %e, "Skipping sensor while searching by serial");
                    continue;
                }
            }
        }
        Err(Error::DeviceNotFound(serial.to_string()))
    }
}
