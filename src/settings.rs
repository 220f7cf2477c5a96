//! Sensor mode settings shared by live devices, playback and the sync rig

use serde::{Deserialize, Serialize};

/// Depth camera operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthMode {
    Off,
    Nfov2x2Binned,
    NfovUnbinned,
    Wfov2x2Binned,
    WfovUnbinned,
    PassiveIr,
}

impl DepthMode {
    /// Native resolution of the depth/IR sensor for this mode, `None` when
    /// it is off. Passive IR runs the sensor without producing depth.
    pub fn resolution(self) -> Option<(u32, u32)> {
        match self {
            DepthMode::Off => None,
            DepthMode::Nfov2x2Binned => Some((320, 288)),
            DepthMode::NfovUnbinned => Some((640, 576)),
            DepthMode::Wfov2x2Binned => Some((512, 512)),
            DepthMode::WfovUnbinned | DepthMode::PassiveIr => Some((1024, 1024)),
        }
    }

    /// Whether captures in this mode carry a depth image
    pub fn has_depth(self) -> bool {
        !matches!(self, DepthMode::Off | DepthMode::PassiveIr)
    }
}

/// Color camera resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorResolution {
    Off,
    P720,
    P1080,
    P1440,
    P1536,
    P2160,
    P3072,
}

impl ColorResolution {
    pub fn resolution(self) -> Option<(u32, u32)> {
        match self {
            ColorResolution::Off => None,
            ColorResolution::P720 => Some((1280, 720)),
            ColorResolution::P1080 => Some((1920, 1080)),
            ColorResolution::P1440 => Some((2560, 1440)),
            ColorResolution::P1536 => Some((2048, 1536)),
            ColorResolution::P2160 => Some((3840, 2160)),
            ColorResolution::P3072 => Some((4096, 3072)),
        }
    }
}

/// Pixel layouts a sensor plane can arrive in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    /// Compressed color, needs decoding before use
    Mjpeg,
    /// 4 bytes per pixel, blue first
    Bgra32,
    /// 16-bit depth in millimeters
    Depth16,
    /// 16-bit infrared intensity
    Ir16,
    /// 8-bit single channel (body index maps)
    Custom8,
}

impl ImageFormat {
    pub fn is_compressed(self) -> bool {
        matches!(self, ImageFormat::Mjpeg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FramesPerSecond {
    Fps5,
    Fps15,
    Fps30,
}

impl FramesPerSecond {
    pub fn hz(self) -> u32 {
        match self {
            FramesPerSecond::Fps5 => 5,
            FramesPerSecond::Fps15 => 15,
            FramesPerSecond::Fps30 => 30,
        }
    }

    pub fn period_usec(self) -> i64 {
        1_000_000 / i64::from(self.hz())
    }
}

/// Role of a sensor in a wired multi-sensor rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WiredSyncMode {
    Standalone,
    Master,
    Subordinate,
}

/// Everything that is fixed for the lifetime of one streaming session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub depth_mode: DepthMode,
    pub color_resolution: ColorResolution,
    pub color_format: ImageFormat,
    pub camera_fps: FramesPerSecond,
    pub wired_sync_mode: WiredSyncMode,
    /// Delay of the depth capture relative to color, may be negative
    pub depth_delay_usec: i32,
    /// Delay of a subordinate relative to the master, ignored unless subordinate
    pub subordinate_delay_usec: u32,
    pub update_color: bool,
    pub update_ir: bool,
    /// Build projection tables at stream start
    pub update_world: bool,
    /// Compact a point cloud every frame, requires `update_world`
    pub update_point_cloud: bool,
    /// Reproject depth into color space and color into depth space
    pub update_reprojection: bool,
    /// Only deliver captures that contain both depth and color
    pub sync_images: bool,
    /// Decode compressed color on the worker thread even when not recording
    pub async_color_decode: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            depth_mode: DepthMode::Wfov2x2Binned,
            color_resolution: ColorResolution::P2160,
            color_format: ImageFormat::Bgra32,
            camera_fps: FramesPerSecond::Fps30,
            wired_sync_mode: WiredSyncMode::Standalone,
            depth_delay_usec: 0,
            subordinate_delay_usec: 0,
            update_color: true,
            update_ir: true,
            update_world: true,
            update_point_cloud: true,
            update_reprojection: true,
            sync_images: true,
            async_color_decode: false,
        }
    }
}

impl DeviceSettings {
    pub fn point_cloud_enabled(&self) -> bool {
        self.update_world && self.update_point_cloud
    }

    pub fn reprojection_enabled(&self) -> bool {
        self.update_color && self.update_reprojection
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorOrientation {
    Default,
    Clockwise90,
    CounterClockwise90,
    Flip180,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingMode {
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyTrackingSettings {
    pub sensor_orientation: SensorOrientation,
    pub processing_mode: ProcessingMode,
    pub gpu_device_id: i32,
    pub update_bodies: bool,
}

impl Default for BodyTrackingSettings {
    fn default() -> Self {
        Self {
            sensor_orientation: SensorOrientation::Default,
            processing_mode: ProcessingMode::Gpu,
            gpu_device_id: 0,
            update_bodies: false,
        }
    }
}
