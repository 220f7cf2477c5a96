//! Procedural sensor.
//!
//! Generates depth, infrared and color planes from a frame counter instead of
//! hardware, with a pinhole calibration and scriptable faults (timeouts,
//! failed acquires, missing planes, clock skips). Drives the demo binary and
//! every pipeline test.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{debug, info, instrument, warn};

use super::{
    BodyTracker, Calibration, CameraKind, Capture, ImageData, ImageView, PlaneKind, Sensor,
    SensorProvider, Transformation,
};
use crate::capture::frame::{BodyFrame, Joint, Plane, Position, Skeleton};
use crate::settings::{BodyTrackingSettings, DepthMode, DeviceSettings, ImageFormat, WiredSyncMode};
use crate::{Error, Result};

/// Joints per synthetic skeleton
pub const JOINT_COUNT: usize = 32;

const JPEG_QUALITY: u8 = 90;

/// Pinhole intrinsics of one camera, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    /// Principal point at the image center, square pixels.
    pub fn centered(width: u32, height: u32, focal: f32) -> Self {
        Self {
            width,
            height,
            fx: focal,
            fy: focal,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
        }
    }

    /// 90 degree horizontal field of view
    pub fn for_resolution((width, height): (u32, u32)) -> Self {
        Self::centered(width, height, width as f32 / 2.0)
    }

    fn normalize(&self, [x, y]: [f32; 2]) -> [f32; 2] {
        [(x - self.cx) / self.fx, (y - self.cy) / self.fy]
    }

    /// Nearest pixel for a normalized image-plane point
    fn pixel(&self, [nx, ny]: [f32; 2]) -> Option<(u32, u32)> {
        let u = (self.fx * nx + self.cx).round();
        let v = (self.fy * ny + self.cy).round();
        if u < 0.0 || v < 0.0 || u >= self.width as f32 || v >= self.height as f32 {
            return None;
        }
        Some((u as u32, v as u32))
    }
}

/// Co-located depth and color pinhole cameras.
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCalibration {
    depth: Option<Intrinsics>,
    color: Option<Intrinsics>,
    /// Depth pixels further than this from the center, measured in half-image
    /// units, have no mapping (wide FOV modes see a circle)
    valid_radius: Option<f32>,
}

impl PinholeCalibration {
    pub fn new(depth: Intrinsics, color: Intrinsics) -> Self {
        Self {
            depth: Some(depth),
            color: Some(color),
            valid_radius: None,
        }
    }

    pub fn with_valid_radius(mut self, radius: Option<f32>) -> Self {
        self.valid_radius = radius;
        self
    }

    pub fn without_color(mut self) -> Self {
        self.color = None;
        self
    }

    pub fn without_depth(mut self) -> Self {
        self.depth = None;
        self
    }

    pub fn intrinsics(&self, camera: CameraKind) -> Option<&Intrinsics> {
        match camera {
            CameraKind::Depth => self.depth.as_ref(),
            CameraKind::Color => self.color.as_ref(),
        }
    }

    fn inside_fov(&self, intr: &Intrinsics, [x, y]: [f32; 2]) -> bool {
        match self.valid_radius {
            Some(radius) => {
                let ux = (x - intr.cx) / intr.cx;
                let uy = (y - intr.cy) / intr.cy;
                (ux * ux + uy * uy).sqrt() <= radius
            }
            None => true,
        }
    }
}

impl Calibration for PinholeCalibration {
    type Transformation = PinholeTransformation;

    fn resolution(&self, camera: CameraKind) -> Option<(u32, u32)> {
        self.intrinsics(camera).map(|i| (i.width, i.height))
    }

    fn unproject(&self, pixel: [f32; 2], depth: f32, camera: CameraKind) -> Option<[f32; 3]> {
        let intr = self.intrinsics(camera)?;
        if camera == CameraKind::Depth && !self.inside_fov(intr, pixel) {
            return None;
        }
        let [nx, ny] = intr.normalize(pixel);
        Some([nx * depth, ny * depth, depth])
    }

    fn transformation(&self) -> Result<PinholeTransformation> {
        match (self.depth, self.color) {
            (Some(depth), Some(color)) => Ok(PinholeTransformation { depth, color }),
            _ => Err(Error::Calibration(
                "transformation needs both depth and color cameras".into(),
            )),
        }
    }
}

/// Nearest-pixel reprojection between the two pinhole cameras
#[derive(Debug, Clone)]
pub struct PinholeTransformation {
    depth: Intrinsics,
    color: Intrinsics,
}

impl PinholeTransformation {
    fn check_depth<'a>(&self, depth: &ImageView<'a>) -> Result<&'a [u16]> {
        let samples = depth
            .samples()
            .ok_or_else(|| Error::Transform("depth plane is not 16-bit".into()))?;
        if depth.dims() != (self.depth.width, self.depth.height)
            || samples.len() < (depth.width * depth.height) as usize
        {
            return Err(Error::Transform(format!(
                "depth plane {:?} does not match calibration {:?}",
                depth.dims(),
                (self.depth.width, self.depth.height)
            )));
        }
        Ok(samples)
    }
}

impl Transformation for PinholeTransformation {
    fn depth_to_color(
        &mut self,
        depth: &ImageView<'_>,
        color_size: (u32, u32),
        out: &mut [u16],
    ) -> Result<()> {
        let samples = self.check_depth(depth)?;
        let (cw, ch) = color_size;
        if color_size != (self.color.width, self.color.height) || out.len() < (cw * ch) as usize {
            return Err(Error::Transform(format!("bad color target {color_size:?}")));
        }

        out.fill(0);
        for y in 0..depth.height {
            for x in 0..depth.width {
                let d = samples[(y * depth.width + x) as usize];
                if d == 0 {
                    continue;
                }
                let normalized = self.depth.normalize([x as f32, y as f32]);
                let Some((u, v)) = self.color.pixel(normalized) else {
                    continue;
                };
                // keep the nearest surface when several samples land on one pixel
                let slot = &mut out[(v * cw + u) as usize];
                if *slot == 0 || d < *slot {
                    *slot = d;
                }
            }
        }
        Ok(())
    }

    fn color_to_depth(
        &mut self,
        depth: &ImageView<'_>,
        color: &ImageView<'_>,
        out: &mut [u8],
    ) -> Result<()> {
        let samples = self.check_depth(depth)?;
        let pixels = color
            .bytes()
            .filter(|_| color.format == ImageFormat::Bgra32)
            .ok_or_else(|| Error::Transform("color plane must be BGRA".into()))?;
        let (cw, ch) = color.dims();
        if (cw, ch) != (self.color.width, self.color.height) || pixels.len() < (cw * ch * 4) as usize {
            return Err(Error::Transform(format!("bad color source {:?}", (cw, ch))));
        }
        if out.len() < (depth.width * depth.height * 4) as usize {
            return Err(Error::Transform("color-in-depth target too small".into()));
        }

        for y in 0..depth.height {
            for x in 0..depth.width {
                let idx = (y * depth.width + x) as usize;
                let dst = &mut out[idx * 4..idx * 4 + 4];
                if samples[idx] == 0 {
                    dst.fill(0);
                    continue;
                }
                let normalized = self.depth.normalize([x as f32, y as f32]);
                match self.color.pixel(normalized) {
                    Some((u, v)) => {
                        let src = ((v * cw + u) * 4) as usize;
                        dst.copy_from_slice(&pixels[src..src + 4]);
                    }
                    None => dst.fill(0),
                }
            }
        }
        Ok(())
    }
}

/// Content generator for synthetic planes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Sloped surface with a regular grid of holes
    Ramp,
    /// Every sample carries the frame index, for detecting torn frames
    FrameIndex,
}

#[derive(Debug, Default)]
struct ControlState {
    timeouts: u32,
    failures: u32,
    skip: u64,
    dropped: HashMap<PlaneKind, u32>,
    fail_start: bool,
    delivered: u64,
}

/// Script faults into a running synthetic sensor from another thread.
#[derive(Debug, Clone, Default)]
pub struct SyntheticControl {
    state: Arc<Mutex<ControlState>>,
    released: Arc<AtomicU64>,
}

impl SyntheticControl {
    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The next `n` acquires time out.
    pub fn inject_timeouts(&self, n: u32) {
        self.lock().timeouts += n;
    }

    /// The next `n` acquires fail with a capture error.
    pub fn inject_failures(&self, n: u32) {
        self.lock().failures += n;
    }

    /// Jump the frame clock `n` periods ahead.
    pub fn skip_frames(&self, n: u64) {
        self.lock().skip += n;
    }

    /// The next `n` captures arrive without `kind`.
    pub fn drop_planes(&self, kind: PlaneKind, n: u32) {
        *self.lock().dropped.entry(kind).or_default() += n;
    }

    /// The next `start` fails to configure the mode.
    pub fn fail_next_start(&self) {
        self.lock().fail_start = true;
    }

    pub fn captures_delivered(&self) -> u64 {
        self.lock().delivered
    }

    /// Captures whose last handle was dropped
    pub fn captures_released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }
}

/// Bumps the release counter once, when the last clone of a capture goes away
#[derive(Debug)]
struct ReleaseGuard(Arc<AtomicU64>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
struct RawImage<T> {
    width: u32,
    height: u32,
    format: ImageFormat,
    device_timestamp: Duration,
    data: Vec<T>,
}

/// One capture from a [`SyntheticSensor`]. Clones share planes and the
/// release guard, like reference-counted vendor handles.
#[derive(Debug, Clone)]
pub struct SyntheticCapture {
    index: u64,
    depth: Option<Arc<RawImage<u16>>>,
    ir: Option<Arc<RawImage<u16>>>,
    color: Option<Arc<RawImage<u8>>>,
    _release: Arc<ReleaseGuard>,
}

impl SyntheticCapture {
    /// Frame counter value the capture was generated from
    pub fn index(&self) -> u64 {
        self.index
    }
}

impl Capture for SyntheticCapture {
    fn plane(&self, kind: PlaneKind) -> Option<ImageView<'_>> {
        match kind {
            PlaneKind::Depth => self.depth.as_deref().map(samples_view),
            PlaneKind::Infrared => self.ir.as_deref().map(samples_view),
            PlaneKind::Color => self.color.as_deref().map(|img| ImageView {
                width: img.width,
                height: img.height,
                format: img.format,
                device_timestamp: img.device_timestamp,
                data: ImageData::Bytes(&img.data),
            }),
        }
    }
}

fn samples_view(img: &RawImage<u16>) -> ImageView<'_> {
    ImageView {
        width: img.width,
        height: img.height,
        format: img.format,
        device_timestamp: img.device_timestamp,
        data: ImageData::Samples(&img.data),
    }
}

#[derive(Debug, Clone)]
struct ActiveMode {
    settings: DeviceSettings,
    depth_size: Option<(u32, u32)>,
    color_size: Option<(u32, u32)>,
    index: u64,
    last_delivery: Option<Instant>,
}

/// Procedural stand-in for a depth camera.
#[derive(Debug, Clone)]
pub struct SyntheticSensor {
    serial: String,
    depth_size: Option<(u32, u32)>,
    color_size: Option<(u32, u32)>,
    sync_in: bool,
    sync_out: bool,
    clock_offset_usec: i64,
    realtime: bool,
    pattern: Pattern,
    body_tracking: bool,
    control: SyntheticControl,
    active: Option<ActiveMode>,
    in_use: Option<Arc<AtomicBool>>,
}

impl SyntheticSensor {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            depth_size: None,
            color_size: None,
            sync_in: false,
            sync_out: false,
            clock_offset_usec: 0,
            realtime: false,
            pattern: Pattern::Ramp,
            body_tracking: false,
            control: SyntheticControl::default(),
            active: None,
            in_use: None,
        }
    }

    /// Override the mode resolutions, keeping tests small.
    pub fn with_resolution(mut self, depth: (u32, u32), color: (u32, u32)) -> Self {
        self.depth_size = Some(depth);
        self.color_size = Some(color);
        self
    }

    pub fn with_sync_cables(mut self, sync_in: bool, sync_out: bool) -> Self {
        self.sync_in = sync_in;
        self.sync_out = sync_out;
        self
    }

    /// Device clock value at frame zero
    pub fn with_clock_offset(mut self, usec: i64) -> Self {
        self.clock_offset_usec = usec;
        self
    }

    /// Pace captures at the configured frame rate instead of returning
    /// immediately.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_body_tracking(mut self, supported: bool) -> Self {
        self.body_tracking = supported;
        self
    }

    pub fn control(&self) -> SyntheticControl {
        self.control.clone()
    }

    fn calibration_for(&self, depth: Option<(u32, u32)>, color: Option<(u32, u32)>, mode: DepthMode) -> PinholeCalibration {
        let wide = matches!(mode, DepthMode::Wfov2x2Binned | DepthMode::WfovUnbinned);
        PinholeCalibration {
            depth: depth.map(Intrinsics::for_resolution),
            color: color.map(Intrinsics::for_resolution),
            valid_radius: wide.then_some(1.0),
        }
    }

    fn timestamps(&self, settings: &DeviceSettings, index: u64) -> (Duration, Duration) {
        let mut color = self.clock_offset_usec + index as i64 * settings.camera_fps.period_usec();
        if settings.wired_sync_mode == WiredSyncMode::Subordinate {
            color += i64::from(settings.subordinate_delay_usec);
        }
        let depth = color + i64::from(settings.depth_delay_usec);
        let clamp = |usec: i64| Duration::from_micros(usec.max(0) as u64);
        (clamp(depth), clamp(color))
    }

    fn generate(&self, mode: &ActiveMode, dropped: &[PlaneKind]) -> Result<SyntheticCapture> {
        let settings = &mode.settings;
        let index = mode.index;
        let (depth_ts, color_ts) = self.timestamps(settings, index);

        let depth = match mode.depth_size {
            Some((w, h)) if settings.depth_mode.has_depth() && !dropped.contains(&PlaneKind::Depth) => {
                Some(Arc::new(RawImage {
                    width: w,
                    height: h,
                    format: ImageFormat::Depth16,
                    device_timestamp: depth_ts,
                    data: self.depth_samples(w, h, index),
                }))
            }
            _ => None,
        };

        let ir = match mode.depth_size {
            Some((w, h)) if !dropped.contains(&PlaneKind::Infrared) => Some(Arc::new(RawImage {
                width: w,
                height: h,
                format: ImageFormat::Ir16,
                device_timestamp: depth_ts,
                data: self.depth_samples(w, h, index).iter().map(|d| d / 4 + 1).collect(),
            })),
            _ => None,
        };

        let color = match mode.color_size {
            Some((w, h)) if !dropped.contains(&PlaneKind::Color) => {
                let data = self.color_pixels(w, h, index, settings.color_format)?;
                Some(Arc::new(RawImage {
                    width: w,
                    height: h,
                    format: settings.color_format,
                    device_timestamp: color_ts,
                    data,
                }))
            }
            _ => None,
        };

        Ok(SyntheticCapture {
            index,
            depth,
            ir,
            color,
            _release: Arc::new(ReleaseGuard(self.control.released.clone())),
        })
    }

    fn depth_samples(&self, width: u32, height: u32, index: u64) -> Vec<u16> {
        match self.pattern {
            Pattern::FrameIndex => {
                let value = (index % u64::from(u16::MAX)) as u16 + 1;
                vec![value; (width * height) as usize]
            }
            Pattern::Ramp => (0..height)
                .flat_map(|y| (0..width).map(move |x| (x, y)))
                .map(|(x, y)| {
                    if x % 11 == 0 && y % 11 == 0 {
                        0
                    } else {
                        500 + ((x * 7 + y * 3 + index as u32) % 3000) as u16
                    }
                })
                .collect(),
        }
    }

    fn color_pixels(&self, width: u32, height: u32, index: u64, format: ImageFormat) -> Result<Vec<u8>> {
        let rgb = |x: u32, y: u32| -> [u8; 3] {
            match self.pattern {
                Pattern::FrameIndex => [index as u8; 3],
                Pattern::Ramp => [x as u8, y as u8, index as u8],
            }
        };

        match format {
            ImageFormat::Bgra32 => Ok((0..height)
                .flat_map(|y| (0..width).map(move |x| (x, y)))
                .flat_map(|(x, y)| {
                    let [r, g, b] = rgb(x, y);
                    [b, g, r, 255]
                })
                .collect()),
            ImageFormat::Mjpeg => {
                let pixels: Vec<u8> = (0..height)
                    .flat_map(|y| (0..width).map(move |x| (x, y)))
                    .flat_map(|(x, y)| rgb(x, y))
                    .collect();
                let mut out = Vec::new();
                JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
                    .encode(&pixels, width, height, ExtendedColorType::Rgb8)
                    .map_err(|e| Error::Capture(format!("jpeg encode: {e}")))?;
                Ok(out)
            }
            other => Err(Error::ModeStart(format!("color format {other:?} not produced"))),
        }
    }

    /// Sleep until the next frame is due. Returns false when that is further
    /// away than `timeout`.
    fn pace(mode: &mut ActiveMode, timeout: Option<Duration>) -> bool {
        let period = Duration::from_micros(mode.settings.camera_fps.period_usec() as u64);
        if let Some(last) = mode.last_delivery {
            let due = last + period;
            let now = Instant::now();
            if due > now {
                let wait = due - now;
                if let Some(timeout) = timeout.filter(|t| *t < wait) {
                    thread::sleep(timeout);
                    return false;
                }
                thread::sleep(wait);
            }
        }
        mode.last_delivery = Some(Instant::now());
        true
    }
}

impl Drop for SyntheticSensor {
    fn drop(&mut self) {
        if let Some(flag) = self.in_use.take() {
            flag.store(false, Ordering::Release);
        }
    }
}

impl Sensor for SyntheticSensor {
    type Capture = SyntheticCapture;
    type Calibration = PinholeCalibration;

    fn serial_number(&self) -> &str {
        &self.serial
    }

    #[instrument(skip(self, settings), fields(serial = %self.serial))]
    fn start(&mut self, settings: &DeviceSettings) -> Result<PinholeCalibration> {
        if std::mem::take(&mut self.control.lock().fail_start) {
            return Err(Error::ModeStart(format!("{} refused the mode", self.serial)));
        }
        if settings.color_resolution.resolution().is_some()
            && !matches!(settings.color_format, ImageFormat::Bgra32 | ImageFormat::Mjpeg)
        {
            return Err(Error::ModeStart(format!(
                "color format {:?} not supported",
                settings.color_format
            )));
        }

        let depth_size = settings
            .depth_mode
            .resolution()
            .map(|native| self.depth_size.unwrap_or(native));
        let color_size = settings
            .color_resolution
            .resolution()
            .map(|native| self.color_size.unwrap_or(native));
        if depth_size.is_none() && color_size.is_none() {
            return Err(Error::ModeStart("both cameras are off".into()));
        }

        let calibration = self.calibration_for(depth_size, color_size, settings.depth_mode);
        self.active = Some(ActiveMode {
            settings: settings.clone(),
            depth_size,
            color_size,
            index: 0,
            last_delivery: None,
        });

        info!(?depth_size, ?color_size, fps = settings.camera_fps.hz(), "Synthetic cameras started");
        Ok(calibration)
    }

    fn stop(&mut self) {
        if self.active.take().is_some() {
            debug!(serial = %self.serial, "Synthetic cameras stopped");
        }
    }

    fn next_capture(&mut self, timeout: Option<Duration>) -> Result<Option<SyntheticCapture>> {
        let Some(mut mode) = self.active.take() else {
            return Err(Error::Capture(format!("{} is not started", self.serial)));
        };
        let result = self.acquire(&mut mode, timeout);
        self.active = Some(mode);
        result
    }

    fn is_sync_in_connected(&self) -> bool {
        self.sync_in
    }

    fn is_sync_out_connected(&self) -> bool {
        self.sync_out
    }

    fn create_tracker(
        &self,
        calibration: &PinholeCalibration,
        settings: &BodyTrackingSettings,
    ) -> Result<Box<dyn BodyTracker<SyntheticCapture>>> {
        if !self.body_tracking {
            return Err(Error::Unsupported("body tracking"));
        }
        let dims = calibration
            .resolution(CameraKind::Depth)
            .ok_or_else(|| Error::Tracker("tracking needs the depth camera".into()))?;
        debug!(serial = %self.serial, mode = ?settings.processing_mode, "Synthetic tracker created");
        Ok(Box::new(SyntheticTracker::new(dims)))
    }
}

impl SyntheticSensor {
    fn acquire(&self, mode: &mut ActiveMode, timeout: Option<Duration>) -> Result<Option<SyntheticCapture>> {
        let mut dropped = Vec::new();
        {
            let mut control = self.control.lock();
            if control.failures > 0 {
                control.failures -= 1;
                return Err(Error::Capture(format!("{} acquire failed", self.serial)));
            }
            if control.timeouts > 0 {
                control.timeouts -= 1;
                return Ok(None);
            }
            mode.index += std::mem::take(&mut control.skip);

            // hardware in synchronized mode holds back captures missing depth
            // or color; emulate that by burning a frame
            loop {
                dropped.clear();
                for (kind, remaining) in control.dropped.iter_mut() {
                    if *remaining > 0 {
                        *remaining -= 1;
                        dropped.push(*kind);
                    }
                }
                let incomplete = dropped
                    .iter()
                    .any(|k| matches!(k, PlaneKind::Depth | PlaneKind::Color));
                if !(mode.settings.sync_images && incomplete) {
                    break;
                }
                mode.index += 1;
            }
        }

        if self.realtime && !Self::pace(mode, timeout) {
            return Ok(None);
        }

        let capture = self.generate(mode, &dropped)?;
        mode.index += 1;
        self.control.lock().delivered += 1;
        Ok(Some(capture))
    }
}

/// Enumerates a fixed set of synthetic sensors.
#[derive(Debug, Default)]
pub struct SyntheticRig {
    sensors: Vec<(SyntheticSensor, Arc<AtomicBool>)>,
}

impl SyntheticRig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensor(mut self, sensor: SyntheticSensor) -> Self {
        self.sensors.push((sensor, Arc::new(AtomicBool::new(false))));
        self
    }

    pub fn control(&self, index: usize) -> Option<SyntheticControl> {
        self.sensors.get(index).map(|(sensor, _)| sensor.control())
    }
}

impl SensorProvider for SyntheticRig {
    type Sensor = SyntheticSensor;

    fn installed_count(&self) -> usize {
        self.sensors.len()
    }

    fn open(&mut self, index: usize) -> Result<SyntheticSensor> {
        let (prototype, in_use) = self
            .sensors
            .get(index)
            .ok_or_else(|| Error::DeviceNotFound(format!("index {index}")))?;
        if in_use.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyOpen(prototype.serial.clone()));
        }
        let mut sensor = prototype.clone();
        sensor.in_use = Some(in_use.clone());
        Ok(sensor)
    }
}

/// Finds one "body" in front of the sensor: the pixels nearer than the
/// median depth.
pub struct SyntheticTracker {
    dims: (u32, u32),
    results: VecDeque<BodyFrame>,
}

impl SyntheticTracker {
    const MAX_QUEUED: usize = 3;

    fn new(dims: (u32, u32)) -> Self {
        Self {
            dims,
            results: VecDeque::new(),
        }
    }
}

impl BodyTracker<SyntheticCapture> for SyntheticTracker {
    fn enqueue(&mut self, capture: &SyntheticCapture) -> Result<()> {
        let depth = capture
            .plane(PlaneKind::Depth)
            .ok_or_else(|| Error::Tracker("capture has no depth".into()))?;
        let samples = depth
            .samples()
            .ok_or_else(|| Error::Tracker("depth is not 16-bit".into()))?;
        if depth.dims() != self.dims {
            return Err(Error::Tracker(format!("unexpected depth dims {:?}", depth.dims())));
        }

        let mut sorted: Vec<u16> = samples.iter().copied().filter(|d| *d != 0).collect();
        sorted.sort_unstable();
        let Some(&median) = sorted.get(sorted.len() / 2) else {
            self.results.push_back(BodyFrame::default());
            return Ok(());
        };

        let (w, h) = self.dims;
        let mut index_map = Plane::<u8>::default();
        index_map.allocate(w, h, 1);
        let (mut sx, mut sy, mut sz, mut n) = (0f32, 0f32, 0f32, 0f32);
        for (i, &d) in samples.iter().enumerate() {
            if d != 0 && d < median {
                index_map.data[i] = 0;
                sx += (i as u32 % w) as f32;
                sy += (i as u32 / w) as f32;
                sz += f32::from(d);
                n += 1.0;
            } else {
                index_map.data[i] = u8::MAX;
            }
        }
        index_map.device_timestamp = depth.device_timestamp;

        let mut body = BodyFrame {
            index_map,
            ..Default::default()
        };
        if n > 0.0 {
            let center = Position {
                x: sx / n - w as f32 / 2.0,
                y: sy / n - h as f32 / 2.0,
                z: sz / n,
            };
            let joints = (0..JOINT_COUNT)
                .map(|j| Joint {
                    position: Position {
                        y: center.y - j as f32 * 10.0,
                        ..center
                    },
                    orientation: [1.0, 0.0, 0.0, 0.0],
                    confidence: 2,
                })
                .collect();
            body.skeletons.push(Skeleton { joints });
            body.body_ids.push(1);
        }

        if self.results.len() == Self::MAX_QUEUED {
            warn!("Synthetic tracker queue full, dropping oldest result");
            self.results.pop_front();
        }
        self.results.push_back(body);
        Ok(())
    }

    fn pop(&mut self) -> Option<BodyFrame> {
        self.results.pop_front()
    }
}
