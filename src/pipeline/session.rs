//! Resources of one streaming session and the per-capture processing pass

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::utils::CachePadded;
use tracing::{debug, error, info, instrument, trace, warn};

use super::handoff::FrameHandoff;
use crate::capture::decode_worker::{DecodeSubmitter, DecodeTask};
use crate::capture::decoder::{ColorDecoder, BGRA_CHANNELS};
use crate::capture::frame::Frame;
use crate::projection::ProjectionTable;
use crate::sensor::{
    BodyTracker, Calibration, CameraKind, Capture, ImageData, ImageView, PlaneKind, Recorder,
    Sensor, Transformation,
};
use crate::settings::{BodyTrackingSettings, DeviceSettings, ImageFormat, WiredSyncMode};
use crate::{PipelineConfig, Result};

type TransformOf<S> = <<S as Sensor>::Calibration as Calibration>::Transformation;

/// Session slot shared by a device, its capture thread and a sync coordinator
pub(crate) type SessionSlot<S> = Arc<Mutex<Option<SensorSession<S>>>>;

pub(crate) fn lock_slot<S: Sensor>(slot: &SessionSlot<S>) -> MutexGuard<'_, Option<SensorSession<S>>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub(crate) struct Counters {
    pub capture_timeouts: AtomicU64,
    pub capture_errors: AtomicU64,
    pub missing_planes: AtomicU64,
    pub decode_tasks_skipped: AtomicU64,
    pub compaction_errors: AtomicU64,
}

/// Active recorder plus a flag the capture loop can read without locking
pub(crate) struct RecordingSlot<C> {
    active: AtomicBool,
    recorder: Mutex<Option<Box<dyn Recorder<C>>>>,
}

impl<C> RecordingSlot<C> {
    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Recorder<C>>>> {
        self.recorder.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn begin(
        &self,
        mut recorder: Box<dyn Recorder<C>>,
        serial: &str,
        settings: &DeviceSettings,
    ) -> Result<()> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(crate::Error::Recorder(format!("{serial} is already recording")));
        }
        recorder.begin(serial, settings)?;
        *slot = Some(recorder);
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    fn write(&self, capture: &C) {
        if let Some(recorder) = self.lock().as_mut() {
            if let Err(e) = recorder.write(capture) {
                warn!(error = %e, "Dropping capture from recording");
            }
        }
    }

    /// Stop and finalize the active recorder; returns false if none was active.
    pub fn end(&self) -> Result<bool> {
        self.active.store(false, Ordering::Release);
        match self.lock().take() {
            Some(mut recorder) => recorder.end().map(|()| true),
            None => Ok(false),
        }
    }
}

/// State both threads of a session touch
pub(crate) struct SessionShared<C> {
    pub handoff: FrameHandoff,
    pub counters: CachePadded<Counters>,
    pub recording: RecordingSlot<C>,
}

impl<C> SessionShared<C> {
    pub fn new(serial: &str) -> Self {
        Self {
            handoff: FrameHandoff::new(serial),
            counters: CachePadded::new(Counters::default()),
            recording: RecordingSlot {
                active: AtomicBool::new(false),
                recorder: Mutex::new(None),
            },
        }
    }

    /// Producer side of step 1: wait for the consumer unless recording.
    pub fn wait_for_consumer(&self, running: &AtomicBool) {
        if !self.recording.is_active() {
            self.handoff.wait_for_consumer(running);
        }
    }
}

/// Master without sync-out or subordinate without sync-in falls back to
/// standalone. Only subordinates keep a subordinate delay.
pub(crate) fn validate_wired_sync(
    mut settings: DeviceSettings,
    serial: &str,
    sync_in: bool,
    sync_out: bool,
) -> DeviceSettings {
    match settings.wired_sync_mode {
        WiredSyncMode::Master if !sync_out => {
            warn!(serial, "Sync out cable not connected, reverting to standalone");
            settings.wired_sync_mode = WiredSyncMode::Standalone;
        }
        WiredSyncMode::Subordinate if !sync_in => {
            warn!(serial, "Sync in cable not connected, reverting to standalone");
            settings.wired_sync_mode = WiredSyncMode::Standalone;
        }
        _ => {}
    }
    if settings.wired_sync_mode != WiredSyncMode::Subordinate {
        settings.subordinate_delay_usec = 0;
    }
    settings
}

/// Mode fields of a recording override the request; processing toggles stay.
fn apply_recorded_mode(settings: &mut DeviceSettings, recorded: DeviceSettings) {
    settings.depth_mode = recorded.depth_mode;
    settings.color_resolution = recorded.color_resolution;
    settings.color_format = recorded.color_format;
    settings.camera_fps = recorded.camera_fps;
    settings.wired_sync_mode = recorded.wired_sync_mode;
    settings.depth_delay_usec = recorded.depth_delay_usec;
    settings.subordinate_delay_usec = recorded.subordinate_delay_usec;
}

/// Everything built at stream start, read-only while streaming
pub(crate) struct Prepared<S: Sensor> {
    pub settings: DeviceSettings,
    pub calibration: Arc<S::Calibration>,
    pub transformation: Option<TransformOf<S>>,
    pub depth_table: Option<Arc<ProjectionTable>>,
    pub color_table: Option<Arc<ProjectionTable>>,
    pub tracker: Option<Box<dyn BodyTracker<S::Capture>>>,
}

/// Validate the mode, start the cameras and build the auxiliary resources.
///
/// On any error the sensor is stopped again before returning, so the caller
/// is left with an open, idle sensor.
#[instrument(skip_all, fields(serial = %sensor.serial_number()))]
pub(crate) fn prepare<S: Sensor>(
    sensor: &mut S,
    requested: &DeviceSettings,
    body_tracking: &BodyTrackingSettings,
) -> Result<Prepared<S>> {
    let mut settings = requested.clone();
    if let Some(recorded) = sensor.recorded_settings() {
        apply_recorded_mode(&mut settings, recorded);
    }
    let settings = validate_wired_sync(
        settings,
        sensor.serial_number(),
        sensor.is_sync_in_connected(),
        sensor.is_sync_out_connected(),
    );

    let calibration = sensor.start(&settings)?;
    match build_resources(sensor, &settings, body_tracking, &calibration) {
        Ok((transformation, depth_table, color_table, tracker)) => Ok(Prepared {
            settings,
            calibration: Arc::new(calibration),
            transformation,
            depth_table,
            color_table,
            tracker,
        }),
        Err(e) => {
            error!(error = %e, "Stream setup failed, stopping cameras");
            sensor.stop();
            Err(e)
        }
    }
}

#[allow(clippy::type_complexity)]
fn build_resources<S: Sensor>(
    sensor: &S,
    settings: &DeviceSettings,
    body_tracking: &BodyTrackingSettings,
    calibration: &S::Calibration,
) -> Result<(
    Option<TransformOf<S>>,
    Option<Arc<ProjectionTable>>,
    Option<Arc<ProjectionTable>>,
    Option<Box<dyn BodyTracker<S::Capture>>>,
)> {
    let has_depth = settings.depth_mode.has_depth();
    let has_color = settings.color_resolution.resolution().is_some();

    let depth_table = if settings.update_world && has_depth {
        Some(Arc::new(ProjectionTable::build(calibration, CameraKind::Depth)?))
    } else {
        None
    };
    let color_table = if settings.update_world && settings.update_color && has_color {
        Some(Arc::new(ProjectionTable::build(calibration, CameraKind::Color)?))
    } else {
        None
    };
    let transformation = if settings.reprojection_enabled() && has_depth && has_color {
        Some(calibration.transformation()?)
    } else {
        None
    };
    let tracker = if body_tracking.update_bodies {
        if !has_depth {
            return Err(crate::Error::Tracker(format!(
                "{:?} produces no depth to track bodies in",
                settings.depth_mode
            )));
        }
        Some(sensor.create_tracker(calibration, body_tracking)?)
    } else {
        None
    };

    Ok((transformation, depth_table, color_table, tracker))
}

/// One streaming session: the sensor, its resources and the back frame.
pub(crate) struct SensorSession<S: Sensor> {
    serial: String,
    sensor: S,
    settings: DeviceSettings,
    capture_timeout: Duration,
    calibration: Arc<S::Calibration>,
    transformation: Option<TransformOf<S>>,
    depth_table: Option<Arc<ProjectionTable>>,
    tracker: Option<Box<dyn BodyTracker<S::Capture>>>,
    decoder: ColorDecoder,
    decode: Option<DecodeSubmitter>,
    shared: Arc<SessionShared<S::Capture>>,
    back: Frame,
    cycle: u64,
}

impl<S: Sensor> SensorSession<S> {
    pub fn new(
        sensor: S,
        prepared: Prepared<S>,
        pipeline: &PipelineConfig,
        decode: Option<DecodeSubmitter>,
        shared: Arc<SessionShared<S::Capture>>,
    ) -> Self {
        let serial = sensor.serial_number().to_string();
        info!(
            serial = %serial,
            depth_mode = ?prepared.settings.depth_mode,
            color = ?prepared.settings.color_resolution,
            sync = ?prepared.settings.wired_sync_mode,
            "Session ready"
        );
        Self {
            serial,
            sensor,
            settings: prepared.settings,
            capture_timeout: pipeline.capture_timeout(),
            calibration: prepared.calibration,
            transformation: prepared.transformation,
            depth_table: prepared.depth_table,
            tracker: prepared.tracker,
            decoder: ColorDecoder::default(),
            decode,
            shared,
            back: Frame::default(),
            cycle: 0,
        }
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Step 2: one bounded acquire. Timeouts and errors are logged and
    /// counted, never returned.
    pub fn acquire(&mut self) -> Option<S::Capture> {
        match self.sensor.next_capture(Some(self.capture_timeout)) {
            Ok(Some(capture)) => Some(capture),
            Ok(None) => {
                warn!(
                    serial = %self.serial,
                    timeout_ms = self.capture_timeout.as_millis() as u64,
                    "Timed out waiting for a capture"
                );
                self.shared.counters.capture_timeouts.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("depthstream_capture_timeouts", "serial" => self.serial.clone())
                    .increment(1);
                None
            }
            Err(e) => {
                warn!(serial = %self.serial, error = %e, "Capture failed");
                self.shared.counters.capture_errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Keep acquiring until a capture arrives or `running` drops.
    pub fn acquire_blocking(&mut self, running: &AtomicBool) -> Option<S::Capture> {
        while running.load(Ordering::Acquire) {
            if let Some(capture) = self.acquire() {
                return Some(capture);
            }
        }
        None
    }

    fn missing(&self, plane: &'static str) {
        warn!(serial = %self.serial, plane, "Capture is missing a plane");
        self.shared.counters.missing_planes.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("depthstream_missing_planes", "serial" => self.serial.clone())
            .increment(1);
    }

    /// Steps 3 to 8 for one capture, filling the back frame.
    ///
    /// The capture is only borrowed; the caller drops it afterwards, which
    /// is the single release of its handle.
    pub fn process(&mut self, capture: &S::Capture) {
        self.cycle += 1;
        let cycle = self.cycle;
        self.back.cycle = cycle;
        self.back.color_updated = false;
        let recording = self.shared.recording.is_active();

        let depth = capture.plane(PlaneKind::Depth);
        if let Some(view) = depth {
            match view.samples() {
                Some(samples) => {
                    self.back.depth.set_from(view.width, view.height, 1, samples);
                    self.back.depth.device_timestamp = view.device_timestamp;
                    self.back.depth.cycle = cycle;
                }
                None => warn!(serial = %self.serial, "Depth plane is not 16-bit"),
            }
        } else if self.settings.depth_mode.has_depth() {
            self.missing("depth");
        }

        if self.settings.update_ir && self.settings.depth_mode.resolution().is_some() {
            match capture.plane(PlaneKind::Infrared) {
                Some(view) => {
                    if let Some(samples) = view.samples() {
                        self.back.ir.set_from(view.width, view.height, 1, samples);
                        self.back.ir.device_timestamp = view.device_timestamp;
                        self.back.ir.cycle = cycle;
                    }
                }
                None => self.missing("infrared"),
            }
        }

        let color = capture.plane(PlaneKind::Color);
        if self.settings.update_color && self.settings.color_resolution.resolution().is_some() {
            match color {
                Some(view) => self.update_color(&view, cycle, recording),
                None => self.missing("color"),
            }
        }

        if let Some(view) = depth.filter(|_| self.transformation.is_some()) {
            self.reproject(&view, color.as_ref(), cycle);
        }

        if let (Some(table), true) = (&self.depth_table, self.settings.point_cloud_enabled()) {
            if self.back.depth.cycle == cycle {
                let dims = (self.back.depth.width, self.back.depth.height);
                match self.back.point_cloud.compact(&self.back.depth.data, dims, table) {
                    Ok(points) => {
                        self.back.point_cloud.cycle = cycle;
                        trace!(serial = %self.serial, points, "Point cloud compacted");
                    }
                    Err(_) => {
                        self.shared.counters.compaction_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        if let Some(tracker) = self.tracker.as_mut() {
            if let Err(e) = tracker.enqueue(capture) {
                warn!(serial = %self.serial, error = %e, "Body tracker rejected capture");
            }
            let mut latest = None;
            while let Some(bodies) = tracker.pop() {
                latest = Some(bodies);
            }
            if let Some(mut bodies) = latest {
                bodies.cycle = cycle;
                self.back.bodies = bodies;
            }
        }

        if recording {
            self.shared.recording.write(capture);
        }
    }

    fn update_color(&mut self, view: &ImageView<'_>, cycle: u64, recording: bool) {
        let Some(bytes) = view.bytes() else {
            warn!(serial = %self.serial, "Color plane is not byte data");
            return;
        };

        if !view.format.is_compressed() {
            self.back.color.set_from(view.width, view.height, BGRA_CHANNELS, bytes);
            self.back.color.device_timestamp = view.device_timestamp;
            self.back.color.cycle = cycle;
            self.back.color_updated = true;
            return;
        }

        match self.decode.as_ref() {
            Some(decode) if recording || self.settings.async_color_decode => {
                let task = DecodeTask {
                    data: Bytes::copy_from_slice(bytes),
                    format: view.format,
                    device_timestamp: view.device_timestamp,
                    cycle,
                };
                match decode.push_task_if_empty(task) {
                    Ok(true) => {}
                    Ok(false) => {
                        trace!(serial = %self.serial, cycle, "Decoder busy, skipping color");
                        self.shared.counters.decode_tasks_skipped.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("depthstream_decode_tasks_skipped", "serial" => self.serial.clone())
                            .increment(1);
                    }
                    Err(e) => warn!(serial = %self.serial, cycle, error = %e, "Color not submitted"),
                }
            }
            _ => match self.decoder.decode_into(bytes, view.format, &mut self.back.color) {
                Ok(()) => {
                    self.back.color.device_timestamp = view.device_timestamp;
                    self.back.color.cycle = cycle;
                    self.back.color_updated = true;
                }
                Err(e) => warn!(serial = %self.serial, error = %e, "Inline color decode failed"),
            },
        }
    }

    /// Step 5. Color in depth space needs BGRA, taken from the capture or
    /// from this cycle's inline decode.
    fn reproject(&mut self, depth: &ImageView<'_>, color: Option<&ImageView<'_>>, cycle: u64) {
        let Some(transformation) = self.transformation.as_mut() else {
            return;
        };

        if let Some((cw, ch)) = self.calibration.resolution(CameraKind::Color) {
            self.back.depth_in_color.allocate(cw, ch, 1);
            match transformation.depth_to_color(depth, (cw, ch), &mut self.back.depth_in_color.data) {
                Ok(()) => {
                    self.back.depth_in_color.device_timestamp = depth.device_timestamp;
                    self.back.depth_in_color.cycle = cycle;
                }
                Err(e) => warn!(serial = %self.serial, error = %e, "Depth to color failed"),
            }
        }

        let bgra = match color {
            Some(view) if view.format == ImageFormat::Bgra32 => Some(*view),
            _ if self.back.color_updated => Some(ImageView {
                width: self.back.color.width,
                height: self.back.color.height,
                format: ImageFormat::Bgra32,
                device_timestamp: self.back.color.device_timestamp,
                data: ImageData::Bytes(&self.back.color.data),
            }),
            _ => None,
        };
        let Some(bgra) = bgra else {
            trace!(serial = %self.serial, cycle, "No BGRA color this cycle, skipping color to depth");
            return;
        };

        self.back
            .color_in_depth
            .allocate(depth.width, depth.height, BGRA_CHANNELS);
        match transformation.color_to_depth(depth, &bgra, &mut self.back.color_in_depth.data) {
            Ok(()) => {
                self.back.color_in_depth.device_timestamp = bgra.device_timestamp;
                self.back.color_in_depth.cycle = cycle;
            }
            Err(e) => warn!(serial = %self.serial, error = %e, "Color to depth failed"),
        }
    }

    /// Step 10: hand the back frame over.
    pub fn publish(&mut self) {
        self.shared.handoff.publish(&mut self.back);
    }

    /// Release every resource in reverse order of creation and stop the
    /// cameras, handing the idle sensor back.
    pub fn close(mut self) -> S {
        self.tracker = None;
        self.transformation = None;
        self.depth_table = None;
        self.decode = None;
        self.sensor.stop();
        debug!(serial = %self.serial, cycles = self.cycle, "Session closed");
        self.sensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::synthetic::{Pattern, SyntheticSensor};
    use crate::settings::{ColorResolution, DepthMode};

    fn settings() -> DeviceSettings {
        DeviceSettings {
            color_resolution: ColorResolution::P720,
            ..Default::default()
        }
    }

    fn session(sensor: SyntheticSensor, settings: &DeviceSettings) -> SensorSession<SyntheticSensor> {
        let mut sensor = sensor;
        let prepared = prepare(&mut sensor, settings, &BodyTrackingSettings::default()).unwrap();
        let shared = Arc::new(SessionShared::new(sensor.serial_number()));
        SensorSession::new(sensor, prepared, &PipelineConfig::default(), None, shared)
    }

    fn take(session: &SensorSession<SyntheticSensor>) -> Frame {
        let mut front = Frame::default();
        assert!(session.shared.handoff.take(&mut front, None));
        front
    }

    #[test]
    fn master_without_cable_reverts() {
        let mut settings = settings();
        settings.wired_sync_mode = WiredSyncMode::Master;
        settings.subordinate_delay_usec = 100;
        let checked = validate_wired_sync(settings.clone(), "a", true, false);
        assert_eq!(checked.wired_sync_mode, WiredSyncMode::Standalone);
        assert_eq!(checked.subordinate_delay_usec, 0);

        let checked = validate_wired_sync(settings, "a", false, true);
        assert_eq!(checked.wired_sync_mode, WiredSyncMode::Master);
        assert_eq!(checked.subordinate_delay_usec, 0);
    }

    #[test]
    fn subordinate_keeps_delay_only_with_cable() {
        let mut settings = settings();
        settings.wired_sync_mode = WiredSyncMode::Subordinate;
        settings.subordinate_delay_usec = 100;
        assert_eq!(
            validate_wired_sync(settings.clone(), "a", true, false).subordinate_delay_usec,
            100
        );
        let reverted = validate_wired_sync(settings, "a", false, true);
        assert_eq!(reverted.wired_sync_mode, WiredSyncMode::Standalone);
        assert_eq!(reverted.subordinate_delay_usec, 0);
    }

    #[test]
    fn processes_every_enabled_plane() {
        let sensor = SyntheticSensor::new("a")
            .with_resolution((16, 16), (32, 16))
            .with_pattern(Pattern::FrameIndex);
        let mut session = session(sensor, &settings());

        let capture = session.acquire().unwrap();
        session.process(&capture);
        drop(capture);
        session.publish();
        let frame = take(&session);

        assert_eq!(frame.cycle, 1);
        assert_eq!(frame.depth.cycle, 1);
        assert_eq!(frame.ir.cycle, 1);
        assert_eq!(frame.color.cycle, 1);
        assert_eq!((frame.depth_in_color.width, frame.depth_in_color.height), (32, 16));
        assert_eq!(frame.color_in_depth.cycle, 1);
        assert_eq!(frame.point_cloud.cycle, 1);
        // frame index 0 fills every sample with 1, the wide FOV cuts the corners
        let n = frame.point_cloud.num_points();
        assert!(n > 0 && n < 256, "{n}");
        assert!(frame.point_cloud.positions().iter().all(|p| p.z == 1.0));
    }

    #[test]
    fn missing_plane_leaves_previous_content() {
        let sensor = SyntheticSensor::new("a").with_resolution((8, 8), (8, 8));
        let control = sensor.control();
        let mut session = session(sensor, &settings());

        let capture = session.acquire().unwrap();
        session.process(&capture);
        drop(capture);

        control.drop_planes(PlaneKind::Infrared, 1);
        let capture = session.acquire().unwrap();
        session.process(&capture);
        drop(capture);
        session.publish();

        let frame = take(&session);
        assert_eq!(frame.depth.cycle, 2);
        assert_eq!(frame.ir.cycle, 1);
        assert_eq!(session.shared.counters.missing_planes.load(Ordering::Relaxed), 1);
        assert_eq!(control.captures_released(), 2);
    }

    #[test]
    fn consumer_planes_only_move_forward() {
        let sensor = SyntheticSensor::new("a").with_resolution((8, 8), (8, 8));
        let control = sensor.control();
        let mut session = session(sensor, &settings());

        let mut front = Frame::default();
        let mut seen = Vec::new();
        for cycle in 1..=4 {
            if cycle == 4 {
                control.drop_planes(PlaneKind::Infrared, 1);
            }
            let capture = session.acquire().unwrap();
            session.process(&capture);
            drop(capture);
            session.publish();
            assert!(session.shared.handoff.take(&mut front, None));
            seen.push((front.cycle, front.ir.cycle));
        }
        assert_eq!(seen, vec![(1, 1), (2, 2), (3, 3), (4, 3)]);
        assert_eq!(front.depth.cycle, 4);
    }

    #[test]
    fn passive_ir_is_not_missing_depth() {
        let sensor = SyntheticSensor::new("a").with_resolution((8, 8), (8, 8));
        let mut settings = settings();
        settings.depth_mode = DepthMode::PassiveIr;
        let mut session = session(sensor, &settings);

        for _ in 0..3 {
            let capture = session.acquire().unwrap();
            session.process(&capture);
            drop(capture);
        }
        session.publish();

        let frame = take(&session);
        assert_eq!(frame.ir.cycle, 3);
        assert!(!frame.depth.is_allocated());
        assert_eq!(frame.point_cloud.num_points(), 0);
        assert_eq!(session.shared.counters.missing_planes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn inline_mjpeg_decode_is_fresh_color() {
        let sensor = SyntheticSensor::new("a").with_resolution((8, 8), (16, 8));
        let mut settings = settings();
        settings.color_format = ImageFormat::Mjpeg;
        let mut session = session(sensor, &settings);

        let capture = session.acquire().unwrap();
        session.process(&capture);
        drop(capture);
        session.publish();

        let frame = take(&session);
        assert_eq!((frame.color.width, frame.color.height, frame.color.channels), (16, 8, 4));
        assert_eq!(frame.color.cycle, 1);
        assert_eq!(frame.color_in_depth.cycle, 1);
    }

    #[test]
    fn failed_tracker_setup_stops_cameras() {
        let mut sensor = SyntheticSensor::new("a").with_resolution((8, 8), (8, 8));
        let body = BodyTrackingSettings {
            update_bodies: true,
            ..Default::default()
        };
        assert!(prepare(&mut sensor, &settings(), &body).is_err());
        // stopped again, so acquiring is refused
        assert!(sensor.next_capture(None).is_err());
    }

    #[test]
    fn recorded_mode_wins() {
        let mut settings = settings();
        let mut recorded = DeviceSettings {
            color_resolution: ColorResolution::P1080,
            depth_delay_usec: 80,
            ..Default::default()
        };
        recorded.update_ir = false;
        apply_recorded_mode(&mut settings, recorded);
        assert_eq!(settings.color_resolution, ColorResolution::P1080);
        assert_eq!(settings.depth_delay_usec, 80);
        assert!(settings.update_ir);
    }
}
