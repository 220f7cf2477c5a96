//! Per-sensor frame pipeline: `Closed -> Open -> Streaming -> Open -> Closed`

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use super::session::{lock_slot, prepare, SensorSession, SessionShared, SessionSlot};
use super::PipelineStats;
use crate::capture::decode_worker::{DecodeWorker, DecodedColorReceiver};
use crate::capture::frame::{BodyFrame, ColorPlane, DepthPlane, Frame, IrPlane, PointCloud};
use crate::projection::ProjectionTable;
use crate::sensor::{Recorder, Sensor, SensorProvider};
use crate::settings::{BodyTrackingSettings, DeviceSettings, WiredSyncMode};
use crate::{utils, Error, PipelineConfig, Result, CONFIG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Closed,
    Open,
    Streaming,
}

/// One sensor plus its processing pipeline.
///
/// The owning thread is the consumer: it calls [`update`](Self::update) once
/// per tick and reads the front frame in between.
pub struct Device<S: Sensor> {
    index: Option<usize>,
    serial: String,
    state: DeviceState,
    sensor: Option<S>,

    settings: DeviceSettings,
    body_tracking: BodyTrackingSettings,
    pipeline: PipelineConfig,
    /// Effective settings of the running session
    active_settings: Option<DeviceSettings>,
    sync_driven: bool,

    slot: SessionSlot<S>,
    shared: Option<Arc<SessionShared<S::Capture>>>,
    calibration: Option<Arc<S::Calibration>>,
    depth_table: Option<Arc<ProjectionTable>>,
    color_table: Option<Arc<ProjectionTable>>,
    decode: Option<DecodeWorker>,
    decoded: Option<DecodedColorReceiver>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,

    front: Frame,
    frame_new: Cell<bool>,
}

impl<S: Sensor> Device<S> {
    /// Open the sensor at `index`, taking settings from the global config.
    #[instrument(skip(provider))]
    pub fn open<P>(provider: &mut P, index: usize) -> Result<Self>
    where
        P: SensorProvider<Sensor = S>,
    {
        let sensor = provider.open(index)?;
        Ok(Self::from_sensor(sensor, Some(index)))
    }

    #[instrument(skip(provider))]
    pub fn open_by_serial<P>(provider: &mut P, serial: &str) -> Result<Self>
    where
        P: SensorProvider<Sensor = S>,
    {
        let (index, sensor) = provider.open_by_serial(serial)?;
        Ok(Self::from_sensor(sensor, Some(index)))
    }

    /// Wrap an already opened sensor, e.g. a playback.
    pub fn attach(sensor: S) -> Self {
        Self::from_sensor(sensor, None)
    }

    fn from_sensor(sensor: S, index: Option<usize>) -> Self {
        let config = CONFIG.load();
        let serial = sensor.serial_number().to_string();
        info!(serial = %serial, ?index, "Device opened");
        Self {
            index,
            serial,
            state: DeviceState::Open,
            sensor: Some(sensor),
            settings: config.device.clone(),
            body_tracking: config.body_tracking.clone(),
            pipeline: config.pipeline.clone(),
            active_settings: None,
            sync_driven: false,
            slot: Arc::new(Mutex::new(None)),
            shared: None,
            calibration: None,
            depth_table: None,
            color_table: None,
            decode: None,
            decoded: None,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            front: Frame::default(),
            frame_new: Cell::new(false),
        }
    }

    pub fn with_settings(mut self, settings: DeviceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_body_tracking(mut self, settings: BodyTrackingSettings) -> Self {
        self.body_tracking = settings;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Replace the requested settings; only allowed while not streaming.
    pub fn set_settings(&mut self, settings: DeviceSettings) -> Result<()> {
        if self.state == DeviceState::Streaming {
            return Err(Error::AlreadyStreaming(self.serial.clone()));
        }
        self.settings = settings;
        Ok(())
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Settings in effect for the running session, after sync validation
    pub fn active_settings(&self) -> Option<&DeviceSettings> {
        self.active_settings.as_ref()
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != DeviceState::Closed
    }

    pub fn is_streaming(&self) -> bool {
        self.state == DeviceState::Streaming
    }

    pub fn serial_number(&self) -> &str {
        &self.serial
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn wired_sync_mode(&self) -> WiredSyncMode {
        self.active_settings
            .as_ref()
            .unwrap_or(&self.settings)
            .wired_sync_mode
    }

    /// Configure the cameras, build the session resources and start
    /// capturing. On failure the device stays `Open` with nothing allocated.
    #[instrument(skip(self), fields(serial = %self.serial))]
    pub fn start_streaming(&mut self) -> Result<()> {
        match self.state {
            DeviceState::Closed => return Err(Error::NotOpen),
            DeviceState::Streaming => return Err(Error::AlreadyStreaming(self.serial.clone())),
            DeviceState::Open => {}
        }
        let mut sensor = self.sensor.take().ok_or(Error::NotOpen)?;

        let prepared = match prepare(&mut sensor, &self.settings, &self.body_tracking) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.sensor = Some(sensor);
                return Err(e);
            }
        };

        let decode = if prepared.settings.update_color && prepared.settings.color_format.is_compressed() {
            match DecodeWorker::spawn(self.pipeline.decode_poll_interval(), self.pipeline.decoded_backlog) {
                Ok(worker) => Some(worker),
                Err(e) => {
                    error!(error = %e, "Failed to start color decode worker");
                    sensor.stop();
                    self.sensor = Some(sensor);
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let shared = Arc::new(SessionShared::new(&self.serial));
        self.calibration = Some(prepared.calibration.clone());
        self.depth_table = prepared.depth_table.clone();
        self.color_table = prepared.color_table.clone();
        self.active_settings = Some(prepared.settings.clone());

        let session = SensorSession::new(
            sensor,
            prepared,
            &self.pipeline,
            decode.as_ref().map(DecodeWorker::submitter),
            shared.clone(),
        );
        *lock_slot(&self.slot) = Some(session);
        self.decoded = decode.as_ref().map(DecodeWorker::receiver);
        self.decode = decode;
        self.shared = Some(shared.clone());
        self.running.store(true, Ordering::Release);
        self.state = DeviceState::Streaming;

        if self.sync_driven {
            debug!("Capture driven by the sync coordinator");
        } else if let Err(e) = self.spawn_capture_thread(shared) {
            error!(error = %e, "Failed to start capture thread");
            self.teardown();
            return Err(e.into());
        }

        info!("Streaming started");
        Ok(())
    }

    fn spawn_capture_thread(&mut self, shared: Arc<SessionShared<S::Capture>>) -> std::io::Result<()> {
        let slot = self.slot.clone();
        let running = self.running.clone();
        let pause = self.pipeline.loop_pause();
        let core = self.pipeline.capture_core;

        let handle = thread::Builder::new()
            .name(format!("capture-{}", self.serial))
            .spawn(move || {
                if let Some(core) = core {
                    utils::pin_current_thread(core);
                }
                capture_loop(&slot, &shared, &running, pause);
            })?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Stop capturing and release the session. All frame slots are cleared.
    #[instrument(skip(self), fields(serial = %self.serial))]
    pub fn stop_streaming(&mut self) -> Result<()> {
        if self.state != DeviceState::Streaming {
            return Err(Error::NotStreaming);
        }
        self.teardown();
        info!("Streaming stopped");
        Ok(())
    }

    /// Join threads first, then free what they used.
    fn teardown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(shared) = self.shared.as_ref() {
            shared.handoff.wake_all();
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!(serial = %self.serial, "Capture thread panicked");
            }
        }

        if let Some(shared) = self.shared.take() {
            if let Err(e) = shared.recording.end() {
                warn!(serial = %self.serial, error = %e, "Failed to finalize recording");
            }
        }
        if let Some(mut worker) = self.decode.take() {
            worker.stop();
        }
        self.decoded = None;

        if let Some(session) = lock_slot(&self.slot).take() {
            self.sensor = Some(session.close());
        }
        self.calibration = None;
        self.depth_table = None;
        self.color_table = None;
        self.active_settings = None;
        self.front.reset();
        self.frame_new.set(false);
        self.state = DeviceState::Open;
    }

    /// Stop streaming if needed and let go of the sensor.
    pub fn close(&mut self) {
        if self.state == DeviceState::Streaming {
            self.teardown();
        }
        if self.sensor.take().is_some() {
            info!(serial = %self.serial, "Device closed");
        }
        self.state = DeviceState::Closed;
    }

    /// Consumer tick. Swaps in the newest frame if one is waiting, folding
    /// in off-thread decoded color, and wakes the capture thread.
    pub fn update(&mut self) -> bool {
        let Some(shared) = self.shared.as_ref() else {
            return false;
        };
        if !shared.handoff.has_new_buffer() {
            return false;
        }
        let decoded = self
            .decoded
            .as_ref()
            .and_then(DecodedColorReceiver::drain_latest)
            .map(|decoded| decoded.plane);
        let swapped = shared.handoff.take(&mut self.front, decoded);
        if swapped {
            self.frame_new.set(true);
        }
        swapped
    }

    /// True once after each handoff.
    pub fn is_frame_new(&self) -> bool {
        self.frame_new.replace(false)
    }

    pub fn frame(&self) -> &Frame {
        &self.front
    }

    pub fn depth_plane(&self) -> &DepthPlane {
        &self.front.depth
    }

    pub fn color_plane(&self) -> &ColorPlane {
        &self.front.color
    }

    pub fn ir_plane(&self) -> &IrPlane {
        &self.front.ir
    }

    pub fn depth_in_color(&self) -> &DepthPlane {
        &self.front.depth_in_color
    }

    pub fn color_in_depth(&self) -> &ColorPlane {
        &self.front.color_in_depth
    }

    pub fn point_cloud(&self) -> &PointCloud {
        &self.front.point_cloud
    }

    pub fn bodies(&self) -> &BodyFrame {
        &self.front.bodies
    }

    pub fn depth_device_time(&self) -> Duration {
        self.front.depth_device_time()
    }

    pub fn color_device_time(&self) -> Duration {
        self.front.color_device_time()
    }

    pub fn calibration(&self) -> Option<&S::Calibration> {
        self.calibration.as_deref()
    }

    pub fn depth_to_world_table(&self) -> Option<&ProjectionTable> {
        self.depth_table.as_deref()
    }

    pub fn color_to_world_table(&self) -> Option<&ProjectionTable> {
        self.color_table.as_deref()
    }

    /// Forward every produced capture to `recorder` until
    /// [`stop_recording`](Self::stop_recording). While recording the capture
    /// thread no longer waits for the consumer.
    pub fn start_recording(&mut self, recorder: Box<dyn Recorder<S::Capture>>) -> Result<()> {
        let (Some(shared), Some(settings)) = (self.shared.as_ref(), self.active_settings.as_ref())
        else {
            return Err(Error::NotStreaming);
        };
        shared.recording.begin(recorder, &self.serial, settings)?;
        info!(serial = %self.serial, "Recording started");
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<()> {
        let shared = self.shared.as_ref().ok_or(Error::NotStreaming)?;
        if !shared.recording.end()? {
            return Err(Error::Recorder("not recording".into()));
        }
        // release a producer that may have raced ahead while not waiting
        shared.handoff.wake_all();
        info!(serial = %self.serial, "Recording stopped");
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|shared| shared.recording.is_active())
    }

    pub fn stats(&self) -> PipelineStats {
        let Some(shared) = self.shared.as_ref() else {
            return PipelineStats::default();
        };
        let (frames_produced, frames_consumed, frames_overwritten) = shared.handoff.stats();
        let (decoded_colors, _, decoded_colors_dropped) =
            self.decode.as_ref().map_or((0, 0, 0), DecodeWorker::stats);
        let counters = &shared.counters;
        PipelineStats {
            frames_produced,
            frames_consumed,
            frames_overwritten,
            capture_timeouts: counters.capture_timeouts.load(Ordering::Relaxed),
            capture_errors: counters.capture_errors.load(Ordering::Relaxed),
            missing_planes: counters.missing_planes.load(Ordering::Relaxed),
            decode_tasks_skipped: counters.decode_tasks_skipped.load(Ordering::Relaxed),
            decoded_colors,
            decoded_colors_dropped,
            compaction_errors: counters.compaction_errors.load(Ordering::Relaxed),
        }
    }

    /// Let a coordinator drive capture instead of a per-device thread.
    pub(crate) fn set_sync_driven(&mut self, driven: bool) -> Result<()> {
        if self.state == DeviceState::Streaming {
            return Err(Error::AlreadyStreaming(self.serial.clone()));
        }
        self.sync_driven = driven;
        Ok(())
    }

    pub(crate) fn session_slot(&self) -> SessionSlot<S> {
        self.slot.clone()
    }
}

impl<S: Sensor> Drop for Device<S> {
    fn drop(&mut self) {
        self.close();
    }
}

fn capture_loop<S: Sensor>(
    slot: &SessionSlot<S>,
    shared: &SessionShared<S::Capture>,
    running: &AtomicBool,
    pause: Duration,
) {
    debug!("Capture thread running");
    while running.load(Ordering::Acquire) {
        shared.wait_for_consumer(running);
        if !running.load(Ordering::Acquire) {
            break;
        }

        {
            let mut guard = lock_slot(slot);
            let Some(session) = guard.as_mut() else {
                break;
            };
            if let Some(capture) = session.acquire() {
                session.process(&capture);
                drop(capture);
                session.publish();
            }
        }

        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }
    debug!("Capture thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::synthetic::{SyntheticRig, SyntheticSensor};
    use crate::settings::ColorResolution;
    use std::time::Instant;

    fn settings() -> DeviceSettings {
        DeviceSettings {
            color_resolution: ColorResolution::P720,
            ..Default::default()
        }
    }

    fn device() -> Device<SyntheticSensor> {
        Device::attach(SyntheticSensor::new("dev").with_resolution((8, 8), (8, 8)))
            .with_settings(settings())
            .with_pipeline(PipelineConfig::default())
    }

    fn update_until<S: Sensor>(device: &mut Device<S>, mut done: impl FnMut(&Device<S>) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
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
    fn lifecycle_transitions() {
        let mut device = device();
        assert_eq!(device.state(), DeviceState::Open);
        assert!(matches!(device.stop_streaming(), Err(Error::NotStreaming)));

        device.start_streaming().unwrap();
        assert!(device.is_streaming());
        assert!(matches!(device.start_streaming(), Err(Error::AlreadyStreaming(_))));
        assert!(device.set_settings(settings()).is_err());

        device.stop_streaming().unwrap();
        assert_eq!(device.state(), DeviceState::Open);
        device.start_streaming().unwrap();

        device.close();
        assert_eq!(device.state(), DeviceState::Closed);
        assert!(matches!(device.start_streaming(), Err(Error::NotOpen)));
    }

    #[test]
    fn frame_new_is_reported_once() {
        let mut device = device();
        device.start_streaming().unwrap();

        assert!(!device.is_frame_new());
        assert!(update_until(&mut device, |d| d.is_frame_new()));
        assert!(!device.is_frame_new());
        assert!(device.frame().cycle > 0);
        device.stop_streaming().unwrap();
    }

    #[test]
    fn consumer_sees_increasing_cycles() {
        let mut device = device();
        device.start_streaming().unwrap();

        let mut cycles = Vec::new();
        assert!(update_until(&mut device, |d| {
            if d.is_frame_new() {
                cycles.push(d.frame().cycle);
            }
            cycles.len() >= 5
        }));
        assert!(cycles.windows(2).all(|w| w[0] < w[1]), "{cycles:?}");

        let stats = device.stats();
        assert!(stats.frames_consumed >= 5);
        assert!(stats.frames_produced >= stats.frames_consumed);
        device.stop_streaming().unwrap();
    }

    #[test]
    fn stopping_clears_the_front_frame() {
        let mut device = device();
        device.start_streaming().unwrap();
        assert!(update_until(&mut device, |d| d.frame().cycle > 0));

        device.stop_streaming().unwrap();
        assert_eq!(device.frame().cycle, 0);
        assert!(!device.depth_plane().is_allocated());
        assert_eq!(device.point_cloud().num_points(), 0);

        device.start_streaming().unwrap();
        assert!(update_until(&mut device, |d| d.is_frame_new()));
        device.stop_streaming().unwrap();
    }

    #[test]
    fn failed_mode_start_keeps_device_open() {
        let sensor = SyntheticSensor::new("dev").with_resolution((8, 8), (8, 8));
        let control = sensor.control();
        let mut device = Device::attach(sensor).with_settings(settings());

        control.fail_next_start();
        assert!(matches!(device.start_streaming(), Err(Error::ModeStart(_))));
        assert_eq!(device.state(), DeviceState::Open);
        assert!(device.calibration().is_none());

        device.start_streaming().unwrap();
        assert!(device.depth_to_world_table().is_some());
        assert!(device.color_to_world_table().is_some());
        device.stop_streaming().unwrap();
        assert!(device.depth_to_world_table().is_none());
    }

    #[test]
    fn master_without_cable_streams_standalone() {
        let mut settings = settings();
        settings.wired_sync_mode = WiredSyncMode::Master;
        let mut device = Device::attach(SyntheticSensor::new("m").with_resolution((8, 8), (8, 8)))
            .with_settings(settings);
        device.start_streaming().unwrap();
        assert_eq!(device.wired_sync_mode(), WiredSyncMode::Standalone);
        device.stop_streaming().unwrap();
        assert_eq!(device.wired_sync_mode(), WiredSyncMode::Master);
    }

    #[test]
    fn opens_through_provider() {
        let mut rig = SyntheticRig::new()
            .with_sensor(SyntheticSensor::new("a"))
            .with_sensor(SyntheticSensor::new("b"));
        let device = Device::open_by_serial(&mut rig, "b").unwrap();
        assert_eq!(device.index(), Some(1));
        assert_eq!(device.serial_number(), "b");
        assert!(matches!(Device::open(&mut rig, 1), Err(Error::AlreadyOpen(_))));
        drop(device);
        assert!(Device::open(&mut rig, 1).is_ok());
    }

    #[test]
    fn recording_requires_streaming() {
        let mut device = device();
        let recorder = crate::recorder::MemoryRecorder::new(4);
        assert!(matches!(
            device.start_recording(Box::new(recorder)),
            Err(Error::NotStreaming)
        ));
        assert!(!device.is_recording());
    }
}
