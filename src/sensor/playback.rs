//! Replays a recorded capture sequence through the regular pipeline

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{Calibration, Capture, Sensor};
use crate::settings::DeviceSettings;
use crate::{Error, Result};

/// Everything needed to play a session back
#[derive(Debug, Clone)]
pub struct Recording<C, K> {
    pub serial: String,
    pub settings: DeviceSettings,
    pub calibration: K,
    pub captures: Vec<C>,
}

impl<C, K> Recording<C, K> {
    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    /// Length at the recorded frame rate
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.settings.camera_fps.period_usec() as u64 * self.len() as u64)
    }
}

#[derive(Debug)]
struct PlaybackState {
    playing: bool,
    position: usize,
    looping: bool,
    paced: bool,
    len: usize,
}

/// Transport controls, usable from any thread while the sensor streams.
#[derive(Debug, Clone)]
pub struct PlaybackControl {
    state: Arc<Mutex<PlaybackState>>,
}

impl PlaybackControl {
    fn new(len: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlaybackState {
                playing: true,
                position: 0,
                looping: false,
                paced: false,
                len,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn play(&self) {
        self.lock().playing = true;
    }

    /// Hold the current capture; it keeps being delivered.
    pub fn pause(&self) {
        self.lock().playing = false;
    }

    /// Pause and rewind.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.playing = false;
        state.position = 0;
    }

    /// Jump to `fraction` of the recording, clamped to `[0, 1]`.
    pub fn seek(&self, fraction: f64) {
        let mut state = self.lock();
        if state.len == 0 {
            return;
        }
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        state.position = ((fraction * state.len as f64) as usize).min(state.len - 1);
    }

    pub fn set_looping(&self, looping: bool) {
        self.lock().looping = looping;
    }

    /// Deliver captures at the recorded frame rate instead of as fast as
    /// they are asked for.
    pub fn set_paced(&self, paced: bool) {
        self.lock().paced = paced;
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    /// Index of the next capture to be delivered
    pub fn position(&self) -> usize {
        self.lock().position
    }

    /// Playback position as a fraction of the recording
    pub fn progress(&self) -> f64 {
        let state = self.lock();
        if state.len == 0 {
            return 0.0;
        }
        state.position as f64 / state.len as f64
    }

    pub fn is_finished(&self) -> bool {
        let state = self.lock();
        !state.looping && state.position >= state.len
    }
}

/// A [`Sensor`] backed by a [`Recording`]
pub struct PlaybackSensor<C, K> {
    recording: Arc<Recording<C, K>>,
    control: PlaybackControl,
    started: bool,
    last_delivery: Option<Instant>,
}

impl<C, K> PlaybackSensor<C, K> {
    pub fn new(recording: impl Into<Arc<Recording<C, K>>>) -> Self {
        let recording = recording.into();
        let control = PlaybackControl::new(recording.len());
        Self {
            recording,
            control,
            started: false,
            last_delivery: None,
        }
    }

    pub fn control(&self) -> PlaybackControl {
        self.control.clone()
    }

    pub fn recording(&self) -> &Recording<C, K> {
        &self.recording
    }

    fn period(&self) -> Duration {
        Duration::from_micros(self.recording.settings.camera_fps.period_usec() as u64)
    }

    /// Sleep until the next capture is due, at most `timeout`. Returns false
    /// when the timeout ran out first.
    fn pace(&mut self, timeout: Option<Duration>) -> bool {
        if let Some(last) = self.last_delivery {
            let due = last + self.period();
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
        self.last_delivery = Some(Instant::now());
        true
    }
}

impl<C, K> Sensor for PlaybackSensor<C, K>
where
    C: Capture + Clone + Sync + 'static,
    K: Calibration + Clone + 'static,
{
    type Capture = C;
    type Calibration = K;

    fn serial_number(&self) -> &str {
        &self.recording.serial
    }

    fn start(&mut self, settings: &DeviceSettings) -> Result<K> {
        if self.recording.is_empty() {
            return Err(Error::ModeStart("recording holds no captures".into()));
        }
        if settings.depth_mode != self.recording.settings.depth_mode
            || settings.color_resolution != self.recording.settings.color_resolution
        {
            warn!(
                serial = %self.recording.serial,
                "Requested mode differs from the recording, using the recorded one"
            );
        }
        self.started = true;
        self.last_delivery = None;
        info!(
            serial = %self.recording.serial,
            captures = self.recording.len(),
            duration_ms = self.recording.duration().as_millis() as u64,
            "Playback started"
        );
        Ok(self.recording.calibration.clone())
    }

    fn stop(&mut self) {
        if std::mem::take(&mut self.started) {
            debug!(serial = %self.recording.serial, "Playback stopped");
        }
    }

    fn next_capture(&mut self, timeout: Option<Duration>) -> Result<Option<C>> {
        if !self.started {
            return Err(Error::Capture("playback is not started".into()));
        }

        let (playing, paced, index) = {
            let mut state = self.control.lock();
            if state.position >= state.len && state.looping {
                state.position = 0;
            }
            let index = (state.position < state.len).then_some(state.position);
            (state.playing, state.paced, index)
        };

        let Some(index) = index else {
            // end of a non-looping recording looks like a quiet sensor
            thread::sleep(timeout.unwrap_or(self.period()).min(self.period()));
            return Ok(None);
        };

        // a paused stream re-delivers the held capture at the frame rate
        if (paced || !playing) && !self.pace(timeout) {
            return Ok(None);
        }

        if playing {
            let mut state = self.control.lock();
            if state.position == index {
                state.position += 1;
            }
        }
        Ok(self.recording.captures.get(index).cloned())
    }

    fn recorded_settings(&self) -> Option<DeviceSettings> {
        Some(self.recording.settings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::synthetic::{PinholeCalibration, SyntheticCapture, SyntheticSensor};
    use crate::sensor::PlaneKind;
    use crate::settings::ColorResolution;

    fn recording(frames: usize) -> Recording<SyntheticCapture, PinholeCalibration> {
        let mut sensor = SyntheticSensor::new("rec").with_resolution((4, 4), (8, 4));
        let settings = DeviceSettings {
            color_resolution: ColorResolution::P720,
            ..Default::default()
        };
        let calibration = sensor.start(&settings).unwrap();
        let captures = (0..frames)
            .map(|_| sensor.next_capture(None).unwrap().unwrap())
            .collect();
        Recording {
            serial: "rec".into(),
            settings,
            calibration,
            captures,
        }
    }

    fn index(capture: Option<SyntheticCapture>) -> u64 {
        capture.unwrap().index()
    }

    #[test]
    fn plays_in_order_then_goes_quiet() {
        let mut sensor = PlaybackSensor::new(recording(3));
        sensor.start(&DeviceSettings::default()).unwrap();
        let control = sensor.control();

        for expected in 0..3 {
            assert_eq!(index(sensor.next_capture(None).unwrap()), expected);
        }
        assert!(control.is_finished());
        assert!(sensor.next_capture(Some(Duration::from_millis(1))).unwrap().is_none());
    }

    #[test]
    fn looping_wraps_around() {
        let mut sensor = PlaybackSensor::new(recording(2));
        sensor.start(&DeviceSettings::default()).unwrap();
        sensor.control().set_looping(true);

        let seen: Vec<u64> = (0..5)
            .map(|_| index(sensor.next_capture(None).unwrap()))
            .collect();
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn seek_pause_and_stop() {
        let mut sensor = PlaybackSensor::new(recording(10));
        sensor.start(&DeviceSettings::default()).unwrap();
        let control = sensor.control();

        control.seek(0.5);
        assert_eq!(index(sensor.next_capture(None).unwrap()), 5);

        control.pause();
        let held = sensor.next_capture(None).unwrap();
        let again = sensor.next_capture(None).unwrap();
        assert_eq!((index(held), index(again)), (6, 6));

        control.stop();
        control.play();
        assert_eq!(index(sensor.next_capture(None).unwrap()), 0);

        control.seek(7.0);
        assert_eq!(control.position(), 9);
    }

    #[test]
    fn replays_recorded_planes_and_mode() {
        let recording = recording(1);
        let recorded_ts = recording.captures[0]
            .plane(PlaneKind::Depth)
            .unwrap()
            .device_timestamp;
        let mut sensor = PlaybackSensor::new(recording);
        assert_eq!(
            sensor.recorded_settings().unwrap().color_resolution,
            ColorResolution::P720
        );
        assert!(sensor.next_capture(None).is_err());

        sensor.start(&DeviceSettings::default()).unwrap();
        let capture = sensor.next_capture(None).unwrap().unwrap();
        assert_eq!(capture.plane(PlaneKind::Depth).unwrap().device_timestamp, recorded_ts);
    }
}
