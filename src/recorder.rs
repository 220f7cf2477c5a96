//! Bounded in-memory recording collaborator

use std::sync::{Arc, Mutex, MutexGuard};

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use tracing::{debug, info};

use crate::sensor::{Calibration, Recorder, Recording};
use crate::settings::DeviceSettings;
use crate::{Error, Result};

struct Session<C> {
    ring: HeapRb<C>,
    serial: Option<String>,
    settings: Option<DeviceSettings>,
    active: bool,
    written: u64,
    overwritten: u64,
}

/// Keeps the newest `capacity` captures of a recording session.
///
/// Clones share the same buffer, so one handle can be given to a device
/// while another is kept to collect the result.
pub struct MemoryRecorder<C> {
    inner: Arc<Mutex<Session<C>>>,
}

impl<C> Clone for MemoryRecorder<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> MemoryRecorder<C> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Session {
                ring: HeapRb::new(capacity.max(1)),
                serial: None,
                settings: None,
                active: false,
                written: 0,
                overwritten: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session<C>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn len(&self) -> usize {
        self.lock().ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (written, overwritten)
    pub fn stats(&self) -> (u64, u64) {
        let session = self.lock();
        (session.written, session.overwritten)
    }

    /// Drain the buffered captures, oldest first.
    pub fn take_captures(&self) -> Vec<C> {
        self.lock().ring.pop_iter().collect()
    }

    /// Package the finished session for playback.
    pub fn finish<K: Calibration>(&self, calibration: K) -> Result<Recording<C, K>> {
        let mut session = self.lock();
        if session.active {
            return Err(Error::Recorder("recording still in progress".into()));
        }
        let (Some(serial), Some(settings)) = (session.serial.clone(), session.settings.clone())
        else {
            return Err(Error::Recorder("nothing was recorded".into()));
        };
        let captures = session.ring.pop_iter().collect();
        Ok(Recording {
            serial,
            settings,
            calibration,
            captures,
        })
    }
}

impl<C: Clone + Send> Recorder<C> for MemoryRecorder<C> {
    fn begin(&mut self, serial: &str, settings: &DeviceSettings) -> Result<()> {
        let mut session = self.lock();
        if session.active {
            return Err(Error::Recorder(format!("already recording {serial}")));
        }
        session.ring.clear();
        session.serial = Some(serial.to_string());
        session.settings = Some(settings.clone());
        session.active = true;
        session.written = 0;
        session.overwritten = 0;
        info!(serial, capacity = session.ring.capacity().get(), "Recording started");
        Ok(())
    }

    fn write(&mut self, capture: &C) -> Result<()> {
        let mut session = self.lock();
        if !session.active {
            return Err(Error::Recorder("write outside of a recording".into()));
        }
        if session.ring.push_overwrite(capture.clone()).is_some() {
            session.overwritten += 1;
        }
        session.written += 1;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        let mut session = self.lock();
        if !session.active {
            return Err(Error::Recorder("no recording in progress".into()));
        }
        session.active = false;
        debug!(
            written = session.written,
            overwritten = session.overwritten,
            "Recording ended"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::synthetic::{Intrinsics, PinholeCalibration};

    #[test]
    fn keeps_newest_captures() {
        let mut recorder = MemoryRecorder::<u32>::new(3);
        recorder.begin("a", &DeviceSettings::default()).unwrap();
        for i in 0..5 {
            recorder.write(&i).unwrap();
        }
        recorder.end().unwrap();

        assert_eq!(recorder.stats(), (5, 2));
        assert_eq!(recorder.take_captures(), vec![2, 3, 4]);
        assert!(recorder.is_empty());
    }

    #[test]
    fn lifecycle_is_enforced() {
        let mut recorder = MemoryRecorder::<u32>::new(2);
        assert!(recorder.write(&1).is_err());
        assert!(recorder.end().is_err());

        recorder.begin("a", &DeviceSettings::default()).unwrap();
        assert!(recorder.begin("a", &DeviceSettings::default()).is_err());
        let calibration = PinholeCalibration::new(
            Intrinsics::centered(4, 4, 2.0),
            Intrinsics::centered(4, 4, 2.0),
        );
        assert!(recorder.finish(calibration.clone()).is_err());

        recorder.write(&7).unwrap();
        recorder.end().unwrap();
        let recording = recorder.finish(calibration).unwrap();
        assert_eq!(recording.serial, "a");
        assert_eq!(recording.captures, vec![7]);
    }

    #[test]
    fn clones_share_the_buffer() {
        let recorder = MemoryRecorder::<u32>::new(4);
        let mut handle = recorder.clone();
        handle.begin("a", &DeviceSettings::default()).unwrap();
        handle.write(&1).unwrap();
        assert!(recorder.is_active());
        assert_eq!(recorder.len(), 1);
    }
}
