//! Wired multi-sensor synchronization.
//!
//! One coordinator thread captures from the master and every subordinate,
//! re-capturing from whichever side is behind until all reference
//! timestamps agree, then processes and hands over every device's frame in
//! the same round.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::pipeline::session::{lock_slot, SensorSession, SessionSlot};
use crate::pipeline::Device;
use crate::sensor::{Capture, PlaneKind, Sensor};
use crate::settings::WiredSyncMode;
use crate::{Error, Result, SyncConfig, CONFIG};

/// Reference timestamp of one subordinate together with its configured delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubordinateSample {
    pub timestamp: Option<Duration>,
    pub subordinate_delay_usec: u32,
    pub depth_delay_usec: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncVerdict {
    Synchronized,
    /// A subordinate is ahead, or the master image is missing
    RecaptureMaster,
    /// This subordinate is lagging or its image is missing
    RecaptureSubordinate(usize),
}

/// Decide the next step of a reconciliation round.
///
/// A subordinate is expected at `master + subordinate_delay + depth_delay`
/// and accepted when within `tolerance_usec` of that. Subordinates are
/// checked in order and the first one out of tolerance decides.
pub fn reconcile(
    master: Option<Duration>,
    subordinates: &[SubordinateSample],
    tolerance_usec: i64,
) -> SyncVerdict {
    let Some(master) = master else {
        return SyncVerdict::RecaptureMaster;
    };
    let master_usec = master.as_micros() as i64;

    for (i, sub) in subordinates.iter().enumerate() {
        let Some(timestamp) = sub.timestamp else {
            return SyncVerdict::RecaptureSubordinate(i);
        };
        let expected = master_usec
            + i64::from(sub.subordinate_delay_usec)
            + i64::from(sub.depth_delay_usec);
        let error = timestamp.as_micros() as i64 - expected;
        if error < -tolerance_usec {
            return SyncVerdict::RecaptureSubordinate(i);
        }
        if error > tolerance_usec {
            return SyncVerdict::RecaptureMaster;
        }
    }
    SyncVerdict::Synchronized
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub rounds: u64,
    pub master_recaptures: u64,
    pub subordinate_recaptures: u64,
    pub timeouts: u64,
    pub aborted: u64,
}

#[derive(Default)]
struct Counters {
    rounds: AtomicU64,
    master_recaptures: AtomicU64,
    subordinate_recaptures: AtomicU64,
    timeouts: AtomicU64,
    aborted: AtomicU64,
}

struct Member<S: Sensor> {
    serial: String,
    slot: SessionSlot<S>,
}

impl<S: Sensor> Clone for Member<S> {
    fn clone(&self) -> Self {
        Self {
            serial: self.serial.clone(),
            slot: self.slot.clone(),
        }
    }
}

/// Drives capture for a master and its subordinates.
///
/// Register devices while they are open, then start their streams (no
/// per-device capture thread is spawned for registered devices), then
/// [`start`](Self::start) the coordinator. Stop the coordinator before
/// stopping the devices.
pub struct SyncCoordinator<S: Sensor> {
    master: Option<Member<S>>,
    subordinates: Vec<Member<S>>,
    config: SyncConfig,
    running: Arc<AtomicBool>,
    counters: Arc<CachePadded<Counters>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: Sensor> Default for SyncCoordinator<S> {
    fn default() -> Self {
        Self::new(CONFIG.load().sync.clone())
    }
}

impl<S: Sensor> SyncCoordinator<S> {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            master: None,
            subordinates: Vec::new(),
            config,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(CachePadded::new(Counters::default())),
            thread: None,
        }
    }

    fn register(&self, device: &mut Device<S>, role: WiredSyncMode) -> Result<Member<S>> {
        if self.thread.is_some() {
            return Err(Error::Sync("coordinator is running".into()));
        }
        if device.settings().wired_sync_mode != role {
            return Err(Error::Sync(format!(
                "{} is configured as {:?}, not {role:?}",
                device.serial_number(),
                device.settings().wired_sync_mode
            )));
        }
        device.set_sync_driven(true)?;
        Ok(Member {
            serial: device.serial_number().to_string(),
            slot: device.session_slot(),
        })
    }

    pub fn set_master(&mut self, device: &mut Device<S>) -> Result<()> {
        let member = self.register(device, WiredSyncMode::Master)?;
        info!(serial = %member.serial, "Sync master registered");
        self.master = Some(member);
        Ok(())
    }

    pub fn add_subordinate(&mut self, device: &mut Device<S>) -> Result<()> {
        let member = self.register(device, WiredSyncMode::Subordinate)?;
        info!(serial = %member.serial, index = self.subordinates.len(), "Sync subordinate registered");
        self.subordinates.push(member);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Start the coordinator thread. Every registered device must be
    /// streaming in its wired role.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Err(Error::Sync("coordinator already running".into()));
        }
        let master = self
            .master
            .clone()
            .ok_or_else(|| Error::Sync("no master registered".into()))?;
        if self.subordinates.is_empty() {
            return Err(Error::Sync("no subordinates registered".into()));
        }

        check_streaming(&master, WiredSyncMode::Master)?;
        for sub in &self.subordinates {
            check_streaming(sub, WiredSyncMode::Subordinate)?;
        }

        let mut members = vec![master];
        members.extend(self.subordinates.iter().cloned());
        let worker = RoundRunner {
            members,
            tolerance_usec: i64::from(self.config.max_time_offset_usec),
            reconcile_timeout: self.config.reconcile_timeout(),
            compare_subordinate_depth: self.config.compare_subordinate_depth,
            running: self.running.clone(),
            counters: self.counters.clone(),
        };

        self.running.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name("sync-coordinator".into())
            .spawn(move || worker.run());
        match handle {
            Ok(handle) => {
                self.thread = Some(handle);
                info!(subordinates = self.subordinates.len(), "Sync coordinator started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Sync coordinator thread panicked");
            }
            info!("Sync coordinator stopped");
        }
    }

    pub fn stats(&self) -> SyncStats {
        let c = &self.counters;
        SyncStats {
            rounds: c.rounds.load(Ordering::Relaxed),
            master_recaptures: c.master_recaptures.load(Ordering::Relaxed),
            subordinate_recaptures: c.subordinate_recaptures.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            aborted: c.aborted.load(Ordering::Relaxed),
        }
    }
}

impl<S: Sensor> Drop for SyncCoordinator<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn check_streaming<S: Sensor>(member: &Member<S>, role: WiredSyncMode) -> Result<()> {
    match lock_slot(&member.slot).as_ref() {
        Some(session) if session.settings().wired_sync_mode == role => Ok(()),
        Some(session) => Err(Error::Sync(format!(
            "{} streams as {:?}, expected {role:?}",
            member.serial,
            session.settings().wired_sync_mode
        ))),
        None => Err(Error::Sync(format!("{} is not streaming", member.serial))),
    }
}

enum RoundOutcome {
    Synchronized,
    Aborted,
    /// A registered device has no running session
    NotStreaming,
}

/// Pause between rounds while a registered device is not streaming
const IDLE_BACKOFF: Duration = Duration::from_millis(50);

struct RoundRunner<S: Sensor> {
    /// Master first, then subordinates in registration order
    members: Vec<Member<S>>,
    tolerance_usec: i64,
    reconcile_timeout: Duration,
    compare_subordinate_depth: bool,
    running: Arc<AtomicBool>,
    counters: Arc<CachePadded<Counters>>,
}

impl<S: Sensor> RoundRunner<S> {
    fn run(self) {
        debug!("Sync coordinator thread running");
        let mut idle = false;
        while self.running.load(Ordering::Acquire) {
            match self.round() {
                RoundOutcome::Synchronized => {
                    if std::mem::take(&mut idle) {
                        info!("All synchronized devices streaming again");
                    }
                    self.counters.rounds.fetch_add(1, Ordering::Relaxed);
                }
                RoundOutcome::Aborted => {
                    self.counters.aborted.fetch_add(1, Ordering::Relaxed);
                    thread::sleep(Duration::from_millis(1));
                }
                RoundOutcome::NotStreaming => {
                    if !idle {
                        warn!("A synchronized device stopped streaming, pausing rounds");
                        idle = true;
                    }
                    self.counters.aborted.fetch_add(1, Ordering::Relaxed);
                    thread::sleep(IDLE_BACKOFF);
                }
            }
            thread::sleep(Duration::from_micros(100));
        }
        debug!("Sync coordinator thread exiting");
    }

    fn round(&self) -> RoundOutcome {
        // fixed order: master first, then subordinates
        let mut guards: Vec<MutexGuard<'_, Option<SensorSession<S>>>> =
            self.members.iter().map(|m| lock_slot(&m.slot)).collect();
        let Some(mut sessions) = guards
            .iter_mut()
            .map(|guard| guard.as_mut())
            .collect::<Option<Vec<&mut SensorSession<S>>>>()
        else {
            return RoundOutcome::NotStreaming;
        };

        let mut captures = Vec::with_capacity(sessions.len());
        for session in sessions.iter_mut() {
            match session.acquire_blocking(&self.running) {
                Some(capture) => captures.push(capture),
                None => return RoundOutcome::Aborted,
            }
        }

        let started = Instant::now();
        loop {
            if started.elapsed() > self.reconcile_timeout {
                error!(
                    timeout_ms = self.reconcile_timeout.as_millis() as u64,
                    "Timed out waiting for synchronized captures"
                );
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("depthstream_sync_timeouts").increment(1);
                return RoundOutcome::Aborted;
            }
            if !self.running.load(Ordering::Acquire) {
                return RoundOutcome::Aborted;
            }

            let master = captures[0].plane(PlaneKind::Color).map(|v| v.device_timestamp);
            let samples: Vec<SubordinateSample> = sessions[1..]
                .iter()
                .zip(&captures[1..])
                .map(|(session, capture)| self.sample(session, capture))
                .collect();

            let target = match reconcile(master, &samples, self.tolerance_usec) {
                SyncVerdict::Synchronized => break,
                SyncVerdict::RecaptureMaster => {
                    if master.is_none() {
                        warn!(serial = %self.members[0].serial, "Master image was bad");
                    } else {
                        trace!("Subordinate ahead, recapturing master");
                    }
                    self.counters.master_recaptures.fetch_add(1, Ordering::Relaxed);
                    0
                }
                SyncVerdict::RecaptureSubordinate(i) => {
                    if samples[i].timestamp.is_none() {
                        warn!(serial = %self.members[i + 1].serial, "Subordinate image was bad");
                    } else {
                        trace!(serial = %self.members[i + 1].serial, "Subordinate lagging, recapturing");
                    }
                    self.counters.subordinate_recaptures.fetch_add(1, Ordering::Relaxed);
                    i + 1
                }
            };
            metrics::counter!("depthstream_sync_recaptures").increment(1);

            match sessions[target].acquire_blocking(&self.running) {
                // replacing the old capture drops it, releasing the handle
                Some(capture) => captures[target] = capture,
                None => return RoundOutcome::Aborted,
            }
        }

        trace!(devices = sessions.len(), "Captures synchronized");
        for (session, capture) in sessions.iter_mut().zip(&captures) {
            session.process(capture);
        }
        drop(captures);
        for session in sessions.iter_mut() {
            session.publish();
        }
        RoundOutcome::Synchronized
    }

    fn sample(&self, session: &SensorSession<S>, capture: &S::Capture) -> SubordinateSample {
        let kind = if self.compare_subordinate_depth {
            PlaneKind::Depth
        } else {
            PlaneKind::Color
        };
        let settings = session.settings();
        SubordinateSample {
            timestamp: capture.plane(kind).map(|v| v.device_timestamp),
            subordinate_delay_usec: settings.subordinate_delay_usec,
            depth_delay_usec: settings.depth_delay_usec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(usec: Option<u64>, delay: u32) -> SubordinateSample {
        SubordinateSample {
            timestamp: usec.map(Duration::from_micros),
            subordinate_delay_usec: delay,
            depth_delay_usec: 0,
        }
    }

    const M: Option<Duration> = Some(Duration::from_micros(1_000_000));

    #[test]
    fn accepts_within_tolerance() {
        let t = 160;
        for offset in [-160i64, -1, 0, 1, 160] {
            let ts = (1_000_200 + offset) as u64;
            assert_eq!(reconcile(M, &[sub(Some(ts), 200)], t), SyncVerdict::Synchronized, "{offset}");
        }
    }

    #[test]
    fn lagging_subordinate_is_recaptured() {
        assert_eq!(
            reconcile(M, &[sub(Some(1_000_039), 200)], 160),
            SyncVerdict::RecaptureSubordinate(0)
        );
    }

    #[test]
    fn ahead_subordinate_means_stale_master() {
        assert_eq!(
            reconcile(M, &[sub(Some(1_000_361), 200)], 160),
            SyncVerdict::RecaptureMaster
        );
    }

    #[test]
    fn missing_images_pick_the_bad_side() {
        assert_eq!(reconcile(None, &[sub(Some(0), 0)], 160), SyncVerdict::RecaptureMaster);
        assert_eq!(
            reconcile(M, &[sub(Some(1_000_000), 0), sub(None, 0)], 160),
            SyncVerdict::RecaptureSubordinate(1)
        );
    }

    #[test]
    fn depth_delay_shifts_expectation() {
        let sample = SubordinateSample {
            timestamp: Some(Duration::from_micros(1_000_500)),
            subordinate_delay_usec: 200,
            depth_delay_usec: 300,
        };
        assert_eq!(reconcile(M, &[sample], 0), SyncVerdict::Synchronized);
    }

    #[test]
    fn first_failing_subordinate_decides() {
        let subs = [sub(Some(1_000_000), 0), sub(Some(2_000_000), 0), sub(Some(0), 0)];
        assert_eq!(reconcile(M, &subs, 160), SyncVerdict::RecaptureMaster);
    }
}
