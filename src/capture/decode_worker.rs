//! Off-thread color decode.
//!
//! The capture thread offers at most one compressed color buffer at a time;
//! if the worker is still busy with the previous one the new buffer is
//! skipped, so capture is never back-pressured by decode. Decoded planes come
//! back on a short result queue that the consumer drains once per tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};

use super::decoder::ColorDecoder;
use super::frame::ColorPlane;
use crate::settings::ImageFormat;
use crate::{Error, Result};

/// Compressed color waiting for decode
#[derive(Debug, Clone)]
pub struct DecodeTask {
    pub data: Bytes,
    pub format: ImageFormat,
    pub device_timestamp: Duration,
    pub cycle: u64,
}

/// Decoded color with the timestamp of the image it came from
#[derive(Debug, Clone)]
pub struct DecodedColor {
    pub plane: ColorPlane,
}

#[derive(Default)]
struct Stats {
    decoded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Consumer end of the result queue
#[derive(Clone)]
pub struct DecodedColorReceiver {
    rx: Receiver<DecodedColor>,
}

impl DecodedColorReceiver {
    /// Take everything queued and keep only the newest plane.
    pub fn drain_latest(&self) -> Option<DecodedColor> {
        let mut latest = None;
        while let Ok(decoded) = self.rx.try_recv() {
            latest = Some(decoded);
        }
        latest
    }
}

/// Capture-side handle for offering tasks
#[derive(Clone)]
pub struct DecodeSubmitter {
    task_tx: Sender<DecodeTask>,
}

impl DecodeSubmitter {
    /// Offer a task; returns false (and drops it) when one is still pending.
    /// A worker that is gone is an error, not backpressure.
    pub fn push_task_if_empty(&self, task: DecodeTask) -> Result<bool> {
        if !self.task_tx.is_empty() {
            return Ok(false);
        }
        match self.task_tx.try_send(task) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => {
                Err(Error::Decode("color decode worker is not running".into()))
            }
        }
    }
}

pub struct DecodeWorker {
    task_tx: Sender<DecodeTask>,
    result_rx: Receiver<DecodedColor>,
    running: Arc<AtomicBool>,
    stats: Arc<CachePadded<Stats>>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    /// Start the worker thread.
    ///
    /// `backlog` bounds the decoded results held for the consumer; when it is
    /// full the oldest result is dropped so the newest always survives.
    pub fn spawn(poll_interval: Duration, backlog: usize) -> std::io::Result<Self> {
        let (task_tx, task_rx) = flume::bounded::<DecodeTask>(1);
        let (result_tx, result_rx) = flume::bounded::<DecodedColor>(backlog.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(CachePadded::new(Stats::default()));

        let worker = Worker {
            task_rx,
            result_tx,
            overflow_rx: result_rx.clone(),
            running: running.clone(),
            stats: stats.clone(),
            decoder: ColorDecoder::default(),
            poll_interval,
        };

        let handle = thread::Builder::new()
            .name("color-decode".into())
            .spawn(move || worker.run())?;

        info!(backlog, "Color decode worker started");

        Ok(Self {
            task_tx,
            result_rx,
            running,
            stats,
            handle: Some(handle),
        })
    }

    pub fn push_task_if_empty(&self, task: DecodeTask) -> Result<bool> {
        self.submitter().push_task_if_empty(task)
    }

    pub fn submitter(&self) -> DecodeSubmitter {
        DecodeSubmitter {
            task_tx: self.task_tx.clone(),
        }
    }

    pub fn receiver(&self) -> DecodedColorReceiver {
        DecodedColorReceiver {
            rx: self.result_rx.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::Acquire)
    }

    /// (decoded, failed, dropped)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.decoded.load(Ordering::Relaxed),
            self.stats.failed.load(Ordering::Relaxed),
            self.stats.dropped.load(Ordering::Relaxed),
        )
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Color decode worker panicked");
            }
            debug!("Color decode worker joined");
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    task_rx: Receiver<DecodeTask>,
    result_tx: Sender<DecodedColor>,
    overflow_rx: Receiver<DecodedColor>,
    running: Arc<AtomicBool>,
    stats: Arc<CachePadded<Stats>>,
    decoder: ColorDecoder,
    poll_interval: Duration,
}

impl Worker {
    fn run(self) {
        while self.running.load(Ordering::Acquire) {
            let task = match self.task_rx.recv_timeout(self.poll_interval) {
                Ok(task) => task,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let mut plane = ColorPlane::default();
            if let Err(e) = self.decoder.decode_into(&task.data, task.format, &mut plane) {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Async color decode failed");
                continue;
            }
            plane.device_timestamp = task.device_timestamp;
            plane.cycle = task.cycle;

            self.publish(DecodedColor { plane });
            self.stats.decoded.fetch_add(1, Ordering::Relaxed);
        }
        debug!("Color decode worker exiting");
    }

    fn publish(&self, mut decoded: DecodedColor) {
        loop {
            match self.result_tx.try_send(decoded) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    // make room by discarding the oldest result
                    if self.overflow_rx.try_recv().is_ok() {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("depthstream_decoded_color_dropped").increment(1);
                    }
                    decoded = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::decoder::tests::encode_solid;
    use std::time::Instant;

    fn task(cycle: u64) -> DecodeTask {
        DecodeTask {
            data: Bytes::from(encode_solid(8, 8, [10, 200, 10])),
            format: ImageFormat::Mjpeg,
            device_timestamp: Duration::from_micros(cycle * 33_333),
            cycle,
        }
    }

    fn wait_for<F: FnMut() -> bool>(mut cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn decodes_with_original_timestamp() {
        let mut worker = DecodeWorker::spawn(Duration::from_micros(100), 2).unwrap();
        let rx = worker.receiver();
        assert!(worker.push_task_if_empty(task(7)).unwrap());

        let mut got = None;
        assert!(wait_for(|| {
            got = rx.drain_latest();
            got.is_some()
        }));
        let decoded = got.unwrap();
        assert_eq!(decoded.plane.device_timestamp, Duration::from_micros(7 * 33_333));
        assert_eq!(decoded.plane.cycle, 7);
        assert_eq!((decoded.plane.width, decoded.plane.height), (8, 8));
        worker.stop();
        assert!(!worker.is_running());
    }

    #[test]
    fn drain_keeps_newest_and_backlog_drops_oldest() {
        let mut worker = DecodeWorker::spawn(Duration::from_micros(100), 2).unwrap();
        let rx = worker.receiver();

        for cycle in 1..=4 {
            assert!(wait_for(|| worker.push_task_if_empty(task(cycle)).unwrap()));
        }
        assert!(wait_for(|| worker.stats().0 == 4));

        let latest = rx.drain_latest().unwrap();
        assert_eq!(latest.plane.cycle, 4);
        assert_eq!(worker.stats().2, 2);
        assert!(rx.drain_latest().is_none());
        worker.stop();
    }

    #[test]
    fn stopped_worker_rejects_tasks() {
        let mut worker = DecodeWorker::spawn(Duration::from_micros(100), 1).unwrap();
        worker.stop();
        assert!(matches!(
            worker.push_task_if_empty(task(1)),
            Err(Error::Decode(_))
        ));
    }
}
