//! Back -> middle -> front frame handoff between a producer and the consumer

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use crossbeam::utils::CachePadded;
use tracing::trace;

use crate::capture::frame::{ColorPlane, Frame};

/// Middle slot of the triple buffer.
///
/// The producer owns the back frame and the consumer owns the front frame;
/// only the middle frame lives here, so the lock is held just for the swap,
/// never for decode or compaction work.
pub struct FrameHandoff {
    serial: String,
    state: Mutex<HandoffState>,
    condition: Condvar,
    new_buffer: AtomicBool,
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct HandoffState {
    mid: Frame,
    /// Frames published by the producer
    produced: u64,
    /// Value of `produced` the consumer last took
    acknowledged: u64,
}

#[derive(Default)]
struct Stats {
    frames_produced: AtomicU64,
    frames_consumed: AtomicU64,
    frames_overwritten: AtomicU64,
}

impl FrameHandoff {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            state: Mutex::new(HandoffState::default()),
            condition: Condvar::new(),
            new_buffer: AtomicBool::new(false),
            stats: CachePadded::new(Stats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandoffState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Producer: block until the consumer took the last published frame, or
    /// until `running` drops.
    pub fn wait_for_consumer(&self, running: &AtomicBool) {
        let mut state = self.lock();
        while running.load(Ordering::Acquire) && state.acknowledged != state.produced {
            state = self
                .condition
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Producer: move the finished back frame into the middle slot.
    pub fn publish(&self, back: &mut Frame) {
        let mut state = self.lock();
        if self.new_buffer.load(Ordering::Acquire) {
            // consumer never saw the previous frame; it is coalesced away
            self.stats.frames_overwritten.fetch_add(1, Ordering::Relaxed);
        }
        back.swap_frame(&mut state.mid);
        state.produced += 1;
        self.new_buffer.store(true, Ordering::Release);
        drop(state);

        self.stats.frames_produced.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("depthstream_frames_produced", "serial" => self.serial.clone())
            .increment(1);
    }

    pub fn has_new_buffer(&self) -> bool {
        self.new_buffer.load(Ordering::Acquire)
    }

    /// Consumer: swap the middle frame into `front` if a new one is waiting,
    /// folding in color that finished decoding off-thread. Wakes the producer.
    pub fn take(&self, front: &mut Frame, decoded: Option<ColorPlane>) -> bool {
        if !self.has_new_buffer() {
            return false;
        }

        let mut state = self.lock();
        if let Some(plane) = decoded {
            state.mid.color = plane;
            state.mid.color_updated = true;
        }
        state.mid.swap_frame(front);
        front.color_updated = false;
        state.acknowledged = state.produced;
        self.new_buffer.store(false, Ordering::Release);
        trace!(serial = %self.serial, cycle = front.cycle, "Frame handed to consumer");
        drop(state);

        self.condition.notify_all();
        self.stats.frames_consumed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("depthstream_frames_consumed", "serial" => self.serial.clone())
            .increment(1);
        true
    }

    /// Wake a producer blocked in [`wait_for_consumer`](Self::wait_for_consumer).
    pub fn wake_all(&self) {
        let _state = self.lock();
        self.condition.notify_all();
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        *state = HandoffState::default();
        self.new_buffer.store(false, Ordering::Release);
    }

    /// (produced, consumed, overwritten)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.frames_produced.load(Ordering::Relaxed),
            self.stats.frames_consumed.load(Ordering::Relaxed),
            self.stats.frames_overwritten.load(Ordering::Relaxed),
        )
    }
}
