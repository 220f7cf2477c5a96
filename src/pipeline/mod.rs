pub mod device;
pub mod handoff;
pub(crate) mod session;

pub use device::{Device, DeviceState};
pub use handoff::FrameHandoff;

/// Counters of one streaming session, as seen by the consumer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_produced: u64,
    pub frames_consumed: u64,
    /// Frames replaced in the middle slot before the consumer took them
    pub frames_overwritten: u64,
    pub capture_timeouts: u64,
    pub capture_errors: u64,
    pub missing_planes: u64,
    pub decode_tasks_skipped: u64,
    /// Color frames decoded off the capture thread
    pub decoded_colors: u64,
    pub decoded_colors_dropped: u64,
    pub compaction_errors: u64,
}
