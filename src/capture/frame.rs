use std::mem;
use std::time::Duration;

/// One 2D sample array produced from a single capture.
///
/// Storage is allocated lazily on the first capture that carries the plane
/// and reused afterwards. `cycle` names the capture cycle that last wrote the
/// samples, so a plane whose cycle differs from its frame's cycle is stale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plane<T> {
    pub width: u32,
    pub height: u32,
    /// Samples per pixel (1 for depth/IR, 4 for BGRA color)
    pub channels: u32,
    pub data: Vec<T>,
    /// Device clock timestamp of the source image
    pub device_timestamp: Duration,
    pub cycle: u64,
}

impl<T: Copy + Default> Plane<T> {
    pub fn is_allocated(&self) -> bool {
        !self.data.is_empty()
    }

    /// Resize for the given dimensions, keeping the allocation when they match.
    pub fn allocate(&mut self, width: u32, height: u32, channels: u32) {
        let len = width as usize * height as usize * channels as usize;
        if self.width != width || self.height != height || self.channels != channels {
            self.width = width;
            self.height = height;
            self.channels = channels;
            self.data.clear();
        }
        self.data.resize(len, T::default());
    }

    /// Copy samples in, allocating on first use.
    pub fn set_from(&mut self, width: u32, height: u32, channels: u32, samples: &[T]) {
        self.allocate(width, height, channels);
        let len = self.data.len().min(samples.len());
        self.data[..len].copy_from_slice(&samples[..len]);
    }

    pub fn clear(&mut self) {
        *self = Self {
            data: Vec::new(),
            ..Default::default()
        };
    }
}

pub type DepthPlane = Plane<u16>;
pub type ColorPlane = Plane<u8>;
pub type IrPlane = Plane<u16>;

/// World-space position in millimeters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Integer source pixel of a point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Uv {
    pub x: u32,
    pub y: u32,
}

/// Compacted point cloud. Entries past `num_points` are leftovers from
/// earlier frames and are never exposed.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    pub(crate) positions: Vec<Position>,
    pub(crate) uvs: Vec<Uv>,
    pub(crate) num_points: usize,
    pub cycle: u64,
}

impl PointCloud {
    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions[..self.num_points]
    }

    pub fn uvs(&self) -> &[Uv] {
        &self.uvs[..self.num_points]
    }

    /// Slots available before the next frame reallocates
    pub fn capacity(&self) -> usize {
        self.positions.len()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Joint of a tracked skeleton, camera space millimeters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Joint {
    pub position: Position,
    /// Orientation quaternion, w first
    pub orientation: [f32; 4],
    pub confidence: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Skeleton {
    pub joints: Vec<Joint>,
}

/// Body tracking output copied into a frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyFrame {
    pub skeletons: Vec<Skeleton>,
    pub body_ids: Vec<u32>,
    /// Per depth pixel body index, 255 for background
    pub index_map: Plane<u8>,
    pub cycle: u64,
}

/// The pipeline's processed output for one capture cycle.
///
/// Owned by the producing session while being filled, then moved between the
/// back, middle and front slots by swapping; the samples are never copied.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub cycle: u64,
    pub depth: DepthPlane,
    pub color: ColorPlane,
    /// Set when `color` was refreshed since this slot was last handed on
    pub color_updated: bool,
    pub ir: IrPlane,
    pub depth_in_color: DepthPlane,
    pub color_in_depth: ColorPlane,
    pub point_cloud: PointCloud,
    pub bodies: BodyFrame,
}

fn swap_newer<T>(ours: &mut T, theirs: &mut T, cycle: impl Fn(&T) -> u64) {
    if cycle(ours) > cycle(theirs) {
        mem::swap(ours, theirs);
    }
}

impl Frame {
    /// Exchange contents with `other`.
    ///
    /// Each plane only travels when this frame holds a newer one, so a
    /// consumer keeps the last observed plane (and its timestamp) across
    /// cycles whose capture did not carry it, and never sees a plane go
    /// back in time.
    pub fn swap_frame(&mut self, other: &mut Frame) {
        mem::swap(&mut self.cycle, &mut other.cycle);
        swap_newer(&mut self.depth, &mut other.depth, |p| p.cycle);
        swap_newer(&mut self.ir, &mut other.ir, |p| p.cycle);

        if self.color.cycle > other.color.cycle {
            mem::swap(&mut self.color, &mut other.color);
            mem::swap(&mut self.color_updated, &mut other.color_updated);
        }

        swap_newer(&mut self.depth_in_color, &mut other.depth_in_color, |p| p.cycle);
        swap_newer(&mut self.color_in_depth, &mut other.color_in_depth, |p| p.cycle);
        swap_newer(&mut self.point_cloud, &mut other.point_cloud, |c| c.cycle);
        swap_newer(&mut self.bodies, &mut other.bodies, |b| b.cycle);
    }

    pub fn reset(&mut self) {
        *self = Frame::default();
    }

    pub fn depth_device_time(&self) -> Duration {
        self.depth.device_timestamp
    }

    pub fn color_device_time(&self) -> Duration {
        self.color.device_timestamp
    }
}
