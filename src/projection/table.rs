//! Per-pixel unprojection table

use tracing::{debug, instrument};

use crate::sensor::{Calibration, CameraKind};
use crate::{Error, Result};

/// Ray scaling for one pixel: a point at depth `d` sits at `(rx*d, ry*d, d)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ray {
    pub rx: f32,
    pub ry: f32,
}

impl Ray {
    pub const INVALID: Ray = Ray { rx: 0.0, ry: 0.0 };

    /// Both components zero marks a pixel the calibration cannot project.
    pub fn is_valid(&self) -> bool {
        !(self.rx == 0.0 && self.ry == 0.0)
    }
}

/// Rays for every pixel of one camera, row-major.
///
/// Built once per calibration and immutable afterwards, so it is shared
/// between threads behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionTable {
    camera: CameraKind,
    width: u32,
    height: u32,
    rays: Vec<Ray>,
}

impl ProjectionTable {
    /// Project every pixel of `camera` through `calibration` at unit depth.
    ///
    /// Pixels without a mapping, or with a non-finite one, are stored as
    /// [`Ray::INVALID`].
    #[instrument(skip(calibration))]
    pub fn build<K: Calibration>(calibration: &K, camera: CameraKind) -> Result<Self> {
        let (width, height) = calibration.resolution(camera).ok_or_else(|| {
            Error::Calibration(format!("{camera:?} camera has no calibrated resolution"))
        })?;

        let len = width as usize * height as usize;
        let mut rays = Vec::new();
        rays.try_reserve_exact(len)
            .map_err(|_| Error::TableAllocation { width, height })?;

        let mut invalid = 0usize;
        for y in 0..height {
            for x in 0..width {
                let ray = match calibration.unproject([x as f32, y as f32], 1.0, camera) {
                    Some([rx, ry, _]) if rx.is_finite() && ry.is_finite() => Ray { rx, ry },
                    _ => Ray::INVALID,
                };
                if !ray.is_valid() {
                    invalid += 1;
                }
                rays.push(ray);
            }
        }

        debug!(width, height, invalid, "Built projection table");

        Ok(Self {
            camera,
            width,
            height,
            rays,
        })
    }

    /// Wrap precomputed rays, e.g. a table loaded alongside a recording.
    pub fn from_rays(camera: CameraKind, width: u32, height: u32, rays: Vec<Ray>) -> Result<Self> {
        if rays.len() != width as usize * height as usize {
            return Err(Error::DimensionMismatch {
                frame: (rays.len() as u32, 1),
                table: (width, height),
            });
        }
        Ok(Self {
            camera,
            width,
            height,
            rays,
        })
    }

    pub fn camera(&self) -> CameraKind {
        self.camera
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn rays(&self) -> &[Ray] {
        &self.rays
    }

    pub fn ray(&self, x: u32, y: u32) -> Option<Ray> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.rays.get((y * self.width + x) as usize).copied()
    }
}
