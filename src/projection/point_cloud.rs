//! Depth plane + projection table -> compacted point cloud

use tracing::error;

use super::table::ProjectionTable;
use crate::capture::frame::{PointCloud, Position, Uv};
use crate::{Error, Result};

impl PointCloud {
    /// Unproject every pixel with a depth return and a valid ray, packing the
    /// survivors at the front of the position/uv arrays in row-major order.
    ///
    /// The arrays are sized for the full pixel count so no frame ever grows
    /// them twice. On a dimension mismatch nothing is written.
    pub fn compact(
        &mut self,
        depth: &[u16],
        dims: (u32, u32),
        table: &ProjectionTable,
    ) -> Result<usize> {
        let (width, height) = dims;
        let pixels = width as usize * height as usize;
        if dims != table.dims() || depth.len() < pixels {
            error!(frame = ?dims, table = ?table.dims(), "Image dims mismatch!");
            return Err(Error::DimensionMismatch {
                frame: dims,
                table: table.dims(),
            });
        }

        if self.positions.len() != pixels {
            self.positions.resize(pixels, Position::default());
            self.uvs.resize(pixels, Uv::default());
        }

        let rays = table.rays();
        let mut count = 0;
        for y in 0..height {
            let row = y as usize * width as usize;
            for x in 0..width {
                let idx = row + x as usize;
                let sample = depth[idx];
                let ray = rays[idx];
                if sample != 0 && ray.is_valid() {
                    let d = f32::from(sample);
                    self.positions[count] = Position {
                        x: ray.rx * d,
                        y: ray.ry * d,
                        z: d,
                    };
                    self.uvs[count] = Uv { x, y };
                    count += 1;
                }
            }
        }

        self.num_points = count;
        Ok(count)
    }
}
