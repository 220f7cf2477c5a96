//! Compressed color -> BGRA

use zune_jpeg::zune_core::colorspace::ColorSpace;
use zune_jpeg::zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

use super::frame::ColorPlane;
use crate::settings::ImageFormat;
use crate::{Error, Result};

/// Bytes per decoded color pixel
pub const BGRA_CHANNELS: u32 = 4;

/// Reusable decode context. Holds only options, so it is cheap to keep one
/// per thread that decodes.
#[derive(Debug, Clone)]
pub struct ColorDecoder {
    options: DecoderOptions,
}

impl Default for ColorDecoder {
    fn default() -> Self {
        Self {
            options: DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA),
        }
    }
}

impl ColorDecoder {
    /// Decode `data` into `plane` as BGRA, reusing the plane's storage.
    pub fn decode_into(&self, data: &[u8], format: ImageFormat, plane: &mut ColorPlane) -> Result<()> {
        match format {
            ImageFormat::Mjpeg => {
                let mut decoder = JpegDecoder::new_with_options(data, self.options);
                decoder
                    .decode_headers()
                    .map_err(|e| Error::Decode(format!("{e:?}")))?;
                let (width, height) = decoder
                    .dimensions()
                    .ok_or_else(|| Error::Decode("missing JPEG dimensions".into()))?;

                plane.allocate(width as u32, height as u32, BGRA_CHANNELS);
                decoder
                    .decode_into(&mut plane.data)
                    .map_err(|e| Error::Decode(format!("{e:?}")))?;
                rgba_to_bgra(&mut plane.data);
                Ok(())
            }
            ImageFormat::Bgra32 => Err(Error::Decode("BGRA32 is not compressed".into())),
            other => Err(Error::Decode(format!("unsupported color format {other:?}"))),
        }
    }

    pub fn decode(&self, data: &[u8], format: ImageFormat) -> Result<ColorPlane> {
        let mut plane = ColorPlane::default();
        self.decode_into(data, format, &mut plane)?;
        Ok(plane)
    }
}

fn rgba_to_bgra(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}
