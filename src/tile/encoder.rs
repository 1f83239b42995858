//! PNG tile encoder.
//!
//! Render surfaces are RGBA buffers; tiles are stored and served as PNG so
//! they survive round trips through storage without loss.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageReader, RgbaImage};

use crate::error::TileError;

/// PNG signature bytes.
pub const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Encodes render surfaces as PNG.
#[derive(Debug, Clone, Copy)]
pub struct PngTileEncoder {
    compression: CompressionType,
}

impl PngTileEncoder {
    pub fn new() -> Self {
        Self {
            compression: CompressionType::Default,
        }
    }

    /// Encoder favouring speed over size, for interactive rendering.
    pub fn fast() -> Self {
        Self {
            compression: CompressionType::Fast,
        }
    }

    /// Encode an RGBA surface as PNG.
    pub fn encode(&self, surface: &RgbaImage) -> Result<Bytes, TileError> {
        let mut output = Vec::new();
        let encoder =
            PngEncoder::new_with_quality(&mut output, self.compression, FilterType::Adaptive);

        encoder
            .write_image(
                surface.as_raw(),
                surface.width(),
                surface.height(),
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| TileError::Encode {
                message: e.to_string(),
            })?;

        Ok(Bytes::from(output))
    }

    /// Get PNG dimensions without decoding pixel data.
    pub fn dimensions(&self, data: &[u8]) -> Result<(u32, u32), TileError> {
        let reader = ImageReader::with_format(Cursor::new(data), image::ImageFormat::Png);
        reader.into_dimensions().map_err(|e| TileError::Encode {
            message: e.to_string(),
        })
    }
}

impl Default for PngTileEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `data` starts with the PNG signature.
pub fn is_png(data: &[u8]) -> bool {
    data.starts_with(&PNG_MAGIC)
}
