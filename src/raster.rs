//! In-memory RGBA rasters and the PNG loader.

use crate::{Error, Result};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use std::path::Path;

/// A decoded image: `width * height` RGBA8 pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Raster {
    /// Wrap a pixel buffer, checking that it holds exactly `width * height` RGBA pixels.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = byte_len(width, height);
        if pixels.len() != expected {
            return Err(Error::Other(format!(
                "raster {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// A raster with every pixel set to `rgba`.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(byte_len(width, height))
            .collect();
        Self { width, height, pixels }
    }

    /// A fully transparent raster, used as the target buffer for diff output.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0, 0])
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of pixels (not bytes).
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]])
    }

    /// Copy the top-left `width x height` region. Sizes larger than the raster are clamped.
    pub fn crop(&self, width: u32, height: u32) -> Self {
        let width = width.min(self.width);
        let height = height.min(self.height);
        let row = width as usize * 4;
        let stride = self.width as usize * 4;
        let mut pixels = Vec::with_capacity(byte_len(width, height));
        for y in 0..height as usize {
            let start = y * stride;
            pixels.extend_from_slice(&self.pixels[start..start + row]);
        }
        Self { width, height, pixels }
    }
}

fn byte_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Decode PNG bytes into an RGBA raster. Other formats are rejected.
pub fn decode_png(bytes: &[u8]) -> Result<Raster> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map_err(|e| Error::DecodeError(e.to_string()))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    Ok(Raster {
        width,
        height,
        pixels: img.into_raw(),
    })
}

/// Encode a raster as an RGBA PNG.
pub fn encode_png(raster: &Raster) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(
            &raster.pixels,
            raster.width,
            raster.height,
            ExtendedColorType::Rgba8,
        )
        .map_err(|e| Error::EncodeError(e.to_string()))?;
    Ok(buf)
}

/// Read and decode a PNG file.
///
/// A missing or unreadable file is reported as a decode failure, the same as
/// a file that is not a valid PNG.
pub async fn load(path: impl AsRef<Path>) -> Result<Raster> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::DecodeError(format!("{}: {}", path.display(), e)))?;
    decode_png(&bytes).map_err(|e| match e {
        Error::DecodeError(msg) => Error::DecodeError(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Encode a raster and write it to `path`, completing before returning.
pub async fn save(raster: &Raster, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode_png(raster)?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| Error::FilesystemError(format!("{}: {}", path.display(), e)))
}
