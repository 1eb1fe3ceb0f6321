use std::path::Path;
use std::sync::Mutex;

use image::{ImageBuffer, ImageFormat, Rgba, RgbaImage};
use nalgebra::Vector3;

use crate::error::{RigError, RigResult};

/// Multi-pose 16-bit RGBA atlas: one row per pose, one column per vertex.
///
/// Pixel writes go through a lock so per-polygon workers can share it.
#[derive(Debug)]
pub struct AngleAtlas {
    width: u32,
    height: u32,
    pixels: Mutex<Vec<u16>>,
}

impl AngleAtlas {
    pub fn new(width: u32, height: u32) -> RigResult<Self> {
        if width == 0 || height == 0 {
            return Err(RigError::precondition(format!(
                "atlas size {width}x{height} is empty"
            )));
        }
        let len = width as usize * height as usize * 4;
        Ok(Self {
            width,
            height,
            pixels: Mutex::new(vec![0; len]),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn offset(&self, row: u32, column: u32) -> Option<usize> {
        (row < self.height && column < self.width)
            .then(|| (row as usize * self.width as usize + column as usize) * 4)
    }

    /// Stores one pixel; returns `false` when the cell is outside the atlas
    /// or the buffer was already released.
    pub fn write_pixel(&self, row: u32, column: u32, value: [u16; 4]) -> bool {
        let Some(offset) = self.offset(row, column) else {
            return false;
        };
        let mut pixels = self.pixels.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match pixels.get_mut(offset..offset + 4) {
            Some(slot) => {
                slot.copy_from_slice(&value);
                true
            }
            None => false,
        }
    }

    pub fn pixel(&self, row: u32, column: u32) -> Option<[u16; 4]> {
        let offset = self.offset(row, column)?;
        let pixels = self.pixels.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = pixels.get(offset..offset + 4)?;
        Some([slot[0], slot[1], slot[2], slot[3]])
    }

    /// Encodes the atlas as a 16-bit-per-channel RGBA PNG.
    pub fn save_png(&self, path: &Path) -> RigResult<()> {
        let pixels = self
            .pixels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let image: ImageBuffer<Rgba<u16>, Vec<u16>> = ImageBuffer::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| RigError::precondition("atlas buffer was released before export"))?;
        image.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }

    /// Frees the pixel buffer; later writes are ignored.
    pub fn release(&self) {
        let mut pixels = self.pixels.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *pixels = Vec::new();
    }
}

/// Per-vertex reference angles, addressed with the atlas convention
/// (`x = vertex % width`, `y = vertex / width`).
#[derive(Debug, Clone)]
pub struct ReferenceTexture {
    image: RgbaImage,
}

impl ReferenceTexture {
    pub fn load(path: &Path) -> RigResult<Self> {
        Ok(Self {
            image: image::open(path)?.to_rgba8(),
        })
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// RGB of a pixel normalized by 255, or `None` outside the image.
    pub fn lookup(&self, x: u32, y: u32) -> Option<Vector3<f64>> {
        let pixel = self.image.get_pixel_checked(x, y)?;
        Some(Vector3::new(
            pixel[0] as f64 / 255.0,
            pixel[1] as f64 / 255.0,
            pixel[2] as f64 / 255.0,
        ))
    }
}
