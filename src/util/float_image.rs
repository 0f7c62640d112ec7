//! Floating-point RGBA images read back from the GPU.

use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgba32FImage};

use super::error::{Error, Result};
use super::math::luminance;

/// Row-major RGBA32F image (row 0 is the top row).
#[derive(Debug, Clone, PartialEq)]
pub struct FloatImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 4]>,
}

impl FloatImage {
    /// Create a black, fully transparent image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 4]; (width as usize) * (height as usize)],
        }
    }

    /// Wrap existing pixel data. Fails when the pixel count doesn't match.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<[f32; 4]>) -> Result<Self> {
        if pixels.len() != (width as usize) * (height as usize) {
            return Err(Error::InvalidDimensions { width, height });
        }
        Ok(Self { width, height, pixels })
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: [f32; 4]) {
        let i = (y * self.width + x) as usize;
        self.pixels[i] = value;
    }

    /// Sum of every channel over the whole image.
    pub fn channel_sums(&self) -> [f64; 4] {
        self.pixels.iter().fold([0.0; 4], |mut acc, p| {
            for c in 0..4 {
                acc[c] += p[c] as f64;
            }
            acc
        })
    }

    /// Root mean square of per-pixel luminance.
    pub fn rms_luminance(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.pixels.iter().map(|p| {
            let l = luminance(*p) as f64;
            l * l
        }).sum();
        (sum / self.pixels.len() as f64).sqrt()
    }

    /// Save as 32-bit float OpenEXR.
    pub fn save_exr(&self, path: &Path) -> Result<()> {
        let flat: Vec<f32> = bytemuck::cast_slice(&self.pixels).to_vec();
        let buffer = Rgba32FImage::from_raw(self.width, self.height, flat)
            .ok_or(Error::InvalidDimensions { width: self.width, height: self.height })?;
        DynamicImage::ImageRgba32F(buffer).save_with_format(path, ImageFormat::OpenExr)?;
        Ok(())
    }

    /// Load any float-capable image (EXR in practice) as RGBA32F.
    pub fn load(path: &Path) -> Result<Self> {
        let img = image::open(path)?.into_rgba32f();
        let (width, height) = img.dimensions();
        let pixels = bytemuck::cast_slice::<f32, [f32; 4]>(img.as_raw()).to_vec();
        Self::from_pixels(width, height, pixels)
    }
}
