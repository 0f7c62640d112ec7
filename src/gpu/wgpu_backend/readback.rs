//! Device to host readback.

use half::f16;

use crate::gpu::TextureFormat;
use crate::util::{Error, FloatImage, Result};

/// `bytes_per_row` rounded up to `COPY_BYTES_PER_ROW_ALIGNMENT`.
pub(super) fn padded_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * bytes_per_pixel).div_ceil(align) * align
}

/// Map `buffer` for reading and block until it is available.
fn map_blocking(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| Error::Gpu(format!("poll failed: {e}")))?;
    rx.recv()
        .map_err(|_| Error::Gpu("map callback dropped".into()))?
        .map_err(|e| Error::Gpu(format!("buffer map failed: {e}")))
}

/// Copy one mip level of `texture` into host memory as RGBA32F.
pub(super) fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    format: TextureFormat,
    level: u32,
    (width, height): (u32, u32),
) -> Result<FloatImage> {
    let bpp = format.bytes_per_pixel();
    let row = padded_row(width, bpp);
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("rt2d_readback"),
        size: row as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("rt2d_readback") });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    queue.submit(Some(encoder.finish()));
    map_blocking(device, &staging)?;

    let pixels = {
        let data = staging.slice(..).get_mapped_range();
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height as usize {
            let start = y * row as usize;
            let line = &data[start..start + (width * bpp) as usize];
            decode_row(format, line, &mut pixels);
        }
        pixels
    };
    staging.unmap();
    FloatImage::from_pixels(width, height, pixels)
}

/// Read an atomic surface (`u32` per texel) as `[value, 0, 0, 1]` texels.
pub(super) fn read_u32_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    (width, height): (u32, u32),
) -> Result<FloatImage> {
    let size = width as u64 * height as u64 * 4;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("rt2d_atomic_readback"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("rt2d_readback") });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));
    map_blocking(device, &staging)?;

    let pixels = {
        let data = staging.slice(..).get_mapped_range();
        let values: &[u32] = bytemuck::cast_slice(&data);
        values.iter().map(|&v| [v as f32, 0.0, 0.0, 1.0]).collect()
    };
    staging.unmap();
    FloatImage::from_pixels(width, height, pixels)
}

fn decode_row(format: TextureFormat, line: &[u8], out: &mut Vec<[f32; 4]>) {
    match format {
        TextureFormat::Rgba32Float => {
            out.extend(line.chunks_exact(16).map(|t| {
                let v: [f32; 4] = bytemuck::pod_read_unaligned(t);
                v
            }));
        }
        TextureFormat::Rgba16Float => {
            out.extend(line.chunks_exact(8).map(|t| {
                let v: [f16; 4] = bytemuck::pod_read_unaligned(t);
                v.map(f16::to_f32)
            }));
        }
        TextureFormat::Rgba8Unorm => {
            out.extend(line.chunks_exact(4).map(|t| [t[0], t[1], t[2], t[3]].map(|c| c as f32 / 255.0)));
        }
        TextureFormat::Bgra8Unorm => {
            out.extend(line.chunks_exact(4).map(|t| [t[2], t[1], t[0], t[3]].map(|c| c as f32 / 255.0)));
        }
        TextureFormat::R32Uint => {
            out.extend(line.chunks_exact(4).map(|t| {
                let v: u32 = bytemuck::pod_read_unaligned(t);
                [v as f32, 0.0, 0.0, 1.0]
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_alignment() {
        assert_eq!(padded_row(1, 4), 256);
        assert_eq!(padded_row(64, 4), 256);
        assert_eq!(padded_row(65, 4), 512);
        assert_eq!(padded_row(16, 16), 256);
    }

    #[test]
    fn test_decode_bgra_swizzles() {
        let mut out = Vec::new();
        decode_row(TextureFormat::Bgra8Unorm, &[0, 0, 255, 255], &mut out);
        assert_eq!(out, vec![[1.0, 0.0, 0.0, 1.0]]);
    }

    #[test]
    fn test_decode_half() {
        let texel = [f16::from_f32(0.5), f16::from_f32(2.0), f16::ZERO, f16::ONE];
        let mut out = Vec::new();
        decode_row(TextureFormat::Rgba16Float, bytemuck::cast_slice(&texel), &mut out);
        assert_eq!(out, vec![[0.5, 2.0, 0.0, 1.0]]);
    }
}
