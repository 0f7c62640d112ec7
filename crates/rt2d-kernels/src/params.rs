//! Uniform blocks shared with the WGSL sources
//!
//! Every struct is padded to a multiple of 16 bytes so it can back a
//! `var<uniform>` binding without layout surprises.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Per-paint parameters for the blit shaders
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BlitParams {
    /// Op-specific values (modulate color, mip/variance_max, min photons, ...)
    pub params: Vec4,
    /// Destination extent in texels
    pub dst_size: [f32; 2],
    /// Mip levels visible through the source view
    pub level_count: u32,
    pub _pad: u32,
}

impl BlitParams {
    pub fn new(params: [f32; 4], dst_width: u32, dst_height: u32, level_count: u32) -> Self {
        Self {
            params: Vec4::from_array(params),
            dst_size: [dst_width as f32, dst_height as f32],
            level_count: level_count.max(1),
            _pad: 0,
        }
    }
}

/// `Kernel_Trace` uniforms
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TraceParams {
    /// World -> NDC
    pub world_to_screen: [[f32; 4]; 4],
    /// NDC -> accumulation pixel
    pub screen_to_pixel: [[f32; 4]; 4],
    pub ray_count: u32,
    /// Pixel width of the accumulation image (the atomic surface is 4x wider)
    pub atomic_width: u32,
    pub height: u32,
    pub _pad: u32,
}

impl Default for TraceParams {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, 0, 1, 1)
    }
}

impl TraceParams {
    pub fn new(world_to_screen: Mat4, screen_to_pixel: Mat4, ray_count: u32, width: u32, height: u32) -> Self {
        Self {
            world_to_screen: world_to_screen.to_cols_array_2d(),
            screen_to_pixel: screen_to_pixel.to_cols_array_2d(),
            ray_count,
            atomic_width: width,
            height,
            _pad: 0,
        }
    }
}

/// `Kernel_ConvertOutscatter` uniforms
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ConvertParams {
    pub width: u32,
    pub height: u32,
    pub _pad: [u32; 2],
}

impl ConvertParams {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, _pad: [0; 2] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes() {
        assert_eq!(std::mem::size_of::<BlitParams>(), 32);
        assert_eq!(std::mem::size_of::<TraceParams>(), 144);
        assert_eq!(std::mem::size_of::<ConvertParams>(), 16);
    }

    #[test]
    fn test_trace_params_column_major() {
        let m = Mat4::from_translation(glam::Vec3::new(3.0, 4.0, 0.0));
        let p = TraceParams::new(m, Mat4::IDENTITY, 10, 8, 4);
        assert_eq!(p.world_to_screen[3][0], 3.0);
        assert_eq!(p.world_to_screen[3][1], 4.0);
    }
}
