//! Math type re-exports and renderer-specific math utilities.
//!
//! This module re-exports types from `glam` and provides the small amount of
//! resolution and transform math shared by the resource manager and the
//! trace stage.

// Re-export glam types
pub use glam::{Mat4, UVec2, Vec2, Vec3, Vec4};

/// Rec. 709 luminance weights.
pub const LUMINANCE: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Smallest power of two greater than or equal to `n` (`n == 0` yields 1).
///
/// Exact powers of two are returned unchanged.
#[inline]
pub fn next_pow2(n: u32) -> u32 {
    n.max(1).next_power_of_two()
}

/// Number of levels in a full mip chain down to 1x1.
#[inline]
pub fn mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Size of mip `level` of a `width x height` texture (never below 1).
#[inline]
pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

/// Maps normalized device coordinates to pixel coordinates of a
/// `width x height` surface. Row 0 is the top of the image, so `y` is flipped.
pub fn ndc_to_pixel(width: u32, height: u32) -> Mat4 {
    let hw = width as f32 * 0.5;
    let hh = height as f32 * 0.5;
    Mat4::from_translation(Vec3::new(hw, hh, 0.0)) * Mat4::from_scale(Vec3::new(hw, -hh, 1.0))
}

/// Relative luminance of a linear RGB(A) value.
#[inline]
pub fn luminance(c: [f32; 4]) -> f32 {
    LUMINANCE.dot(Vec3::new(c[0], c[1], c[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_pow2() {
        assert_eq!(next_pow2(0), 1);
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(3), 4);
        assert_eq!(next_pow2(1023), 1024);
        assert_eq!(next_pow2(1024), 1024);
        assert_eq!(next_pow2(1025), 2048);
    }

    #[test]
    fn test_mip_count() {
        assert_eq!(mip_count(1, 1), 1);
        assert_eq!(mip_count(2, 1), 2);
        assert_eq!(mip_count(1024, 512), 11);
        assert_eq!(mip_extent(1024, 512, 10), (1, 1));
        assert_eq!(mip_extent(1024, 512, 3), (128, 64));
    }

    #[test]
    fn test_ndc_to_pixel() {
        let m = ndc_to_pixel(64, 32);
        let top_left = m.transform_point3(Vec3::new(-1.0, 1.0, 0.0));
        let bottom_right = m.transform_point3(Vec3::new(1.0, -1.0, 0.0));
        assert!((top_left - Vec3::new(0.0, 0.0, 0.0)).length() < 1e-5);
        assert!((bottom_right - Vec3::new(64.0, 32.0, 0.0)).length() < 1e-5);
    }
}
