//! Utility types and functions for rt2d.
//!
//! This module contains fundamental types used throughout the crate:
//! - [`Error`] / [`Result`] - Error handling
//! - [`FloatImage`] - RGBA32F readback images and EXR IO
//! - Math type re-exports from glam

mod error;
mod float_image;
mod math;

pub use error::*;
pub use float_image::*;
pub use math::*;
