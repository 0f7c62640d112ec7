//! Error types for the rt2d renderer.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for renderer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// GPU (or emulated GPU) memory could not satisfy an allocation
    #[error("Out of GPU memory allocating '{label}' ({bytes} bytes)")]
    OutOfMemory { label: String, bytes: u64 },

    /// Requested render resolution is unusable
    #[error("Invalid render dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Texture handle does not belong to this backend (or was released)
    #[error("Unknown texture handle: {0}")]
    UnknownTexture(u32),

    /// Buffer handle does not belong to this backend (or was released)
    #[error("Unknown buffer handle: {0}")]
    UnknownBuffer(u32),

    /// Mip level outside the texture's chain
    #[error("Mip level {level} out of range (texture has {count})")]
    MipOutOfRange { level: u32, count: u32 },

    /// Operation not valid for a texture format
    #[error("Format mismatch: expected {expected}, got {actual}")]
    FormatMismatch { expected: String, actual: String },

    /// Ray upload larger than the buffer it targets
    #[error("Ray upload of {count} exceeds buffer capacity {capacity}")]
    RayBufferOverflow { count: usize, capacity: usize },

    /// Backend cannot perform the requested operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Device-level failure reported by the GPU API
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Training driver failure
    #[error("Training error: {0}")]
    Training(String),

    /// Export target directory could not be prepared
    #[error("Export directory unavailable: {0}")]
    ExportDir(PathBuf),

    /// Image encode/decode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an out-of-memory error for a labelled allocation.
    pub fn oom(label: impl Into<String>, bytes: u64) -> Self {
        Self::OutOfMemory { label: label.into(), bytes }
    }

    /// Create a training error.
    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }
}

/// Result type alias for renderer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::InvalidDimensions { width: 0, height: 720 };
        assert!(e.to_string().contains("0x720"));

        let e = Error::oom("Outscatter POT", 4096);
        assert!(e.to_string().contains("Outscatter POT"));
        assert!(e.to_string().contains("4096"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
