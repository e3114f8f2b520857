#![doc = include_str!("../README.md")]

pub mod yuv;

pub use yuv::{rgba_to_yuv420, rgba_to_yuv420_with, yuv420_to_rgba, yuv420_to_rgba_with};

/// Errors emitted by the pixel converters.
///
/// # Example
/// ```rust
/// use vfx_codec::ConvertError;
///
/// let err = ConvertError::BufferTooSmall { buffer: "rgba", need: 64, got: 8 };
/// assert_eq!(err.to_string(), "rgba buffer holds 8 bytes, need 64");
/// ```
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConvertError {
    /// Width or height was zero.
    #[error("conversion dimensions must be non-zero (got {width}x{height})")]
    ZeroDimension { width: u32, height: u32 },
    /// Source or destination slice cannot hold the image.
    #[error("{buffer} buffer holds {got} bytes, need {need}")]
    BufferTooSmall {
        buffer: &'static str,
        need: usize,
        got: usize,
    },
}
