use std::fmt;

/// Four-character code describing a pixel layout.
///
/// # Example
/// ```rust
/// use vfx_core::prelude::FourCc;
///
/// let fcc = FourCc::new(*b"I420");
/// assert_eq!(fcc.to_string(), "I420");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// Construct from raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Little-endian u32 encoding.
    pub fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Try to convert to a printable string.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.as_str() {
            write!(f, "{s}")
        } else {
            write!(f, "0x{:08x}", self.to_u32())
        }
    }
}

/// Pixel formats a host can hand to a filter.
///
/// The effects pipeline only consumes [`VideoPixelFormat::I420`]; the others exist so that
/// frames tagged with them can be recognised and bypassed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum VideoPixelFormat {
    /// Planar YUV 4:2:0, three planes (Y, U, V).
    #[default]
    I420,
    /// Semi-planar YUV 4:2:0, interleaved VU.
    Nv21,
    /// Semi-planar YUV 4:2:0, interleaved UV.
    Nv12,
    /// Packed 8-bit RGBA.
    Rgba,
    /// Packed 8-bit BGRA.
    Bgra,
}

impl VideoPixelFormat {
    /// FourCc code for this format.
    pub fn fourcc(self) -> FourCc {
        match self {
            VideoPixelFormat::I420 => FourCc::new(*b"I420"),
            VideoPixelFormat::Nv21 => FourCc::new(*b"NV21"),
            VideoPixelFormat::Nv12 => FourCc::new(*b"NV12"),
            VideoPixelFormat::Rgba => FourCc::new(*b"RGBA"),
            VideoPixelFormat::Bgra => FourCc::new(*b"BGRA"),
        }
    }

    /// Number of separate memory planes the format uses.
    pub fn plane_count(self) -> usize {
        match self {
            VideoPixelFormat::I420 => 3,
            VideoPixelFormat::Nv21 | VideoPixelFormat::Nv12 => 2,
            VideoPixelFormat::Rgba | VideoPixelFormat::Bgra => 1,
        }
    }
}

impl fmt::Display for VideoPixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fourcc())
    }
}

/// Where the pixels of a frame live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BufferKind {
    /// Pixels resident in CPU memory.
    MemPixels,
    /// A GPU texture handle.
    Texture,
}

/// Frame rotation in 90-degree steps, as reported by the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

/// Color space hints used to pick conversion coefficients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColorSpace {
    /// Full-range Rec. 601, the layout the effects engine expects.
    #[default]
    Bt601Full,
    /// Limited-range Rec. 601.
    Bt601,
    /// Limited-range Rec. 709.
    Bt709,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_format_tags() {
        assert_eq!(VideoPixelFormat::I420.fourcc().to_string(), "I420");
        assert_eq!(VideoPixelFormat::I420.plane_count(), 3);
        assert_eq!(VideoPixelFormat::Nv21.plane_count(), 2);
        assert_eq!(VideoPixelFormat::Bgra.to_string(), "BGRA");
        assert_eq!(FourCc::new([0xff, 0, 0, 0]).to_string(), "0x000000ff");
    }
}
