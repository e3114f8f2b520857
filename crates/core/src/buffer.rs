use smallvec::{SmallVec, smallvec};

use crate::format::{Rotation, VideoPixelFormat};

/// Errors raised when building or copying frames.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero (got {width}x{height})")]
    ZeroDimension { width: u32, height: u32 },
    #[error("plane {plane} stride {stride} is smaller than its row width {min}")]
    StrideTooSmall {
        plane: usize,
        stride: usize,
        min: usize,
    },
    #[error("plane {plane} holds {len} bytes, need {need}")]
    PlaneTooShort { plane: usize, len: usize, need: usize },
    #[error("expected {expected} planes for {format}, got {got}")]
    PlaneCount {
        format: VideoPixelFormat,
        expected: usize,
        got: usize,
    },
    #[error("packed buffer holds {got} bytes, need {need}")]
    BufferTooSmall { need: usize, got: usize },
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(VideoPixelFormat),
}

/// Metadata associated with a frame.
///
/// # Example
/// ```rust
/// use vfx_core::prelude::{FrameMeta, Rotation, VideoPixelFormat};
///
/// let meta = FrameMeta::new(VideoPixelFormat::I420, 33_000).with_rotation(Rotation::Deg90);
/// assert_eq!(meta.timestamp_us, 33_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    /// Pixel layout tag as reported by the host.
    pub format: VideoPixelFormat,
    /// Rotation the host wants applied at render time. Never applied here.
    pub rotation: Rotation,
    /// Render timestamp in microseconds.
    pub timestamp_us: i64,
}

impl FrameMeta {
    /// Create metadata with the given format and timestamp.
    pub fn new(format: VideoPixelFormat, timestamp_us: i64) -> Self {
        Self {
            format,
            rotation: Rotation::Deg0,
            timestamp_us,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }
}

/// Width, height and per-plane strides of an I420 frame.
///
/// Two frames with equal geometry can share scratch buffers.
///
/// # Example
/// ```rust
/// use vfx_core::prelude::FrameGeometry;
///
/// let g = FrameGeometry::new(3, 3, 4, 2, 2);
/// assert_eq!(g.chroma_width(), 2);
/// assert_eq!(g.chroma_height(), 2);
/// assert_eq!(g.yuv_len(), 4 * 3 + 2 * 2 + 2 * 2);
/// assert_eq!(g.rgba_len(), 4 * 3 * 4);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub y_stride: usize,
    pub u_stride: usize,
    pub v_stride: usize,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32, y_stride: usize, u_stride: usize, v_stride: usize) -> Self {
        Self {
            width,
            height,
            y_stride,
            u_stride,
            v_stride,
        }
    }

    /// Geometry with strides equal to the plane widths.
    pub fn tight_i420(width: u32, height: u32) -> Self {
        let chroma = width.div_ceil(2) as usize;
        Self::new(width, height, width as usize, chroma, chroma)
    }

    pub fn chroma_width(&self) -> usize {
        self.width.div_ceil(2) as usize
    }

    pub fn chroma_height(&self) -> usize {
        self.height.div_ceil(2) as usize
    }

    /// Scratch size for the YUV side, stride-padded like the source frame.
    pub fn yuv_len(&self) -> usize {
        let h = self.height as usize;
        let ch = self.chroma_height();
        self.y_stride * h + self.u_stride * ch + self.v_stride * ch
    }

    /// Scratch size for the RGBA side.
    pub fn rgba_len(&self) -> usize {
        self.y_stride * self.height as usize * 4
    }

    /// Bytes of a tightly packed I420 image (`Y` then `U` then `V`).
    pub fn packed_i420_len(&self) -> usize {
        let w = self.width as usize;
        let h = self.height as usize;
        w * h + 2 * self.chroma_width() * self.chroma_height()
    }

    /// Row length of the tightly packed RGBA image handed to the engine.
    pub fn rgba_stride(&self) -> usize {
        self.width as usize * 4
    }

    fn check(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::ZeroDimension {
                width: self.width,
                height: self.height,
            });
        }
        let minimums = [self.width as usize, self.chroma_width(), self.chroma_width()];
        for (plane, (stride, min)) in [self.y_stride, self.u_stride, self.v_stride]
            .into_iter()
            .zip(minimums)
            .enumerate()
        {
            if stride < min {
                return Err(FrameError::StrideTooSmall { plane, stride, min });
            }
        }
        Ok(())
    }
}

/// Plane view over a frame.
///
/// Accessed via `VideoFrame::planes`.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    data: &'a [u8],
    stride: usize,
}

/// Mutable plane view.
///
/// Accessed via `VideoFrame::planes_mut`.
#[derive(Debug)]
pub struct PlaneMut<'a> {
    data: &'a mut [u8],
    stride: usize,
}

impl<'a> Plane<'a> {
    /// Access the raw bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Stride in bytes for this plane.
    pub fn stride(&self) -> usize {
        self.stride
    }
}

impl<'a> PlaneMut<'a> {
    /// Mutable access to plane bytes.
    pub fn data(&mut self) -> &mut [u8] {
        self.data
    }

    /// Stride in bytes for this plane.
    pub fn stride(&self) -> usize {
        self.stride
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PlaneBuf {
    data: Vec<u8>,
    stride: usize,
}

/// A CPU-resident video frame with up to three owned planes.
///
/// # Example
/// ```rust
/// use vfx_core::prelude::*;
///
/// let frame = VideoFrame::i420(4, 4, 0).unwrap();
/// assert_eq!(frame.planes().len(), 3);
/// assert_eq!(frame.geometry().unwrap(), FrameGeometry::tight_i420(4, 4));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    meta: FrameMeta,
    width: u32,
    height: u32,
    planes: SmallVec<[PlaneBuf; 3]>,
}

impl VideoFrame {
    /// Zero-filled I420 frame with tight strides.
    pub fn i420(width: u32, height: u32, timestamp_us: i64) -> Result<Self, FrameError> {
        let g = FrameGeometry::tight_i420(width, height);
        Self::i420_with_geometry(g, timestamp_us)
    }

    /// Zero-filled I420 frame with caller-chosen strides.
    pub fn i420_with_geometry(
        geometry: FrameGeometry,
        timestamp_us: i64,
    ) -> Result<Self, FrameError> {
        geometry.check()?;
        let h = geometry.height as usize;
        let ch = geometry.chroma_height();
        Self::from_i420_planes(
            geometry,
            vec![0; geometry.y_stride * h],
            vec![0; geometry.u_stride * ch],
            vec![0; geometry.v_stride * ch],
            timestamp_us,
        )
    }

    /// Wrap host-provided I420 planes. Each plane must cover `stride * rows` bytes.
    pub fn from_i420_planes(
        geometry: FrameGeometry,
        y: Vec<u8>,
        u: Vec<u8>,
        v: Vec<u8>,
        timestamp_us: i64,
    ) -> Result<Self, FrameError> {
        geometry.check()?;
        let strides = [geometry.y_stride, geometry.u_stride, geometry.v_stride];
        let planes: SmallVec<[PlaneBuf; 3]> = smallvec![
            PlaneBuf {
                data: y,
                stride: strides[0],
            },
            PlaneBuf {
                data: u,
                stride: strides[1],
            },
            PlaneBuf {
                data: v,
                stride: strides[2],
            },
        ];
        check_plane_lengths(&planes, &geometry)?;
        Ok(Self {
            meta: FrameMeta::new(VideoPixelFormat::I420, timestamp_us),
            width: geometry.width,
            height: geometry.height,
            planes,
        })
    }

    /// Frame in any format, planes given as `(bytes, stride)`.
    ///
    /// I420 planes get the same stride and length checks as [`VideoFrame::from_i420_planes`].
    /// Other layouts are carried through untouched by the effects pipeline.
    pub fn from_planes(
        meta: FrameMeta,
        width: u32,
        height: u32,
        planes: impl IntoIterator<Item = (Vec<u8>, usize)>,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension { width, height });
        }
        let planes: SmallVec<[PlaneBuf; 3]> = planes
            .into_iter()
            .map(|(data, stride)| PlaneBuf { data, stride })
            .collect();
        let expected = meta.format.plane_count();
        if planes.len() != expected {
            return Err(FrameError::PlaneCount {
                format: meta.format,
                expected,
                got: planes.len(),
            });
        }
        if meta.format == VideoPixelFormat::I420 {
            let geometry = FrameGeometry::new(
                width,
                height,
                planes[0].stride,
                planes[1].stride,
                planes[2].stride,
            );
            check_plane_lengths(&planes, &geometry)?;
        }
        Ok(Self {
            meta,
            width,
            height,
            planes,
        })
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.meta.rotation = rotation;
        self
    }

    pub fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> VideoPixelFormat {
        self.meta.format
    }

    pub fn rotation(&self) -> Rotation {
        self.meta.rotation
    }

    pub fn timestamp_us(&self) -> i64 {
        self.meta.timestamp_us
    }

    /// Geometry of an I420 frame; `None` for other layouts.
    pub fn geometry(&self) -> Option<FrameGeometry> {
        if self.meta.format != VideoPixelFormat::I420 || self.planes.len() != 3 {
            return None;
        }
        Some(FrameGeometry::new(
            self.width,
            self.height,
            self.planes[0].stride,
            self.planes[1].stride,
            self.planes[2].stride,
        ))
    }

    /// Borrow planes as slices.
    pub fn planes(&self) -> SmallVec<[Plane<'_>; 3]> {
        self.planes
            .iter()
            .map(|p| Plane {
                data: &p.data,
                stride: p.stride,
            })
            .collect()
    }

    /// Borrow planes mutably for in-place writes.
    pub fn planes_mut(&mut self) -> SmallVec<[PlaneMut<'_>; 3]> {
        self.planes
            .iter_mut()
            .map(|p| PlaneMut {
                data: &mut p.data,
                stride: p.stride,
            })
            .collect()
    }

    /// Copy the visible pixels into `dst` as tightly packed I420 (`Y`, then `U`, then `V`).
    pub fn read_planes_packed(&self, dst: &mut [u8]) -> Result<(), FrameError> {
        let g = self
            .geometry()
            .ok_or(FrameError::UnsupportedFormat(self.meta.format))?;
        let need = g.packed_i420_len();
        if dst.len() < need {
            return Err(FrameError::BufferTooSmall {
                need,
                got: dst.len(),
            });
        }
        check_plane_lengths(&self.planes, &g)?;
        let mut offset = 0;
        for (index, (plane, (row_len, rows))) in
            self.planes.iter().zip(plane_extents(&g)).enumerate()
        {
            for row in plane.data.chunks(plane.stride).take(rows) {
                let visible = row.get(..row_len).ok_or(FrameError::PlaneTooShort {
                    plane: index,
                    len: plane.data.len(),
                    need: plane.stride * rows,
                })?;
                dst[offset..offset + row_len].copy_from_slice(visible);
                offset += row_len;
            }
        }
        Ok(())
    }

    /// Overwrite the visible pixels from a tightly packed I420 buffer. Stride padding is left as is.
    pub fn write_planes_packed(&mut self, src: &[u8]) -> Result<(), FrameError> {
        let g = self
            .geometry()
            .ok_or(FrameError::UnsupportedFormat(self.meta.format))?;
        let need = g.packed_i420_len();
        if src.len() < need {
            return Err(FrameError::BufferTooSmall {
                need,
                got: src.len(),
            });
        }
        check_plane_lengths(&self.planes, &g)?;
        let mut offset = 0;
        for (index, (plane, (row_len, rows))) in
            self.planes.iter_mut().zip(plane_extents(&g)).enumerate()
        {
            let (stride, len) = (plane.stride, plane.data.len());
            for row in plane.data.chunks_mut(stride).take(rows) {
                let visible = row.get_mut(..row_len).ok_or(FrameError::PlaneTooShort {
                    plane: index,
                    len,
                    need: stride * rows,
                })?;
                visible.copy_from_slice(&src[offset..offset + row_len]);
                offset += row_len;
            }
        }
        Ok(())
    }
}

/// Every plane must hold `stride * rows` bytes and no stride may undercut its row width.
fn check_plane_lengths(planes: &[PlaneBuf], g: &FrameGeometry) -> Result<(), FrameError> {
    g.check()?;
    for (plane, (buf, (_, rows))) in planes.iter().zip(plane_extents(g)).enumerate() {
        let need = buf.stride * rows;
        if buf.data.len() < need {
            return Err(FrameError::PlaneTooShort {
                plane,
                len: buf.data.len(),
                need,
            });
        }
    }
    Ok(())
}

fn plane_extents(g: &FrameGeometry) -> [(usize, usize); 3] {
    let chroma = (g.chroma_width(), g.chroma_height());
    [(g.width as usize, g.height as usize), chroma, chroma]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded_frame() -> VideoFrame {
        let g = FrameGeometry::new(3, 3, 8, 4, 5);
        let y: Vec<u8> = (0..24).collect();
        let u: Vec<u8> = (100..108).collect();
        let v: Vec<u8> = (200..210).collect();
        VideoFrame::from_i420_planes(g, y, u, v, 7).unwrap()
    }

    #[test]
    fn packed_read_skips_stride_padding() {
        let frame = padded_frame();
        let mut packed = vec![0u8; frame.geometry().unwrap().packed_i420_len()];
        frame.read_planes_packed(&mut packed).unwrap();
        assert_eq!(&packed[..9], &[0, 1, 2, 8, 9, 10, 16, 17, 18]);
        assert_eq!(&packed[9..13], &[100, 101, 104, 105]);
        assert_eq!(&packed[13..17], &[200, 201, 205, 206]);
    }

    #[test]
    fn packed_write_preserves_padding() {
        let mut frame = padded_frame();
        let packed = vec![0xAA; frame.geometry().unwrap().packed_i420_len()];
        frame.write_planes_packed(&packed).unwrap();
        let planes = frame.planes();
        let y = planes[0].data();
        assert_eq!(&y[..3], &[0xAA; 3]);
        assert_eq!(&y[3..8], &[3, 4, 5, 6, 7]);
        assert_eq!(planes[2].data()[2], 202);
    }

    #[test]
    fn rejects_short_planes_and_strides() {
        let g = FrameGeometry::new(4, 2, 4, 2, 2);
        let err = VideoFrame::from_i420_planes(g, vec![0; 7], vec![0; 2], vec![0; 2], 0);
        assert_eq!(
            err.unwrap_err(),
            FrameError::PlaneTooShort {
                plane: 0,
                len: 7,
                need: 8
            }
        );
        let narrow = FrameGeometry::new(4, 2, 3, 2, 2);
        assert!(matches!(
            VideoFrame::i420_with_geometry(narrow, 0),
            Err(FrameError::StrideTooSmall { plane: 0, .. })
        ));
        assert!(matches!(
            VideoFrame::i420(0, 2, 0),
            Err(FrameError::ZeroDimension { .. })
        ));
    }

    #[test]
    fn from_planes_checks_i420_layout() {
        let meta = FrameMeta::new(VideoPixelFormat::I420, 0);
        let narrow = VideoFrame::from_planes(
            meta,
            4,
            2,
            [(vec![0; 6], 3), (vec![0; 10], 10), (vec![0; 10], 10)],
        );
        assert_eq!(
            narrow.unwrap_err(),
            FrameError::StrideTooSmall {
                plane: 0,
                stride: 3,
                min: 4
            }
        );
        let short = VideoFrame::from_planes(
            meta,
            4,
            2,
            [(vec![0; 8], 4), (vec![0; 1], 2), (vec![0; 2], 2)],
        );
        assert_eq!(
            short.unwrap_err(),
            FrameError::PlaneTooShort {
                plane: 1,
                len: 1,
                need: 2
            }
        );
        let ok = VideoFrame::from_planes(
            meta,
            4,
            2,
            [(vec![0; 8], 4), (vec![0; 2], 2), (vec![0; 2], 2)],
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn gradient_survives_packed_copy_between_strides() {
        let src_geometry = FrameGeometry::new(5, 3, 7, 4, 6);
        let mut src = VideoFrame::i420_with_geometry(src_geometry, 0).unwrap();
        for (i, plane) in src.planes_mut().iter_mut().enumerate() {
            for (j, byte) in plane.data().iter_mut().enumerate() {
                *byte = (i * 60 + j * 9) as u8;
            }
        }
        let mut packed = vec![0u8; src_geometry.packed_i420_len()];
        src.read_planes_packed(&mut packed).unwrap();

        let dst_geometry = FrameGeometry::new(5, 3, 9, 5, 3);
        let mut dst = VideoFrame::i420_with_geometry(dst_geometry, 0).unwrap();
        for plane in dst.planes_mut().iter_mut() {
            plane.data().fill(0xEE);
        }
        dst.write_planes_packed(&packed).unwrap();

        let mut again = vec![0u8; dst_geometry.packed_i420_len()];
        dst.read_planes_packed(&mut again).unwrap();
        assert_eq!(again, packed);
        let planes = dst.planes();
        for (plane, row_len) in planes.iter().zip([5, 3, 3]) {
            for row in plane.data().chunks(plane.stride()) {
                assert!(row[row_len..].iter().all(|&b| b == 0xEE));
            }
        }
        assert_eq!(planes[0].data()[9..14], packed[5..10]);
    }

    #[test]
    fn non_i420_has_no_geometry() {
        let meta = FrameMeta::new(VideoPixelFormat::Rgba, 0);
        let frame = VideoFrame::from_planes(meta, 2, 2, [(vec![0; 16], 8)]).unwrap();
        assert!(frame.geometry().is_none());
        let mut dst = vec![0; 16];
        assert_eq!(
            frame.read_planes_packed(&mut dst),
            Err(FrameError::UnsupportedFormat(VideoPixelFormat::Rgba))
        );
    }

    #[test]
    fn short_packed_buffer_is_rejected() {
        let frame = VideoFrame::i420(4, 4, 0).unwrap();
        let mut dst = vec![0; 10];
        assert_eq!(
            frame.read_planes_packed(&mut dst),
            Err(FrameError::BufferTooSmall { need: 24, got: 10 })
        );
    }
}
