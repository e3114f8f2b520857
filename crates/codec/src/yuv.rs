//! Tightly packed I420 <-> RGBA conversion.
//!
//! Packed I420 means the `Y` plane (`width * height`) followed by `U` and `V`
//! (`ceil(width / 2) * ceil(height / 2)` each) with no row padding. RGBA rows are `width * 4` bytes.

use rayon::prelude::*;
use vfx_core::prelude::ColorSpace;
use yuvutils_rs::{
    BufferStoreMut, YuvConversionMode, YuvPlanarImage, YuvPlanarImageMut, YuvRange,
    YuvStandardMatrix,
};

use crate::ConvertError;

#[derive(Clone, Copy)]
struct Coeffs {
    // yuv -> rgb, 8.8 fixed point
    r_v: i32,
    g_u: i32,
    g_v: i32,
    b_u: i32,
    // rgb -> yuv rows, 8.8 fixed point
    y: [i32; 3],
    u: [i32; 3],
    v: [i32; 3],
    full_range: bool,
}

const BT601_FULL: Coeffs = Coeffs {
    r_v: 359,
    g_u: 88,
    g_v: 183,
    b_u: 454,
    y: [77, 150, 29],
    u: [-43, -85, 128],
    v: [128, -107, -21],
    full_range: true,
};

const BT601: Coeffs = Coeffs {
    r_v: 409,
    g_u: 100,
    g_v: 208,
    b_u: 516,
    y: [66, 129, 25],
    u: [-38, -74, 112],
    v: [112, -94, -18],
    full_range: false,
};

const BT709: Coeffs = Coeffs {
    r_v: 459,
    g_u: 55,
    g_v: 136,
    b_u: 541,
    y: [47, 157, 16],
    u: [-26, -86, 112],
    v: [112, -102, -10],
    full_range: false,
};

#[inline(always)]
fn coeffs_for(color: ColorSpace) -> Coeffs {
    match color {
        ColorSpace::Bt601Full => BT601_FULL,
        ColorSpace::Bt601 => BT601,
        ColorSpace::Bt709 => BT709,
    }
}

#[inline(always)]
fn map_colorspace(color: ColorSpace) -> (YuvRange, YuvStandardMatrix) {
    match color {
        ColorSpace::Bt601Full => (YuvRange::Full, YuvStandardMatrix::Bt601),
        ColorSpace::Bt601 => (YuvRange::Limited, YuvStandardMatrix::Bt601),
        ColorSpace::Bt709 => (YuvRange::Limited, YuvStandardMatrix::Bt709),
    }
}

#[inline(always)]
fn yuv_to_rgb(y: i32, u: i32, v: i32, k: &Coeffs) -> [u8; 3] {
    let d = u - 128;
    let e = v - 128;
    let (c, scale) = if k.full_range {
        (y.max(0), 256)
    } else {
        ((y - 16).max(0), 298)
    };
    let r = (scale * c + k.r_v * e + 128) >> 8;
    let g = (scale * c - k.g_u * d - k.g_v * e + 128) >> 8;
    let b = (scale * c + k.b_u * d + 128) >> 8;
    [
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    ]
}

#[inline(always)]
fn luma(rgb: [i32; 3], k: &Coeffs) -> u8 {
    let offset = if k.full_range { 0 } else { 16 };
    let y = ((k.y[0] * rgb[0] + k.y[1] * rgb[1] + k.y[2] * rgb[2] + 128) >> 8) + offset;
    y.clamp(0, 255) as u8
}

#[inline(always)]
fn chroma(rgb: [i32; 3], row: [i32; 3]) -> u8 {
    let c = ((row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2] + 128) >> 8) + 128;
    c.clamp(0, 255) as u8
}

struct Layout {
    width: usize,
    height: usize,
    chroma_width: usize,
    chroma_height: usize,
}

impl Layout {
    fn new(width: u32, height: u32) -> Result<Self, ConvertError> {
        if width == 0 || height == 0 {
            return Err(ConvertError::ZeroDimension { width, height });
        }
        Ok(Self {
            width: width as usize,
            height: height as usize,
            chroma_width: width.div_ceil(2) as usize,
            chroma_height: height.div_ceil(2) as usize,
        })
    }

    fn luma_len(&self) -> usize {
        self.width * self.height
    }

    fn chroma_len(&self) -> usize {
        self.chroma_width * self.chroma_height
    }

    fn yuv_len(&self) -> usize {
        self.luma_len() + 2 * self.chroma_len()
    }

    fn rgba_stride(&self) -> usize {
        self.width * 4
    }

    fn rgba_len(&self) -> usize {
        self.rgba_stride() * self.height
    }
}

fn check_len(buffer: &'static str, got: usize, need: usize) -> Result<(), ConvertError> {
    if got < need {
        return Err(ConvertError::BufferTooSmall { buffer, need, got });
    }
    Ok(())
}

/// Convert packed I420 into RGBA using full-range BT.601, the engine's expected layout.
///
/// No rotation is applied; the output has the same orientation as the input.
pub fn yuv420_to_rgba(
    yuv: &[u8],
    rgba: &mut [u8],
    width: u32,
    height: u32,
) -> Result<(), ConvertError> {
    yuv420_to_rgba_with(yuv, rgba, width, height, ColorSpace::Bt601Full)
}

/// Convert packed I420 into RGBA with explicit coefficients.
pub fn yuv420_to_rgba_with(
    yuv: &[u8],
    rgba: &mut [u8],
    width: u32,
    height: u32,
    color: ColorSpace,
) -> Result<(), ConvertError> {
    let layout = Layout::new(width, height)?;
    check_len("yuv", yuv.len(), layout.yuv_len())?;
    check_len("rgba", rgba.len(), layout.rgba_len())?;

    let (y_plane, rest) = yuv.split_at(layout.luma_len());
    let (u_plane, rest) = rest.split_at(layout.chroma_len());
    let v_plane = &rest[..layout.chroma_len()];
    let dst = &mut rgba[..layout.rgba_len()];

    let planar = YuvPlanarImage {
        y_plane,
        y_stride: layout.width as u32,
        u_plane,
        u_stride: layout.chroma_width as u32,
        v_plane,
        v_stride: layout.chroma_width as u32,
        width,
        height,
    };
    let (range, matrix) = map_colorspace(color);
    if yuvutils_rs::yuv420_to_rgba(&planar, dst, layout.rgba_stride() as u32, range, matrix)
        .is_err()
    {
        yuv420_to_rgba_scalar(y_plane, u_plane, v_plane, dst, &layout, color);
    }
    Ok(())
}

fn yuv420_to_rgba_scalar(
    y_plane: &[u8],
    u_plane: &[u8],
    v_plane: &[u8],
    dst: &mut [u8],
    layout: &Layout,
    color: ColorSpace,
) {
    let k = coeffs_for(color);
    let width = layout.width;
    let cw = layout.chroma_width;
    dst.par_chunks_mut(layout.rgba_stride())
        .enumerate()
        .for_each(|(row, dst_line)| {
            let y_line = &y_plane[row * width..][..width];
            let u_line = &u_plane[(row / 2) * cw..][..cw];
            let v_line = &v_plane[(row / 2) * cw..][..cw];
            for (x, px) in dst_line.chunks_exact_mut(4).enumerate() {
                let [r, g, b] = yuv_to_rgb(
                    y_line[x] as i32,
                    u_line[x / 2] as i32,
                    v_line[x / 2] as i32,
                    &k,
                );
                px.copy_from_slice(&[r, g, b, 255]);
            }
        });
}

/// Convert RGBA back into packed I420 using full-range BT.601.
///
/// Chroma is subsampled over each 2x2 block. Alpha is ignored.
pub fn rgba_to_yuv420(
    rgba: &[u8],
    yuv: &mut [u8],
    width: u32,
    height: u32,
) -> Result<(), ConvertError> {
    rgba_to_yuv420_with(rgba, yuv, width, height, ColorSpace::Bt601Full)
}

/// Convert RGBA into packed I420 with explicit coefficients.
pub fn rgba_to_yuv420_with(
    rgba: &[u8],
    yuv: &mut [u8],
    width: u32,
    height: u32,
    color: ColorSpace,
) -> Result<(), ConvertError> {
    let layout = Layout::new(width, height)?;
    check_len("rgba", rgba.len(), layout.rgba_len())?;
    check_len("yuv", yuv.len(), layout.yuv_len())?;

    let src = &rgba[..layout.rgba_len()];
    let (range, matrix) = map_colorspace(color);
    let encoded = {
        let (y_plane, rest) = yuv[..layout.yuv_len()].split_at_mut(layout.luma_len());
        let (u_plane, v_plane) = rest.split_at_mut(layout.chroma_len());
        let mut planar = YuvPlanarImageMut {
            y_plane: BufferStoreMut::Borrowed(y_plane),
            y_stride: layout.width as u32,
            u_plane: BufferStoreMut::Borrowed(u_plane),
            u_stride: layout.chroma_width as u32,
            v_plane: BufferStoreMut::Borrowed(v_plane),
            v_stride: layout.chroma_width as u32,
            width,
            height,
        };
        yuvutils_rs::rgba_to_yuv420(
            &mut planar,
            src,
            layout.rgba_stride() as u32,
            range,
            matrix,
            YuvConversionMode::Balanced,
        )
    };
    if encoded.is_err() {
        let (y_plane, rest) = yuv[..layout.yuv_len()].split_at_mut(layout.luma_len());
        let (u_plane, v_plane) = rest.split_at_mut(layout.chroma_len());
        rgba_to_yuv420_scalar(src, y_plane, u_plane, v_plane, &layout, color);
    }
    Ok(())
}

/// Chroma is the average of each 2x2 block; edge blocks average the pixels that exist.
fn rgba_to_yuv420_scalar(
    src: &[u8],
    y_plane: &mut [u8],
    u_plane: &mut [u8],
    v_plane: &mut [u8],
    layout: &Layout,
    color: ColorSpace,
) {
    let k = coeffs_for(color);
    let stride = layout.rgba_stride();

    y_plane
        .par_chunks_mut(layout.width)
        .zip(src.par_chunks(stride))
        .for_each(|(y_line, rgba_line)| {
            for (y, px) in y_line.iter_mut().zip(rgba_line.chunks_exact(4)) {
                *y = luma([px[0] as i32, px[1] as i32, px[2] as i32], &k);
            }
        });

    u_plane
        .par_chunks_mut(layout.chroma_width)
        .zip(v_plane.par_chunks_mut(layout.chroma_width))
        .enumerate()
        .for_each(|(crow, (u_line, v_line))| {
            let top = crow * 2;
            let rows = if top + 1 < layout.height { 2 } else { 1 };
            for cx in 0..layout.chroma_width {
                let left = cx * 2;
                let cols = if left + 1 < layout.width { 2 } else { 1 };
                let mut sum = [0i32; 3];
                for dy in 0..rows {
                    let line = &src[(top + dy) * stride..];
                    for dx in 0..cols {
                        let px = &line[(left + dx) * 4..][..3];
                        sum[0] += px[0] as i32;
                        sum[1] += px[1] as i32;
                        sum[2] += px[2] as i32;
                    }
                }
                let n = (rows * cols) as i32;
                let avg = sum.map(|s| (s + n / 2) / n);
                u_line[cx] = chroma(avg, k.u);
                v_line[cx] = chroma(avg, k.v);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed_i420(width: u32, height: u32, y: u8, u: u8, v: u8) -> Vec<u8> {
        let layout = Layout::new(width, height).unwrap();
        let mut buf = vec![y; layout.luma_len()];
        buf.extend(std::iter::repeat_n(u, layout.chroma_len()));
        buf.extend(std::iter::repeat_n(v, layout.chroma_len()));
        buf
    }

    fn assert_close(a: &[u8], b: &[u8], tol: u8) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!(x.abs_diff(*y) <= tol, "byte {i}: {x} vs {y}");
        }
    }

    #[test]
    fn round_trip_within_rounding() {
        for (w, h) in [(16, 8), (7, 5)] {
            let src = packed_i420(w, h, 120, 90, 170);
            let mut rgba = vec![0u8; (w * h * 4) as usize];
            yuv420_to_rgba(&src, &mut rgba, w, h).unwrap();
            let mut back = vec![0u8; src.len()];
            rgba_to_yuv420(&rgba, &mut back, w, h).unwrap();
            assert_close(&src, &back, 2);
        }
    }

    #[test]
    fn gradient_round_trip_keeps_subsampled_chroma() {
        let (w, h) = (9u32, 7u32);
        let layout = Layout::new(w, h).unwrap();
        let mut src = Vec::with_capacity(layout.yuv_len());
        for row in 0..layout.height {
            src.extend((0..layout.width).map(|x| (60 + x * 9 + row * 5) as u8));
        }
        for base in [100usize, 110] {
            for row in 0..layout.chroma_height {
                src.extend((0..layout.chroma_width).map(|x| (base + x * 6 + row * 4) as u8));
            }
        }
        assert_eq!(src.len(), layout.yuv_len());

        let mut rgba = vec![0u8; layout.rgba_len()];
        yuv420_to_rgba(&src, &mut rgba, w, h).unwrap();
        assert_ne!(rgba[..4], rgba[4..8]);
        let mut back = vec![0u8; src.len()];
        rgba_to_yuv420(&rgba, &mut back, w, h).unwrap();
        assert_close(&src, &back, 3);
    }

    #[test]
    fn scalar_fallback_matches_known_values() {
        let layout = Layout::new(2, 2).unwrap();
        let src = packed_i420(2, 2, 120, 90, 170);
        let (y, rest) = src.split_at(4);
        let (u, v) = rest.split_at(1);
        let mut rgba = vec![0u8; 16];
        yuv420_to_rgba_scalar(y, u, v, &mut rgba, &layout, ColorSpace::Bt601Full);
        assert_eq!(&rgba[..4], &[179, 103, 53, 255]);
        assert_eq!(&rgba[12..], &[179, 103, 53, 255]);

        let mut back = vec![0u8; 6];
        let (by, rest) = back.split_at_mut(4);
        let (bu, bv) = rest.split_at_mut(1);
        rgba_to_yuv420_scalar(&rgba, by, bu, bv, &layout, ColorSpace::Bt601Full);
        assert_eq!(back, src);
    }

    #[test]
    fn scalar_chroma_averages_edge_blocks() {
        let layout = Layout::new(3, 1).unwrap();
        let mut rgba = [255u8, 0, 0, 255].repeat(2);
        rgba.extend([0u8, 0, 255, 255]);
        let (mut y, mut u, mut v) = (vec![0u8; 3], vec![0u8; 2], vec![0u8; 2]);
        rgba_to_yuv420_scalar(&rgba, &mut y, &mut u, &mut v, &layout, ColorSpace::Bt601Full);
        assert_eq!(y, vec![77, 77, 29]);
        assert!(u[0] < 128 && u[1] > 128);
        assert!(v[0] > 128 && v[1] < 128);
    }

    #[test]
    fn gray_maps_to_neutral_chroma() {
        let rgba: Vec<u8> = [200u8, 200, 200, 255].repeat(9);
        let mut yuv = vec![0u8; 9 + 2 * 4];
        rgba_to_yuv420(&rgba, &mut yuv, 3, 3).unwrap();
        assert!(yuv[..9].iter().all(|&y| y.abs_diff(200) <= 1));
        assert!(yuv[9..].iter().all(|&c| c.abs_diff(128) <= 1));
    }

    #[test]
    fn limited_range_black_is_sixteen() {
        let rgba = [0u8, 0, 0, 255].repeat(4);
        let mut yuv = vec![0u8; 6];
        rgba_to_yuv420_with(&rgba, &mut yuv, 2, 2, ColorSpace::Bt601).unwrap();
        assert!(yuv[..4].iter().all(|&y| y.abs_diff(16) <= 1));
        assert!(yuv[4..].iter().all(|&c| c.abs_diff(128) <= 1));
    }

    #[test]
    fn rejects_short_buffers() {
        let yuv = vec![0u8; 5];
        let mut rgba = vec![0u8; 16];
        assert_eq!(
            yuv420_to_rgba(&yuv, &mut rgba, 2, 2),
            Err(ConvertError::BufferTooSmall {
                buffer: "yuv",
                need: 6,
                got: 5
            })
        );
        assert_eq!(
            rgba_to_yuv420(&rgba, &mut vec![0u8; 6], 0, 2),
            Err(ConvertError::ZeroDimension {
                width: 0,
                height: 2
            })
        );
    }
}
