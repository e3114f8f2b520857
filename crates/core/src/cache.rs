use std::sync::Arc;

use crate::{buffer::FrameGeometry, metrics::Metrics};

/// YUV and RGBA working memory for one frame round trip.
#[derive(Debug, Default)]
pub struct ScratchBuffers {
    /// Packed I420 side, sized with the source strides.
    pub yuv: Vec<u8>,
    /// RGBA side handed to the effects engine.
    pub rgba: Vec<u8>,
}

/// Scratch buffers keyed by the last-seen [`FrameGeometry`].
///
/// Reused while consecutive frames keep the same width, height and strides; reallocated to the
/// exact new sizes on any difference.
///
/// # Example
/// ```rust
/// use vfx_core::prelude::{FrameBufferCache, FrameGeometry};
///
/// let mut cache = FrameBufferCache::new();
/// let g = FrameGeometry::tight_i420(8, 8);
/// let first = cache.prepare(g).rgba.as_ptr();
/// let second = cache.prepare(g).rgba.as_ptr();
/// assert_eq!(first, second);
/// assert_eq!(cache.metrics().allocations(), 1);
/// assert_eq!(cache.metrics().hits(), 1);
/// ```
#[derive(Debug, Default)]
pub struct FrameBufferCache {
    geometry: Option<FrameGeometry>,
    scratch: ScratchBuffers,
    metrics: Arc<Metrics>,
}

impl FrameBufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return scratch buffers sized for `geometry`.
    pub fn prepare(&mut self, geometry: FrameGeometry) -> &mut ScratchBuffers {
        if self.geometry == Some(geometry) {
            self.metrics.hit();
        } else {
            self.scratch = ScratchBuffers {
                yuv: vec![0; geometry.yuv_len()],
                rgba: vec![0; geometry.rgba_len()],
            };
            self.geometry = Some(geometry);
            self.metrics.alloc();
        }
        &mut self.scratch
    }

    /// Geometry the current buffers were sized for.
    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.geometry
    }

    /// Free both buffers; the next `prepare` allocates again.
    pub fn release(&mut self) {
        if self.geometry.take().is_some() {
            self.scratch = ScratchBuffers::default();
            self.metrics.release();
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reallocates_on_any_geometry_change() {
        let mut cache = FrameBufferCache::new();
        let base = FrameGeometry::new(4, 4, 4, 2, 2);
        cache.prepare(base);

        for changed in [
            FrameGeometry::new(6, 4, 6, 3, 3),
            FrameGeometry::new(6, 6, 6, 3, 3),
            FrameGeometry::new(6, 6, 8, 3, 3),
            FrameGeometry::new(6, 6, 8, 4, 3),
            FrameGeometry::new(6, 6, 8, 4, 4),
        ] {
            let scratch = cache.prepare(changed);
            assert_eq!(scratch.yuv.len(), changed.yuv_len());
            assert_eq!(scratch.rgba.len(), changed.rgba_len());
        }
        assert_eq!(cache.metrics().allocations(), 6);
        assert_eq!(cache.metrics().hits(), 0);
    }

    #[test]
    fn sizes_follow_strides() {
        let mut cache = FrameBufferCache::new();
        let g = FrameGeometry::new(640, 480, 704, 352, 352);
        let scratch = cache.prepare(g);
        assert_eq!(scratch.yuv.len(), 704 * 480 + 352 * 240 * 2);
        assert_eq!(scratch.rgba.len(), 704 * 480 * 4);
    }

    #[test]
    fn release_frees_and_rearms() {
        let mut cache = FrameBufferCache::new();
        let g = FrameGeometry::tight_i420(2, 2);
        cache.prepare(g);
        cache.release();
        cache.release();
        assert!(cache.geometry().is_none());
        assert_eq!(cache.metrics().releases(), 1);
        cache.prepare(g);
        assert_eq!(cache.metrics().allocations(), 2);
    }
}
