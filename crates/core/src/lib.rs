#![doc = include_str!("../README.md")]

pub mod buffer;
pub mod cache;
pub mod format;
pub mod metrics;

pub mod prelude {
    pub use crate::{
        buffer::{FrameError, FrameGeometry, FrameMeta, Plane, PlaneMut, VideoFrame},
        cache::{FrameBufferCache, ScratchBuffers},
        format::{BufferKind, ColorSpace, FourCc, Rotation, VideoPixelFormat},
        metrics::Metrics,
    };
}
