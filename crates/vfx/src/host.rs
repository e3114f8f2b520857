//! Contract between the host SDK and an extension.

use std::sync::Arc;

use vfx_core::prelude::{BufferKind, VideoFrame, VideoPixelFormat};

use crate::{error::FilterError, provider::EffectsProvider};

/// How a filter receives frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    /// Frames are processed on the host's thread through `adapt_video_frame`.
    #[default]
    Sync,
    /// Frames are queued through `pend_video_frame` and delivered back from a worker thread.
    Async,
}

/// Outcome of a synchronous frame call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    Success,
    /// The frame was not touched; the host should use it as is.
    Bypass,
}

/// Outcome of an asynchronous frame call.
#[derive(Debug)]
pub enum PendResult {
    /// The frame was queued and will come back through the delivery control.
    Success,
    /// The frame was not queued and is handed back untouched.
    Bypass(Option<VideoFrame>),
}

impl PendResult {
    pub fn is_success(&self) -> bool {
        matches!(self, PendResult::Success)
    }
}

/// Host-side sink a filter hands frames and events to.
pub trait FrameDeliveryControl: Send + Sync {
    /// Return a processed frame to the host pipeline.
    fn deliver_video_frame(&self, frame: VideoFrame);

    /// Report an extension event (detection results are sent under the `"data"` key).
    fn post_event(&self, key: &str, value: &str);
}

/// A video filter as the host drives it.
pub trait ExtensionVideoFilter: Send + Sync {
    /// Processing mode and whether the filter wants an isolated thread. Fixed for the filter's
    /// lifetime.
    fn process_mode(&self) -> (ProcessMode, bool);

    fn video_format_wanted(&self) -> (BufferKind, VideoPixelFormat) {
        (BufferKind::MemPixels, VideoPixelFormat::I420)
    }

    fn start(&self, control: Arc<dyn FrameDeliveryControl>) -> Result<(), FilterError>;

    fn stop(&self) -> Result<(), FilterError>;

    fn adapt_video_frame(&self, frame: &mut VideoFrame) -> ProcessResult;

    fn pend_video_frame(&self, frame: Option<VideoFrame>) -> PendResult;

    /// Returns 0 on success or a negative error code.
    fn set_property(&self, key: &str, value: &[u8]) -> i32;

    /// Returns bytes written into `buf`, 0 for unknown keys, or a negative error code.
    fn get_property(&self, key: &str, buf: &mut [u8]) -> i32;

    fn set_enabled(&self, enabled: bool);

    fn is_enabled(&self) -> bool;
}

/// Host service that providers register with, addressed by vendor name.
pub trait ExtensionRegistry: Send + Sync {
    /// Returns 0 on success or a host error code.
    fn register_provider(&self, vendor: &str, provider: Arc<EffectsProvider>) -> i32;

    fn unregister_provider(&self, vendor: &str) -> i32;
}
