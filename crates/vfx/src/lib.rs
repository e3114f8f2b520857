#![doc = include_str!("../README.md")]

pub use vfx_codec as codec;
pub use vfx_core as core;
pub use vfx_engine as engine;

pub mod dispatch;
mod error;
pub mod filter;
pub mod host;
pub mod logging;
pub mod metrics;
pub mod plugin;
mod processor;
pub mod provider;
pub mod tunables;

pub use error::{ErrorCode, FilterError, PluginError};

pub mod prelude {
    pub use crate::dispatch::{AsyncDispatchWorker, DispatchError, WorkerState};
    pub use crate::filter::FrameFilterAdapter;
    pub use crate::host::{
        ExtensionRegistry, ExtensionVideoFilter, FrameDeliveryControl, PendResult, ProcessMode,
        ProcessResult,
    };
    pub use crate::metrics::{PipelineMetrics, Stage, StageSummary};
    pub use crate::plugin::PluginManager;
    pub use crate::provider::{EffectsProvider, ExtensionInfo, ProviderInfo};
    pub use crate::tunables::VfxConfig;
    pub use crate::{ErrorCode, FilterError, PluginError};
    pub use vfx_core::prelude::{BufferKind, FrameGeometry, FrameMeta, VideoFrame, VideoPixelFormat};
    pub use vfx_engine::prelude::*;
}
