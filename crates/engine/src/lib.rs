#![doc = include_str!("../README.md")]

pub mod backend;
pub mod env;
pub mod graphics;
pub mod session;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use backend::{EngineCode, EngineResult};
pub use graphics::GraphicsError;
pub use settings::ConfigError;

pub mod prelude {
    pub use crate::{
        backend::{EffectsBackend, EngineCode, RgbaLayout},
        env::{DetachedEnvironment, ExecutionEnvironment, PlatformContext},
        graphics::{GraphicsContextManager, GraphicsError, GraphicsProvider, HeadlessGraphics},
        session::{DetectionReport, EffectsEngineSession, SessionOptions},
        settings::{ComposerNode, ConfigError, DEFAULT_VENDOR, EffectSettings},
    };
}
