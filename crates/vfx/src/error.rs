use vfx_engine::{ConfigError, GraphicsError};

use crate::dispatch::DispatchError;

/// Status codes shared with the host SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    NotInitRtcEngine = 1,
    NotInitVideoFilter = 2,
    NotInitPluginManager = 3,
    ErrParameter = 10,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Errors raised by a filter's lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// The provider tore the session down; the filter can no longer process frames.
    #[error("effects session is no longer available")]
    SessionAbsent,
    #[error(transparent)]
    Graphics(#[from] GraphicsError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FilterError {
    /// Code reported to the host.
    pub fn code(&self) -> i32 {
        match self {
            FilterError::SessionAbsent => -ErrorCode::NotInitVideoFilter.code(),
            FilterError::Config(err) => err.code(),
            FilterError::Graphics(_) | FilterError::Dispatch(_) => -ErrorCode::ErrParameter.code(),
        }
    }
}

/// Errors raised by the plugin manager.
///
/// # Example
/// ```rust
/// use vfx::{ErrorCode, PluginError};
///
/// assert_eq!(PluginError::NotLoaded.code(), ErrorCode::NotInitPluginManager.code());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin is not loaded")]
    NotLoaded,
    #[error("plugin is already loaded")]
    AlreadyLoaded,
    /// The host registry refused the call.
    #[error("extension registry returned {0}")]
    Registry(i32),
    #[error("property buffer too small: need {need} bytes")]
    BufferTooSmall { need: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PluginError {
    pub fn code(&self) -> i32 {
        match self {
            PluginError::NotLoaded => ErrorCode::NotInitPluginManager.code(),
            PluginError::AlreadyLoaded => ErrorCode::ErrParameter.code(),
            PluginError::Registry(code) => *code,
            PluginError::BufferTooSmall { .. } => -ErrorCode::ErrParameter.code(),
            PluginError::Config(err) => err.code(),
        }
    }
}
