use std::sync::OnceLock;

use parking_lot::Mutex;
use vfx_engine::{session::SessionOptions, settings::DEFAULT_VENDOR};

use crate::host::ProcessMode;

/// Default face detector interval (frames).
pub const DEFAULT_FACE_DETECT_INTERVAL: u32 = 15;
/// Default worker thread name for async filters.
pub const DEFAULT_WORKER_NAME: &str = "vfx-dispatch";
/// Default rolling window for stage timings.
pub const DEFAULT_METRICS_WINDOW: usize = 120;

/// Process-wide knobs for providers and the filters they build.
///
/// # Example
/// ```rust
/// use vfx::prelude::*;
///
/// let config = VfxConfig::new()
///     .process_mode(ProcessMode::Async)
///     .vendor("x")
///     .face_detect_interval(10);
/// assert_eq!(config.session_options().vendor, "x");
/// ```
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct VfxConfig {
    pub process_mode: ProcessMode,
    pub isolated: bool,
    pub vendor: String,
    pub face_detect_interval: u32,
    pub max_faces: Option<u32>,
    pub worker_name: String,
    pub metrics_window: usize,
}

impl Default for VfxConfig {
    fn default() -> Self {
        Self {
            process_mode: ProcessMode::Sync,
            isolated: false,
            vendor: DEFAULT_VENDOR.to_owned(),
            face_detect_interval: DEFAULT_FACE_DETECT_INTERVAL,
            max_faces: None,
            worker_name: DEFAULT_WORKER_NAME.to_owned(),
            metrics_window: DEFAULT_METRICS_WINDOW,
        }
    }
}

impl VfxConfig {
    /// Start building a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_mode(mut self, mode: ProcessMode) -> Self {
        self.process_mode = mode;
        self
    }

    /// Ask the host for a dedicated processing thread.
    pub fn isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }

    /// Vendor name used for registration and configuration key prefixes.
    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    pub fn face_detect_interval(mut self, frames: u32) -> Self {
        self.face_detect_interval = frames;
        self
    }

    pub fn max_faces(mut self, faces: u32) -> Self {
        self.max_faces = Some(faces);
        self
    }

    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn metrics_window(mut self, window: usize) -> Self {
        self.metrics_window = window;
        self
    }

    pub(crate) fn sanitized(mut self) -> Self {
        if self.vendor.is_empty() {
            self.vendor = DEFAULT_VENDOR.to_owned();
        }
        if self.worker_name.is_empty() {
            self.worker_name = DEFAULT_WORKER_NAME.to_owned();
        }
        self.face_detect_interval = self.face_detect_interval.max(1);
        self.metrics_window = self.metrics_window.max(1);
        self
    }

    /// Options for the engine session of one filter.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            vendor: self.vendor.clone(),
            face_detect_interval: self.face_detect_interval,
            max_faces: self.max_faces,
        }
    }

    /// Make this the process-wide default returned by [`current`].
    pub fn apply(self) {
        let lock = CONFIG.get_or_init(|| Mutex::new(VfxConfig::default()));
        *lock.lock() = self.sanitized();
    }
}

static CONFIG: OnceLock<Mutex<VfxConfig>> = OnceLock::new();

/// Process-wide configuration, or defaults when none was applied.
pub fn current() -> VfxConfig {
    CONFIG
        .get()
        .map(|lock| lock.lock().clone())
        .unwrap_or_default()
}
