//! Extension provider: metadata, filter creation and configuration fan-out.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use vfx_engine::{
    ConfigError,
    prelude::{
        DetachedEnvironment, EffectSettings, EffectsBackend, ExecutionEnvironment,
        GraphicsProvider,
    },
};

use crate::{
    filter::{FrameFilterAdapter, PROPERTY_ENABLED, PROPERTY_PARAMETERS},
    metrics::PipelineMetrics,
    processor::FrameProcessor,
    tunables::{self, VfxConfig},
};

/// Name of the single extension this provider offers.
pub const EXTENSION_NAME: &str = "Beauty";

const PROVIDER_VENDOR: &str = "ByteDance";
const PROVIDER_NAME: &str = "ByteDance Extension Provider";
const PROVIDER_VERSION: &str = "1.0.0";
const FRAMEWORK_VERSION: &str = "1.0.0";

/// Where in the host pipeline filters run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPosition {
    PreEncode,
    PostCapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    VideoPreProcessingFilter,
}

/// One entry of [`EffectsProvider::enumerate_extensions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub name: &'static str,
    pub kind: ExtensionKind,
}

/// Identity the provider reports to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub vendor: &'static str,
    pub name: &'static str,
    pub version: &'static str,
    pub extension_framework_version: &'static str,
    pub position: FilterPosition,
}

/// Builds filters, each with its own engine session, and keeps their configuration in step.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use vfx::prelude::*;
/// # #[cfg(feature = "test-support")]
/// # {
/// use vfx_engine::{prelude::HeadlessGraphics, testing::FakeBackend};
///
/// let provider = EffectsProvider::new(FakeBackend::default().shared(), Arc::new(HeadlessGraphics));
/// provider
///     .set_parameters(r#"{"plugin.bytedance.aiEffectEnabled": true}"#)
///     .unwrap();
/// let filter = provider.create_video_filter("Beauty").unwrap();
/// assert_eq!(provider.live_filters(), 1);
/// assert!(filter.is_enabled());
/// # }
/// ```
pub struct EffectsProvider {
    backend: Arc<dyn EffectsBackend>,
    graphics: Arc<dyn GraphicsProvider>,
    env: Arc<dyn ExecutionEnvironment>,
    config: VfxConfig,
    template: Mutex<EffectSettings>,
    processors: Mutex<Vec<Arc<FrameProcessor>>>,
    enabled: AtomicBool,
}

impl EffectsProvider {
    /// Provider using the process-wide [`VfxConfig`] and no native environment.
    pub fn new(backend: Arc<dyn EffectsBackend>, graphics: Arc<dyn GraphicsProvider>) -> Self {
        Self {
            backend,
            graphics,
            env: Arc::new(DetachedEnvironment),
            config: tunables::current(),
            template: Mutex::new(EffectSettings::default()),
            processors: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn with_environment(mut self, env: Arc<dyn ExecutionEnvironment>) -> Self {
        self.env = env;
        self
    }

    /// Replace the configuration; empty names and zero intervals fall back to their defaults.
    pub fn with_config(mut self, config: VfxConfig) -> Self {
        self.config = config.sanitized();
        self
    }

    pub fn config(&self) -> &VfxConfig {
        &self.config
    }

    /// Vendor name the provider registers under and prefixes configuration keys with.
    pub fn vendor(&self) -> &str {
        &self.config.vendor
    }

    pub fn metadata(&self) -> ProviderInfo {
        ProviderInfo {
            vendor: PROVIDER_VENDOR,
            name: PROVIDER_NAME,
            version: PROVIDER_VERSION,
            extension_framework_version: FRAMEWORK_VERSION,
            position: FilterPosition::PreEncode,
        }
    }

    pub fn enumerate_extensions(&self) -> Vec<ExtensionInfo> {
        vec![ExtensionInfo {
            name: EXTENSION_NAME,
            kind: ExtensionKind::VideoPreProcessingFilter,
        }]
    }

    /// Build a filter with a fresh session carrying every configuration applied so far.
    ///
    /// Returns `None` for extension names this provider does not offer.
    pub fn create_video_filter(&self, name: &str) -> Option<Arc<FrameFilterAdapter>> {
        if name != EXTENSION_NAME {
            warn!(name, "unknown extension requested");
            return None;
        }
        let processor = Arc::new(FrameProcessor::new(
            self.backend.clone(),
            self.env.clone(),
            self.graphics.clone(),
            self.config.session_options(),
            PipelineMetrics::new(self.config.metrics_window),
        ));
        let replay = self.template.lock().to_document(&self.config.vendor);
        if let Err(err) = processor.apply_configuration(&replay.to_string()) {
            warn!(code = err.code(), %err, "configuration replay rejected");
        }
        processor.set_enabled(self.is_enabled());

        let filter = Arc::new(FrameFilterAdapter::new(&processor, &self.config));
        let mut processors = self.processors.lock();
        processors.retain(|p| !p.is_retired());
        processors.push(processor);
        info!(name, live = processors.len(), "video filter created");
        Some(filter)
    }

    /// Number of filters whose sessions are still alive.
    pub fn live_filters(&self) -> usize {
        let mut processors = self.processors.lock();
        processors.retain(|p| !p.is_retired());
        processors.len()
    }

    /// Apply a configuration document to every live session and remember it for later ones.
    ///
    /// Keys are applied in a fixed order; on error the keys before the failing one stay applied.
    pub fn set_parameters(&self, document: &str) -> Result<(), ConfigError> {
        let result = self
            .template
            .lock()
            .apply_document(document, &self.config.vendor);
        for processor in self.processors.lock().iter().filter(|p| !p.is_retired()) {
            // Each session reaches the same state as the template, error included.
            if let Err(err) = processor.apply_configuration(document) {
                warn!(code = err.code(), %err, "session configuration rejected");
            }
        }
        if let Err(err) = &result {
            warn!(code = err.code(), %err, "provider configuration rejected");
        }
        result
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        for processor in self.processors.lock().iter() {
            processor.set_enabled(enabled);
        }
        debug!(enabled, "provider enable flag changed");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Apply a provider-level property. Unknown keys are ignored.
    pub fn set_property(&self, key: &str, value: &[u8]) -> Result<(), ConfigError> {
        match key {
            PROPERTY_PARAMETERS => {
                let document = std::str::from_utf8(value)
                    .map_err(|err| ConfigError::Parse(err.to_string()))?;
                self.set_parameters(document)
            }
            PROPERTY_ENABLED => {
                let value: serde_json::Value = serde_json::from_slice(value)
                    .map_err(|err| ConfigError::Parse(err.to_string()))?;
                let enabled = value.as_bool().ok_or_else(|| ConfigError::TypeMismatch {
                    key: PROPERTY_ENABLED.to_owned(),
                    expected: "a bool",
                })?;
                self.set_enabled(enabled);
                Ok(())
            }
            _ => {
                debug!(key, "ignoring unknown provider property");
                Ok(())
            }
        }
    }

    /// The merged configuration document. `None` for keys the provider does not expose.
    pub fn get_property(&self, key: &str) -> Option<String> {
        match key {
            PROPERTY_PARAMETERS => Some(
                self.template
                    .lock()
                    .to_document(&self.config.vendor)
                    .to_string(),
            ),
            PROPERTY_ENABLED => Some(self.is_enabled().to_string()),
            _ => None,
        }
    }

    /// Release every live session. Filters built earlier report [`FilterError::SessionAbsent`]
    /// from then on.
    ///
    /// [`FilterError::SessionAbsent`]: crate::FilterError::SessionAbsent
    pub fn shutdown(&self) {
        let processors = std::mem::take(&mut *self.processors.lock());
        let count = processors.len();
        for processor in processors {
            processor.release();
            processor.retire();
        }
        info!(sessions = count, "provider shut down");
    }
}

impl Drop for EffectsProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::FilterError,
        filter::tests::RecordingControl,
        host::{ExtensionVideoFilter, ProcessMode},
    };
    use vfx_engine::testing::{FakeBackend, FakeGraphics, HandleKind};

    fn provider(backend: &FakeBackend) -> EffectsProvider {
        EffectsProvider::new(backend.shared(), FakeGraphics::default().shared())
            .with_config(VfxConfig::new().process_mode(ProcessMode::Sync))
    }

    #[test]
    fn metadata_and_extensions() {
        let provider = provider(&FakeBackend::default());
        let info = provider.metadata();
        assert_eq!(info.vendor, "ByteDance");
        assert_eq!(info.version, "1.0.0");
        assert_eq!(info.position, FilterPosition::PreEncode);
        assert_eq!(
            provider.enumerate_extensions(),
            vec![ExtensionInfo {
                name: "Beauty",
                kind: ExtensionKind::VideoPreProcessingFilter,
            }]
        );
        assert!(provider.create_video_filter("Sketch").is_none());
    }

    #[test]
    fn new_filters_replay_earlier_parameters() {
        let provider = provider(&FakeBackend::default());
        let err = provider
            .set_parameters(
                r#"{"plugin.bytedance.licensePath": "/lic", "plugin.bytedance.aiEffectEnabled": 3}"#,
            )
            .unwrap_err();
        assert_eq!(err.code(), -101);

        let filter = provider.create_video_filter(EXTENSION_NAME).unwrap();
        let mut buf = vec![0u8; 4096];
        let n = filter.get_property(PROPERTY_PARAMETERS, &mut buf);
        let snapshot: serde_json::Value = serde_json::from_slice(&buf[..n as usize]).unwrap();
        assert_eq!(snapshot["plugin.bytedance.licensePath"], "/lic");
        assert_eq!(snapshot["plugin.bytedance.aiEffectEnabled"], false);
    }

    #[test]
    fn parameters_reach_live_filters_independently() {
        let backend = FakeBackend::default();
        let provider = provider(&backend);
        let first = provider.create_video_filter(EXTENSION_NAME).unwrap();
        let second = provider.create_video_filter(EXTENSION_NAME).unwrap();
        provider
            .set_parameters(r#"{"plugin.bytedance.aiEffectEnabled": true}"#)
            .unwrap();

        for filter in [&first, &second] {
            filter.start(Arc::new(RecordingControl::default())).unwrap();
            let mut frame = vfx_core::prelude::VideoFrame::i420(2, 2, 0).unwrap();
            filter.adapt_video_frame(&mut frame);
        }
        assert_eq!(backend.stats().created(HandleKind::Effect), 2);
        assert_eq!(backend.stats().processed(), 2);

        drop(first);
        assert_eq!(provider.live_filters(), 1);
        assert_eq!(backend.stats().dropped(HandleKind::Effect), 1);
    }

    #[test]
    fn shutdown_leaves_filters_without_session() {
        let backend = FakeBackend::default();
        let provider = provider(&backend);
        let filter = provider.create_video_filter(EXTENSION_NAME).unwrap();
        provider.shutdown();
        assert_eq!(provider.live_filters(), 0);
        let err = filter
            .start(Arc::new(RecordingControl::default()))
            .unwrap_err();
        assert!(matches!(err, FilterError::SessionAbsent));
    }

    #[test]
    fn supplied_config_is_sanitized() {
        let provider = EffectsProvider::new(
            FakeBackend::default().shared(),
            FakeGraphics::default().shared(),
        )
        .with_config(VfxConfig {
            vendor: String::new(),
            worker_name: String::new(),
            face_detect_interval: 0,
            metrics_window: 0,
            ..VfxConfig::new()
        });
        let config = provider.config();
        assert_eq!(config.vendor, vfx_engine::settings::DEFAULT_VENDOR);
        assert_eq!(config.worker_name, crate::tunables::DEFAULT_WORKER_NAME);
        assert_eq!(config.face_detect_interval, 1);
        assert_eq!(config.metrics_window, 1);
        assert_eq!(provider.vendor(), vfx_engine::settings::DEFAULT_VENDOR);
    }

    #[test]
    fn rejected_parameters_still_reach_live_sessions() {
        let provider = provider(&FakeBackend::default());
        let filter = provider.create_video_filter(EXTENSION_NAME).unwrap();
        let err = provider
            .set_parameters(
                r#"{"plugin.bytedance.licensePath": "/lic", "plugin.bytedance.aiEffectEnabled": 3}"#,
            )
            .unwrap_err();
        assert_eq!(err.code(), -101);

        let mut buf = vec![0u8; 4096];
        let n = filter.get_property(PROPERTY_PARAMETERS, &mut buf);
        let snapshot: serde_json::Value = serde_json::from_slice(&buf[..n as usize]).unwrap();
        assert_eq!(snapshot["plugin.bytedance.licensePath"], "/lic");
    }

    #[test]
    fn enable_flag_is_broadcast() {
        let provider = provider(&FakeBackend::default());
        let filter = provider.create_video_filter(EXTENSION_NAME).unwrap();
        provider.set_property(PROPERTY_ENABLED, b"false").unwrap();
        assert!(!filter.is_enabled());
        let late = provider.create_video_filter(EXTENSION_NAME).unwrap();
        assert!(!late.is_enabled());
        assert_eq!(provider.get_property(PROPERTY_ENABLED).as_deref(), Some("false"));
        assert_eq!(provider.get_property("other"), None);
    }
}
