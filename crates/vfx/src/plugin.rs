//! Registration of the provider with the host and the plugin-level control surface.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{
    error::PluginError, host::ExtensionRegistry, logging, provider::EffectsProvider,
};

struct Loaded {
    registry: Arc<dyn ExtensionRegistry>,
    provider: Arc<EffectsProvider>,
}

/// Loads one [`EffectsProvider`] into a host registry and forwards control calls to it.
///
/// Every call made while nothing is loaded fails with [`PluginError::NotLoaded`].
///
/// # Example
/// ```rust
/// use vfx::prelude::*;
///
/// let manager = PluginManager::new();
/// let err = manager.set_parameters("{}").unwrap_err();
/// assert_eq!(err.code(), 3);
/// assert!(!manager.is_enable());
/// ```
#[derive(Default)]
pub struct PluginManager {
    loaded: Mutex<Option<Loaded>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }

    /// The loaded provider, if any.
    pub fn provider(&self) -> Option<Arc<EffectsProvider>> {
        self.loaded
            .lock()
            .as_ref()
            .map(|loaded| loaded.provider.clone())
    }

    fn with_provider<T>(
        &self,
        f: impl FnOnce(&EffectsProvider) -> Result<T, PluginError>,
    ) -> Result<T, PluginError> {
        let provider = self.provider().ok_or(PluginError::NotLoaded)?;
        f(&provider)
    }

    /// Install logging and register `provider` under its vendor name.
    pub fn load_plugin(
        &self,
        registry: Arc<dyn ExtensionRegistry>,
        provider: EffectsProvider,
    ) -> Result<(), PluginError> {
        logging::init();
        let mut loaded = self.loaded.lock();
        if loaded.is_some() {
            return Err(PluginError::AlreadyLoaded);
        }
        let provider = Arc::new(provider);
        let code = registry.register_provider(provider.vendor(), provider.clone());
        if code != 0 {
            warn!(code, vendor = provider.vendor(), "provider registration refused");
            return Err(PluginError::Registry(code));
        }
        info!(vendor = provider.vendor(), "plugin loaded");
        *loaded = Some(Loaded { registry, provider });
        Ok(())
    }

    /// Deregister the provider and release its sessions.
    pub fn unload_plugin(&self) -> Result<(), PluginError> {
        let Loaded { registry, provider } =
            self.loaded.lock().take().ok_or(PluginError::NotLoaded)?;
        let code = registry.unregister_provider(provider.vendor());
        provider.shutdown();
        if code != 0 {
            warn!(code, vendor = provider.vendor(), "provider deregistration refused");
            return Err(PluginError::Registry(code));
        }
        info!(vendor = provider.vendor(), "plugin unloaded");
        Ok(())
    }

    pub fn set_parameters(&self, document: &str) -> Result<(), PluginError> {
        self.with_provider(|provider| Ok(provider.set_parameters(document)?))
    }

    pub fn set_enable(&self, enabled: bool) -> Result<(), PluginError> {
        self.with_provider(|provider| {
            provider.set_enabled(enabled);
            Ok(())
        })
    }

    /// `false` when nothing is loaded.
    pub fn is_enable(&self) -> bool {
        self.provider().is_some_and(|provider| provider.is_enabled())
    }

    pub fn set_property(&self, key: &str, value: &[u8]) -> Result<(), PluginError> {
        self.with_provider(|provider| Ok(provider.set_property(key, value)?))
    }

    /// Copy a provider property into `buf` and return the bytes written; 0 for unknown keys.
    pub fn get_property(&self, key: &str, buf: &mut [u8]) -> Result<usize, PluginError> {
        self.with_provider(|provider| {
            let Some(value) = provider.get_property(key) else {
                return Ok(0);
            };
            let bytes = value.as_bytes();
            if buf.len() < bytes.len() {
                return Err(PluginError::BufferTooSmall { need: bytes.len() });
            }
            buf[..bytes.len()].copy_from_slice(bytes);
            Ok(bytes.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorCode, provider::EXTENSION_NAME};
    use vfx_engine::testing::{FakeBackend, FakeGraphics};

    #[derive(Default)]
    struct Registry {
        registered: Mutex<Vec<String>>,
        refuse: Option<i32>,
    }

    impl ExtensionRegistry for Registry {
        fn register_provider(&self, vendor: &str, _provider: Arc<EffectsProvider>) -> i32 {
            if let Some(code) = self.refuse {
                return code;
            }
            self.registered.lock().push(vendor.to_owned());
            0
        }

        fn unregister_provider(&self, vendor: &str) -> i32 {
            self.registered.lock().retain(|v| v != vendor);
            0
        }
    }

    fn provider() -> EffectsProvider {
        EffectsProvider::new(
            FakeBackend::default().shared(),
            FakeGraphics::default().shared(),
        )
    }

    #[test]
    fn calls_before_load_return_sentinel() {
        let manager = PluginManager::new();
        let sentinel = ErrorCode::NotInitPluginManager.code();
        assert_eq!(manager.set_parameters("{}").unwrap_err().code(), sentinel);
        assert_eq!(manager.set_enable(true).unwrap_err().code(), sentinel);
        assert_eq!(manager.set_property("k", b"v").unwrap_err().code(), sentinel);
        assert_eq!(
            manager.get_property("k", &mut [0u8; 8]).unwrap_err().code(),
            sentinel
        );
        assert_eq!(manager.unload_plugin().unwrap_err().code(), sentinel);
        assert!(!manager.is_enable());
    }

    #[test]
    fn load_registers_under_vendor() {
        let registry = Arc::new(Registry::default());
        let manager = PluginManager::new();
        manager.load_plugin(registry.clone(), provider()).unwrap();
        assert_eq!(*registry.registered.lock(), vec!["bytedance".to_owned()]);
        assert!(matches!(
            manager.load_plugin(registry.clone(), provider()),
            Err(PluginError::AlreadyLoaded)
        ));

        manager
            .set_parameters(r#"{"plugin.bytedance.modelDir": "/models"}"#)
            .unwrap();
        assert_eq!(manager.set_parameters("[]").unwrap_err().code(), -100);
        manager.set_enable(false).unwrap();
        assert!(!manager.is_enable());

        let mut small = [0u8; 2];
        assert!(matches!(
            manager.get_property("parameters", &mut small),
            Err(PluginError::BufferTooSmall { .. })
        ));
        let mut buf = vec![0u8; 4096];
        let n = manager.get_property("parameters", &mut buf).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(doc["plugin.bytedance.modelDir"], "/models");

        let filter = manager
            .provider()
            .unwrap()
            .create_video_filter(EXTENSION_NAME)
            .unwrap();
        manager.unload_plugin().unwrap();
        assert!(registry.registered.lock().is_empty());
        assert!(!manager.is_loaded());
        assert!(matches!(
            filter.apply_configuration("{}"),
            Err(crate::error::FilterError::SessionAbsent)
        ));
    }

    #[test]
    fn refused_registration_keeps_plugin_unloaded() {
        let registry = Arc::new(Registry {
            refuse: Some(-7),
            ..Default::default()
        });
        let manager = PluginManager::new();
        let err = manager.load_plugin(registry, provider()).unwrap_err();
        assert_eq!(err.code(), -7);
        assert!(!manager.is_loaded());
    }
}
