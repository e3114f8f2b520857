//! Offscreen graphics context the effects engine renders into.

use std::{
    sync::Arc,
    thread::{self, ThreadId},
};

/// Errors raised while creating or binding a graphics context.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    #[error("failed to create offscreen context: {0}")]
    Create(String),
    #[error("failed to make context current: {0}")]
    MakeCurrent(String),
    #[error("graphics context not initialized")]
    NotInitialized,
}

/// A created display connection + offscreen surface pair.
pub trait OffscreenContext: Send {
    /// Bind the context and its surface to the calling thread.
    fn make_current(&mut self) -> Result<(), GraphicsError>;

    /// Unbind from the calling thread. Called before the context is dropped.
    fn release_current(&mut self) {}
}

/// Factory for offscreen contexts (EGL on device, headless in tests).
pub trait GraphicsProvider: Send + Sync {
    fn create_offscreen(
        &self,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn OffscreenContext>, GraphicsError>;
}

/// Provider whose contexts bind to nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessGraphics;

struct HeadlessContext;

impl OffscreenContext for HeadlessContext {
    fn make_current(&mut self) -> Result<(), GraphicsError> {
        Ok(())
    }
}

impl GraphicsProvider for HeadlessGraphics {
    fn create_offscreen(
        &self,
        _width: u32,
        _height: u32,
    ) -> Result<Box<dyn OffscreenContext>, GraphicsError> {
        Ok(Box::new(HeadlessContext))
    }
}

/// Owns at most one offscreen context and tracks which thread it is current on.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use vfx_engine::graphics::{GraphicsContextManager, HeadlessGraphics};
///
/// let mut gfx = GraphicsContextManager::new(Arc::new(HeadlessGraphics));
/// gfx.init().unwrap();
/// gfx.init().unwrap();
/// assert!(gfx.is_initialized());
/// gfx.release();
/// assert!(!gfx.is_initialized());
/// ```
pub struct GraphicsContextManager {
    provider: Arc<dyn GraphicsProvider>,
    context: Option<Box<dyn OffscreenContext>>,
    bound: Option<ThreadId>,
}

impl GraphicsContextManager {
    pub fn new(provider: Arc<dyn GraphicsProvider>) -> Self {
        Self {
            provider,
            context: None,
            bound: None,
        }
    }

    /// Create a zero-sized offscreen surface and make it current. No-op when already created.
    pub fn init(&mut self) -> Result<(), GraphicsError> {
        if self.context.is_some() {
            return Ok(());
        }
        let mut context = self.provider.create_offscreen(0, 0)?;
        context.make_current()?;
        self.context = Some(context);
        self.bound = Some(thread::current().id());
        tracing::debug!("offscreen graphics context created");
        Ok(())
    }

    /// Rebind the context if the calling thread is not the one it was last made current on.
    pub fn ensure_current(&mut self) -> Result<(), GraphicsError> {
        let context = self.context.as_mut().ok_or(GraphicsError::NotInitialized)?;
        let me = thread::current().id();
        if self.bound != Some(me) {
            context.make_current()?;
            self.bound = Some(me);
        }
        Ok(())
    }

    /// Destroy the context. No-op when nothing was created.
    pub fn release(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.release_current();
            self.bound = None;
            tracing::debug!("offscreen graphics context released");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    pub fn bound_thread(&self) -> Option<ThreadId> {
        self.bound
    }
}

impl Drop for GraphicsContextManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counts {
        created: AtomicUsize,
        bound: AtomicUsize,
        unbound: AtomicUsize,
    }

    struct Counting(Arc<Counts>);
    struct CountingContext(Arc<Counts>);

    impl OffscreenContext for CountingContext {
        fn make_current(&mut self) -> Result<(), GraphicsError> {
            self.0.bound.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release_current(&mut self) {
            self.0.unbound.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl GraphicsProvider for Counting {
        fn create_offscreen(
            &self,
            _width: u32,
            _height: u32,
        ) -> Result<Box<dyn OffscreenContext>, GraphicsError> {
            self.0.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingContext(self.0.clone())))
        }
    }

    #[test]
    fn rebinds_only_on_thread_change() {
        let counts = Arc::new(Counts::default());
        let mut gfx = GraphicsContextManager::new(Arc::new(Counting(counts.clone())));
        gfx.init().unwrap();
        gfx.ensure_current().unwrap();
        assert_eq!(counts.bound.load(Ordering::SeqCst), 1);

        let gfx = thread::spawn(move || {
            gfx.ensure_current().unwrap();
            gfx
        })
        .join()
        .unwrap();
        assert_eq!(counts.bound.load(Ordering::SeqCst), 2);
        assert_ne!(gfx.bound_thread(), Some(thread::current().id()));
        drop(gfx);
        assert_eq!(counts.created.load(Ordering::SeqCst), 1);
        assert_eq!(counts.unbound.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ensure_without_init_fails() {
        let mut gfx = GraphicsContextManager::new(Arc::new(HeadlessGraphics));
        assert_eq!(gfx.ensure_current(), Err(GraphicsError::NotInitialized));
        gfx.release();
    }
}
