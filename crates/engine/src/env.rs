//! Native bridge hooks the engine needs around license checks.

use std::{any::Any, fmt, sync::Arc};

/// Opaque platform handle handed to the engine's license check (an application context on
/// mobile targets).
#[derive(Clone)]
pub struct PlatformContext(Arc<dyn Any + Send + Sync>);

impl PlatformContext {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for PlatformContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlatformContext(..)")
    }
}

/// Host runtime the engine may need to be attached to before licensed calls.
pub trait ExecutionEnvironment: Send + Sync {
    /// Attach the calling thread; returns `false` when attaching is impossible.
    fn attach_current_thread(&self) -> bool;

    fn detach_current_thread(&self);

    fn platform_context(&self) -> Option<PlatformContext>;
}

/// Environment with nothing to attach to.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedEnvironment;

impl ExecutionEnvironment for DetachedEnvironment {
    fn attach_current_thread(&self) -> bool {
        true
    }

    fn detach_current_thread(&self) {}

    fn platform_context(&self) -> Option<PlatformContext> {
        None
    }
}

/// Keeps the current thread attached until dropped.
pub struct ThreadAttachment<'a> {
    env: &'a dyn ExecutionEnvironment,
    attached: bool,
}

impl<'a> ThreadAttachment<'a> {
    pub fn new(env: &'a dyn ExecutionEnvironment) -> Self {
        let attached = env.attach_current_thread();
        if !attached {
            tracing::warn!("failed to attach thread to execution environment");
        }
        Self { env, attached }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

impl Drop for ThreadAttachment<'_> {
    fn drop(&mut self) {
        if self.attached {
            self.env.detach_current_thread();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        attached: AtomicUsize,
        detached: AtomicUsize,
    }

    impl ExecutionEnvironment for Counting {
        fn attach_current_thread(&self) -> bool {
            self.attached.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn detach_current_thread(&self) {
            self.detached.fetch_add(1, Ordering::SeqCst);
        }

        fn platform_context(&self) -> Option<PlatformContext> {
            Some(PlatformContext::new(7u32))
        }
    }

    #[test]
    fn attachment_detaches_on_drop() {
        let env = Counting::default();
        {
            let guard = ThreadAttachment::new(&env);
            assert!(guard.is_attached());
        }
        assert_eq!(env.attached.load(Ordering::SeqCst), 1);
        assert_eq!(env.detached.load(Ordering::SeqCst), 1);
        let ctx = env.platform_context().unwrap();
        assert_eq!(ctx.downcast_ref::<u32>(), Some(&7));
    }
}
