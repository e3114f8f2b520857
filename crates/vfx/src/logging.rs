//! Diagnostic output for hosts that do not install their own subscriber.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the filter directives (`RUST_LOG` syntax).
pub const LOG_ENV: &str = "VFX_LOG";

const DEFAULT_DIRECTIVE: &str = "vfx=info,vfx_engine=warn";

/// Install a fmt subscriber filtered by `VFX_LOG`.
///
/// Returns `false` when a global subscriber already exists; calling it again is harmless.
pub fn init() -> bool {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init();
        assert!(!super::init());
    }
}
