//! Tracing setup with a runtime-reloadable level filter.
//!
//! `RUST_LOG` always wins when set; otherwise the configured level
//! drives a plain directive. Config reloads go through
//! [`apply_logging_level`] so operators can turn up verbosity on a
//! live server without restarting it.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type LevelHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static LEVEL_HANDLE: OnceLock<LevelHandle> = OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (filter, handle) = reload::Layer::new(filter);
    let _ = LEVEL_HANDLE.set(handle);

    // try_init so tests that build multiple servers do not panic on the
    // second registration.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// Swap the active level filter. Returns false when tracing was never
/// initialized, which only happens in tests that skip `init_tracing`.
pub fn apply_logging_level(level: &str) -> bool {
    let Some(handle) = LEVEL_HANDLE.get() else {
        return false;
    };
    let directive = EnvFilter::new(level);
    handle.modify(|filter| *filter = directive).is_ok()
}
