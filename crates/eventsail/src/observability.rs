// Tracing setup with a reloadable level filter.
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over `level` when it is set and parses.
/// Returns `false`, leaving the existing one alone, if a global subscriber is
/// already installed.
pub fn init_tracing_with_level(level: &str) -> bool {
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);

    let installed = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_thread_names(true))
        .try_init()
        .is_ok();
    if installed {
        let _ = LOG_RELOAD_HANDLE.set(handle);
    }
    installed
}

pub fn init_tracing_from(config: &LoggingConfig) -> bool {
    init_tracing_with_level(&config.level)
}

/// Change the level of the subscriber installed by
/// [`init_tracing_with_level`].
///
/// Returns `false` when no reloadable subscriber is installed.
pub fn apply_logging_level(level: &str) -> bool {
    match LOG_RELOAD_HANDLE.get() {
        Some(handle) => handle
            .modify(|f| {
                *f = EnvFilter::new(level);
            })
            .is_ok(),
        None => false,
    }
}
