//! Log setup for the propagator binary.
//!
//! The filter sits behind a `reload` layer: `main` starts at `info`, then
//! swaps in `logging.level` once the config file has been read. An explicit
//! `RUST_LOG` pins the filter for the life of the process.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER: OnceLock<FilterHandle> = OnceLock::new();

const FALLBACK_LEVEL: &str = "info";

pub fn init_tracing() {
    init_tracing_with_level(FALLBACK_LEVEL);
}

pub fn init_tracing_with_level(level: &str) {
    let initial = if rust_log_pinned() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(level))
    } else {
        filter_for(level)
    };

    let (filter, handle) = reload::Layer::new(initial);
    let _ = FILTER.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Switches the log filter to `level`. Returns false when `RUST_LOG` pins
/// the filter or tracing was never initialized.
pub fn apply_logging_level(level: &str) -> bool {
    if rust_log_pinned() {
        tracing::debug!(level, "RUST_LOG is set, keeping its filter");
        return false;
    }
    let Some(handle) = FILTER.get() else {
        return false;
    };
    match handle.modify(|current| *current = filter_for(level)) {
        Ok(()) => {
            tracing::info!(level, "log level applied");
            true
        }
        Err(e) => {
            tracing::warn!(level, error = %e, "failed to apply log level");
            false
        }
    }
}

/// Builds a filter from a level or directive string such as
/// `debug` or `info,propagator_server::controller=trace`. Unparseable input
/// falls back to `info`.
fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|e| {
        eprintln!("invalid logging.level '{level}' ({e}), using '{FALLBACK_LEVEL}'");
        EnvFilter::new(FALLBACK_LEVEL)
    })
}

fn rust_log_pinned() -> bool {
    std::env::var_os("RUST_LOG").is_some_and(|v| !v.is_empty())
}
