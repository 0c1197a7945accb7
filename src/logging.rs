//! Logging setup for the provider process.
//!
//! All logs go to **stderr**; stdout belongs to the plugin host. When the
//! provider block sets `debug_log`, the same events are also appended to that
//! file via [`try_init_debug_log`].
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g., `info`, `debug`, `hsdp_provider=debug`)
//!
//! ```bash
//! # Show poll and SSH details
//! RUST_LOG=hsdp_provider=debug ./terraform-provider-hsdp
//! ```

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the default logging subscriber.
///
/// Reads `RUST_LOG`, defaulting to `info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`], with a custom default level for when `RUST_LOG`
/// is not set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning false if already initialized.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

/// Install a subscriber that writes to stderr and appends to `path`.
///
/// The file is created if missing. Returns `Ok(false)` when a global
/// subscriber is already installed; the file is still opened so a bad path
/// is reported either way.
pub fn try_init_debug_log(path: impl AsRef<Path>) -> io::Result<bool> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_ref())?;

    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true);

    Ok(tracing_subscriber::registry()
        .with(env_filter("debug"))
        .with(stderr_layer())
        .with(file_layer)
        .try_init()
        .is_ok())
}
