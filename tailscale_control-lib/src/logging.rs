use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_LOG_FILTER: &str = "info";

/// Initializes the global `tracing` subscriber writing to stdout.
///
/// The daemon runs under a daemontools-style supervisor whose log service
/// captures stdout, so there is no file handling or rotation here. ANSI
/// colors are disabled for that reason. Verbosity is controlled by the
/// `RUST_LOG` environment variable; if unset or invalid it defaults to
/// `"info"`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn setup() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false))
        .with(filter)
        .init();
}
