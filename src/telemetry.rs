use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

fn tracing_fmt_enabled_env() -> bool {
    env::var("SYSMUTEX_TRACING_FMT").ok().as_deref() == Some("1")
}

/// Install a stderr fmt subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Enabled by `SYSMUTEX_TRACING_FMT=1`. Returns true only for the call that
/// installed the subscriber; later calls, or calls while disabled, return false.
pub fn telemetry_init() -> bool {
    if INIT.get().is_some() {
        return false;
    }
    if !tracing_fmt_enabled_env() {
        return false;
    }

    let filter = env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    if registry.try_init().is_err() {
        eprintln!("sysmutex: tracing init skipped (global subscriber already set)");
        return false;
    }
    INIT.set(()).is_ok()
}
