//! Structured logging setup, stdout-only (no file rotation needed for the
//! core engine — the teacher's `tracing-appender` rolling-file setup is kept
//! for components that run long enough to need it; here stdout is sufficient
//! since observability plumbing itself is a non-goal per SPEC_FULL.md §1).

use crate::config::{AppConfig, LogFormat};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => {
            let layer = fmt::layer().json().with_target(true).with_ansi(false);
            registry.with(layer).init();
        }
        LogFormat::Text => {
            let layer = fmt::layer().with_target(false).with_ansi(true);
            registry.with(layer).init();
        }
    }
}
