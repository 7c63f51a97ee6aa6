//! Tracing integration for structured logging.
//!
//! Provides logging setup for the worker binary and tests with
//! configurable verbosity, optional file output, and JSON or text format.

use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// Initialize the logging system.
///
/// `verbosity` maps 0=error, 1=warn, 2=info, 3=debug, 4+=trace; `RUST_LOG`
/// overrides the computed filter. When `log_file` is set, output is
/// appended there without ANSI colors; otherwise it goes to stderr.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("ferry_core={level},ferry_worker={level}"))
    });

    let layer = match (log_file, format) {
        (None, LogFormat::Text) => fmt::layer()
            .with_target(true)
            .with_file(verbosity >= 3)
            .with_line_number(verbosity >= 3)
            .boxed(),
        (None, LogFormat::Json) => fmt::layer().json().boxed(),
        (Some(path), text_or_json) => {
            let file = std::sync::Arc::new(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?,
            );
            match text_or_json {
                LogFormat::Text => fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_target(true)
                    .boxed(),
                LogFormat::Json => fmt::layer().json().with_writer(file).boxed(),
            }
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
}

/// Initialize logging with defaults for testing.
///
/// Silently ignores errors (logging may already be initialized).
pub fn init_test_logging() {
    let _ = init_logging(2, None, LogFormat::Text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_default() {
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }

    #[test]
    fn init_is_idempotent_enough_for_tests() {
        // The subscriber can only be installed once per process; the second
        // call must not panic.
        init_test_logging();
        init_test_logging();
    }
}
