//! Log subscriber setup for the CLI

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`; `verbose` forces `debug`.
/// With `log_file` set, lines go to stderr and are appended to that file.
/// Calling this twice is harmless: the second subscriber is not installed.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .with_context(|| format!("Invalid log level '{}'", config.level))?
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            let _ = builder
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }

    Ok(())
}
