//! Logging setup.
//!
//! `RUST_LOG` always wins. Without it the `[logging]` table of the switch
//! file picks the level, and the default is `info`. Output goes to stderr
//! unless a log file is configured.

use serde::Deserialize;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// `[logging]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Any `EnvFilter` directive, e.g. `debug` or `pipeswitch::stages=trace`
    pub level: String,
    pub format: LogFormat,
    /// Append to this file instead of writing to stderr
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

impl LogConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. Calling it again is a no-op.
///
/// A log file that cannot be opened falls back to stderr with a warning.
pub fn init_logging(config: Option<&LogConfig>) {
    let defaults = LogConfig::default();
    let config = config.unwrap_or(&defaults);

    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => config.filter(),
    };

    let file = config.file.as_ref().map(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("{}: {}", path.display(), e))
    });

    match file {
        Some(Ok(file)) => install(filter, config.format, Mutex::new(file), false),
        Some(Err(reason)) => {
            install(filter, config.format, std::io::stderr, true);
            tracing::warn!("cannot open log file {}, logging to stderr", reason);
        }
        None => install(filter, config.format, std::io::stderr, true),
    }
}

fn install<W>(filter: EnvFilter, format: LogFormat, writer: W, ansi: bool)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer().with_ansi(ansi).with_writer(writer);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(layer.json().with_span_events(FmtSpan::CLOSE))
            .try_init(),
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
        LogFormat::Pretty => registry.with(layer).try_init(),
    };
    // Already installed by an earlier call or a test harness
    drop(installed);
}
