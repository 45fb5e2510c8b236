//! Logging setup for callplane processes.
//!
//! [`init_tracing`] installs the global subscriber from the `[logging]`
//! config table: an [`EnvFilter`] (config directive, overridden by
//! `RUST_LOG`), a human or JSON formatter on stdout, and optionally the same
//! events appended to a file.

#![forbid(unsafe_code)]

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Telemetry setup errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The filter directive does not parse.
    #[error("invalid log filter {directive:?}: {message}")]
    InvalidFilter { directive: String, message: String },

    /// The log file could not be opened.
    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber is already installed.
    #[error("tracing already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Event formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

fn default_filter() -> String {
    "info".to_string()
}

/// `[logging]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"info,cp_mesh=debug"`.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also append events to this file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Filter from `env_override` (typically `RUST_LOG`) if set, else `directive`.
///
/// # Errors
/// Returns [`TelemetryError::InvalidFilter`] if the chosen directive does not parse.
pub fn resolve_filter(
    directive: &str,
    env_override: Option<&str>,
) -> Result<EnvFilter, TelemetryError> {
    let chosen = env_override
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(directive);
    EnvFilter::try_new(chosen).map_err(|err| TelemetryError::InvalidFilter {
        directive: chosen.to_string(),
        message: err.to_string(),
    })
}

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true);
    match format {
        LogFormat::Pretty => layer.boxed(),
        LogFormat::Json => layer.json().flatten_event(true).boxed(),
    }
}

fn open_log_file(path: &Path) -> Result<Arc<std::fs::File>, TelemetryError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(Arc::new)
        .map_err(|source| TelemetryError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

fn file_layers(config: &LoggingConfig) -> Result<Vec<BoxedLayer>, TelemetryError> {
    let mut layers = Vec::new();
    if let Some(path) = &config.file {
        layers.push(fmt_layer(config.format, open_log_file(path)?, false));
    }
    Ok(layers)
}

/// Install the global subscriber described by `config`.
///
/// # Errors
/// Returns [`TelemetryError`] if the filter is invalid, the log file cannot
/// be opened, or a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = resolve_filter(&config.filter, env.as_deref())?;

    let mut layers = vec![fmt_layer(config.format, std::io::stdout, true)];
    layers.extend(file_layers(config)?);

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .map_err(|err| TelemetryError::AlreadyInitialized(err.to_string()))
}
