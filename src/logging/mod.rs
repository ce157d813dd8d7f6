//! Logging initialization using `tracing` and `tracing-subscriber`.
//!
//! Console output goes to stderr. A run additionally writes to the global
//! append log and to its own per-run log file.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::Result;

pub mod housekeeping;

pub use housekeeping::{Housekeeper, HousekeepingReport, SweepReport};

pub const GLOBAL_LOG_FILE: &str = "lentochka.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Console,
    /// Console plus every listed file, opened in append mode.
    ConsoleAndFiles(Vec<PathBuf>),
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub sink: LogSink,
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Human,
            sink: LogSink::Console,
            level: "info".into(),
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize global tracing subscriber. Safe to call multiple times; subsequent
/// calls will no-op.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.format)];
    if let LogSink::ConsoleAndFiles(paths) = &config.sink {
        for path in paths {
            layers.push(file_layer(config.format, path)?);
        }
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();

    Ok(())
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    let layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Human => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

fn file_layer(format: LogFormat, path: &Path) -> Result<BoxedLayer> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    let layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file));
    Ok(match format {
        LogFormat::Human => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    })
}

/// Per-run log file name for a run started at `stamp`.
pub fn run_log_path(log_dir: &Path, stamp: &str) -> PathBuf {
    log_dir.join(format!("lentochka-run-{stamp}.log"))
}
