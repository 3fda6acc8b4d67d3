use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LogConfig;

const LOG_FILE_PREFIX: &str = "faena.log";

/// Keeps the file writer flushing until dropped. Drop it last, after the
/// final event has been logged.
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global subscriber: stderr (plain or JSON) plus an optional
/// daily-rolling JSON file when a log directory is configured.
pub fn init(config: &LogConfig) -> anyhow::Result<LogGuard> {
    let filter = || {
        EnvFilter::try_new(&config.filter)
            .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER))
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let stderr = fmt::layer()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);
    if config.json {
        layers.push(stderr.json().with_filter(filter()).boxed());
    } else {
        layers.push(stderr.with_filter(filter()).boxed());
    }

    let mut file_guard = None;
    if let Some(dir) = &config.dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer)
                .with_filter(filter())
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(LogGuard { _file: file_guard })
}
