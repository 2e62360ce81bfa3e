//! Tracing subscriber setup for the command line

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Output format of log records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

/// Installs the global subscriber.
///
/// Records go to stderr, or to `log_file` through a non-blocking writer. The
/// level comes from `RUST_LOG` and defaults to `info`. The returned guard
/// must be kept alive until exit so buffered records are flushed.
pub fn init(format: LogFormat, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path {}", path.display()))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let (json, human) = match format {
        LogFormat::Json => (Some(fmt::layer().json().with_writer(writer)), None),
        LogFormat::Human => (
            None,
            Some(
                fmt::layer()
                    .with_ansi(log_file.is_none())
                    .with_writer(writer),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json)
        .with(human)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
