use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// The level of messages printed to stderr, as given in the configuration or on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[clap(rename_all = "UPPER")]
#[serde(rename_all = "UPPERCASE")]
pub enum LevelFilter {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LevelFilter> for tracing::level_filters::LevelFilter {
    fn from(level: LevelFilter) -> Self {
        match level {
            LevelFilter::Off => Self::OFF,
            LevelFilter::Error => Self::ERROR,
            LevelFilter::Warn => Self::WARN,
            LevelFilter::Info => Self::INFO,
            LevelFilter::Debug => Self::DEBUG,
            LevelFilter::Trace => Self::TRACE,
        }
    }
}

/// Installs the global subscriber.
///
/// Engine and session messages go to stderr, at `level` if one is configured
/// and otherwise as `RUST_LOG` says, warnings by default. With a `log_file`,
/// everything down to debug level is also written there as JSON lines. The
/// returned guard flushes that file when dropped.
pub fn setup_logging(
    log_file: Option<&Path>,
    level: Option<LevelFilter>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let stderr_filter = match level {
        Some(level) => EnvFilter::builder()
            .with_default_directive(tracing::level_filters::LevelFilter::from(level).into())
            .parse_lossy(""),
        None => EnvFilter::builder()
            .with_default_directive(tracing::level_filters::LevelFilter::WARN.into())
            .from_env_lossy(),
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let Some(log_file) = log_file else {
        tracing_subscriber::registry().with(stderr_layer).init();
        return Ok(None);
    };

    let (writer, guard) = tracing_appender::non_blocking(File::create(log_file)?);
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_filter(tracing::level_filters::LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    tracing::debug!("Logging to {}", log_file.display());

    Ok(Some(guard))
}
