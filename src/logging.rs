//! Console and file logging.
//!
//! Besides the console, the bot writes two files into the logs directory:
//! - `bot.YYYY-MM-DD.log`: everything the filter lets through, rotated daily
//! - `error.log`: errors only

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Daily log files kept before the oldest is deleted.
pub const LOG_RETENTION_FILES: usize = 30;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open log file in {path}: {source}")]
    Appender {
        path: PathBuf,
        #[source]
        source: InitError,
    },

    #[error("Logging is already initialized: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Keeps the background log writers alive; files are flushed on drop.
#[must_use = "dropping the guards stops file logging"]
#[derive(Debug, Default)]
pub struct LogGuards(Vec<WorkerGuard>);

/// Installs the global subscriber. `RUST_LOG` wins over `level`; file
/// logging is skipped when `logs_dir` is `None`.
pub fn init(level: &str, logs_dir: Option<&Path>) -> Result<LogGuards, LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (subscriber, guards) = subscriber(filter, logs_dir, true)?;
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(guards)
}

/// Builds the subscriber without installing it.
pub fn subscriber(
    filter: EnvFilter,
    logs_dir: Option<&Path>,
    console: bool,
) -> Result<(impl Subscriber + Send + Sync + 'static, LogGuards), LoggingError> {
    let mut guards = LogGuards::default();

    let (file_layer, error_layer) = match logs_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::Directory {
                path: dir.to_path_buf(),
                source,
            })?;

            let daily = appender(dir, Rotation::DAILY, "bot")?;
            let (daily, guard) = tracing_appender::non_blocking(daily);
            guards.0.push(guard);

            let errors = appender(dir, Rotation::NEVER, "error")?;
            let (errors, guard) = tracing_appender::non_blocking(errors);
            guards.0.push(guard);

            (
                Some(fmt::layer().with_writer(daily).with_ansi(false)),
                Some(
                    fmt::layer()
                        .with_writer(errors)
                        .with_ansi(false)
                        .with_filter(LevelFilter::ERROR),
                ),
            )
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console.then(|| fmt::layer().with_target(false)))
        .with(file_layer)
        .with(error_layer);
    Ok((subscriber, guards))
}

fn appender(dir: &Path, rotation: Rotation, prefix: &str) -> Result<RollingFileAppender, LoggingError> {
    RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(LOG_RETENTION_FILES)
        .build(dir)
        .map_err(|source| LoggingError::Appender {
            path: dir.to_path_buf(),
            source,
        })
}
