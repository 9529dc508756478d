use std::path::Path;
use std::sync::{Once, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static TEST_LOGGING: Once = Once::new();

#[derive(Debug, thiserror::Error)]
pub enum LogSetupError {
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("failed to create log directory: {0}")]
    Directory(#[source] std::io::Error),
    #[error("failed to create log appender: {0}")]
    Appender(String),
    #[error("logging already initialized")]
    AlreadyInitialized,
}

fn env_filter(base_level: &str) -> Result<EnvFilter, LogSetupError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(base_level))
        .map_err(|e| LogSetupError::Filter(e.to_string()))
}

/// Install a console subscriber plus a daily-rolling file log under `log_dir`.
///
/// `RUST_LOG` overrides `base_level` when set. Warnings and errors go to stderr.
pub fn setup_logging(base_level: &str, log_dir: impl AsRef<Path>) -> Result<(), LogSetupError> {
    let log_dir = log_dir.as_ref();
    let env_filter = env_filter(base_level)?;

    std::fs::create_dir_all(log_dir).map_err(LogSetupError::Directory)?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("speckle")
        .filename_suffix("log")
        .max_log_files(5)
        .build(log_dir)
        .map_err(|e| LogSetupError::Appender(e.to_string()))?;

    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD
        .set(guard)
        .map_err(|_| LogSetupError::AlreadyInitialized)?;

    let console_writer = std::io::stdout.and(std::io::stderr.with_min_level(Level::WARN));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_ansi(true)
        .with_writer(console_writer);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LogSetupError::AlreadyInitialized)
}

/// Route `tracing` output through the libtest capture writer.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn setup_test_logging() {
    TEST_LOGGING.call_once(|| {
        let filter = env_filter("debug").unwrap_or_else(|_| EnvFilter::new("debug"));
        // Another harness may already own the global subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
