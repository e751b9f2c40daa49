use crate::models::LoggingSettings;
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use std::fs;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup logging with a daily rotating file appender and an optional console layer.
///
/// The filter comes from `RUST_LOG` when set, otherwise from `settings.level`
/// (`debug_mode` forces `debug`).
///
/// # Arguments
/// * `settings` - Directory, file prefix, level, console and JSON switches
/// * `debug_mode` - If true, use debug level regardless of `settings.level`
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn setup_logging(
    settings: &LoggingSettings,
    debug_mode: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_path = ensure_log_dir(&settings.directory)?;

    let file_appender = rolling::daily(&log_path, &settings.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = build_filter(&settings.level, debug_mode);

    let file_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false) // No ANSI codes in log files
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let console_layer = settings.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install the global tracing subscriber")?;

    tracing::info!(
        "Logging initialized: dir={}, prefix={}, level={}, debug={}, console={}, json={}",
        log_path,
        settings.file_prefix,
        settings.level,
        debug_mode,
        settings.console,
        settings.json
    );

    Ok(guard)
}

/// Create the log directory if it doesn't exist.
fn ensure_log_dir(dir: &str) -> Result<Utf8PathBuf> {
    let log_path = Utf8PathBuf::from(dir);
    if !log_path.exists() {
        fs::create_dir_all(&log_path)
            .with_context(|| format!("Failed to create log directory: {}", dir))?;
    }
    Ok(log_path)
}

fn build_filter(level: &str, debug_mode: bool) -> EnvFilter {
    if debug_mode {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_setup_logging_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("logs");
        let settings = LoggingSettings {
            directory: log_dir.to_str().unwrap().to_string(),
            file_prefix: "test".to_string(),
            ..LoggingSettings::default()
        };

        // Fails if another test already installed a subscriber; the directory is
        // created either way.
        let _result = setup_logging(&settings, false);

        assert!(log_dir.exists());
    }

    #[test]
    fn test_ensure_log_dir_existing() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_str().unwrap();
        assert_eq!(ensure_log_dir(dir).unwrap(), Utf8PathBuf::from(dir));
    }
}
