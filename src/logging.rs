use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::{Duration, Local, NaiveDate};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "app.log";

/// Initialize the process-wide subscriber. With a configured log directory
/// the output goes to a daily-rolling file (`app.log.YYYY-MM-DD`),
/// otherwise to stderr. The returned guard must be held for the process
/// lifetime so buffered lines are flushed on shutdown.
pub fn init(cfg: &crate::config::LoggingConfig) -> Result<Option<WorkerGuard>> {
    let default_level = cfg.level.as_deref().unwrap_or("info");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match cfg.path.as_deref() {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
            Ok(None)
        }
    }
}

/// Delete dated log files older than `keep_days` days. Disabled unless
/// both a log directory and a positive keep count are configured; files
/// that do not match the dated naming scheme are left alone.
pub fn rotate_logs(cfg: &crate::config::LoggingConfig) {
    let (Some(dir), Some(keep_days)) = (cfg.path.as_deref(), cfg.keep_days) else {
        return;
    };
    if keep_days == 0 {
        return;
    }
    let today = Local::now().date_naive();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, dir, "cannot scan log directory for rotation");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(date) = log_file_date(name) else { continue };
        if is_expired(date, today, keep_days) {
            if let Err(e) = fs::remove_file(entry.path()) {
                tracing::warn!(error = %e, file = name, "failed to remove old log file");
            }
        }
    }
}

/// `app.log.2025-12-25` -> the embedded date.
fn log_file_date(file_name: &str) -> Option<NaiveDate> {
    let suffix = Path::new(file_name)
        .file_name()?
        .to_str()?
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_prefix('.')?;
    NaiveDate::parse_from_str(suffix, "%Y-%m-%d").ok()
}

fn is_expired(file_date: NaiveDate, today: NaiveDate, keep_days: u32) -> bool {
    today - file_date > Duration::days(i64::from(keep_days) - 1)
}
