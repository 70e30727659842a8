//! Subscriber setup for the binary.
//!
//! - The filter comes from `LogLevel` only; `RUST_LOG` is ignored.
//! - Stdout gets compact lines, or JSON with `--json`.
//! - A log file, when one can be opened, is written through a non-blocking
//!   appender whose guard the caller keeps alive.
//! - Per-move detail is logged at debug, so `normal` shows one line per phase.

use anyhow::{Context, Result};
use chrono::Local;
use defrag_core::output as out;
use defrag_core::{LogLevel, default_log_path};
use std::fmt as stdfmt;
use std::fs::OpenOptions;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt as tsfmt;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry;
use tracing_subscriber::util::SubscriberInitExt;

/// Local wall-clock timestamps, `DD/MM/YY HH:MM:SS`.
struct LocalHumanTime;
impl FormatTime for LocalHumanTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> stdfmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%d/%m/%y %H:%M:%S"))
    }
}

#[inline]
fn to_level_filter(lvl: &LogLevel) -> LevelFilter {
    match lvl {
        LogLevel::Quiet => LevelFilter::ERROR,
        LogLevel::Normal => LevelFilter::INFO,
        LogLevel::Info => LevelFilter::DEBUG,
        LogLevel::Debug => LevelFilter::TRACE,
    }
}

#[inline]
fn env_filter_from_level(level_filter: LevelFilter) -> EnvFilter {
    let level_str = match level_filter {
        LevelFilter::ERROR => "error",
        LevelFilter::WARN => "warn",
        LevelFilter::INFO => "info",
        LevelFilter::DEBUG => "debug",
        LevelFilter::TRACE => "trace",
        _ => "info",
    };
    EnvFilter::new(level_str)
}

/// Open `path` for appending (parent directories are created) and wrap it
/// in a non-blocking writer.
fn open_non_blocking_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log directory '{}'", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file '{}'", path.display()))?;
    Ok(tracing_appender::non_blocking(file))
}

/// Install the global subscriber. The returned guard, present when a log
/// file is in use, flushes the file when dropped.
pub fn init_tracing(
    lvl: &LogLevel,
    log_file: Option<&Path>,
    json: bool,
) -> Result<Option<WorkerGuard>> {
    let level_filter = to_level_filter(lvl);
    let env_filter = env_filter_from_level(level_filter);

    if let Some(path) = log_file {
        match open_non_blocking_writer(path) {
            Ok((writer, guard)) => {
                if json {
                    let stdout_layer = tsfmt::layer()
                        .event_format(tsfmt::format().json())
                        .with_timer(LocalHumanTime)
                        .with_level(true)
                        .with_target(true);
                    let file_layer = tsfmt::layer()
                        .event_format(tsfmt::format().json())
                        .with_timer(LocalHumanTime)
                        .with_level(true)
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(writer);
                    registry()
                        .with(env_filter)
                        .with(stdout_layer)
                        .with(file_layer)
                        .try_init()?;
                } else {
                    let stdout_layer = tsfmt::layer()
                        .with_timer(LocalHumanTime)
                        .with_level(true)
                        .with_target(false)
                        .compact();
                    let file_layer = tsfmt::layer()
                        .with_timer(LocalHumanTime)
                        .with_level(true)
                        .with_target(true)
                        .with_ansi(false)
                        .compact()
                        .with_writer(writer);
                    registry()
                        .with(env_filter)
                        .with(stdout_layer)
                        .with(file_layer)
                        .try_init()?;
                }
                return Ok(Some(guard));
            }
            Err(e) => {
                out::print_warn(&format!(
                    "Requested file logging was not enabled ({e:#}). Logs will continue to stdout."
                ));
                if let Some(def) = default_log_path() {
                    out::print_info(&format!(
                        "You can try using the default log path instead: {}",
                        def.display()
                    ));
                }
            }
        }
    }

    // No file layer (either not requested or failed to open)
    if json {
        let stdout_layer = tsfmt::layer()
            .event_format(tsfmt::format().json())
            .with_timer(LocalHumanTime)
            .with_level(true)
            .with_target(true);
        registry().with(env_filter).with(stdout_layer).try_init()?;
    } else {
        let stdout_layer = tsfmt::layer()
            .with_timer(LocalHumanTime)
            .with_level(true)
            .with_target(false)
            .compact();
        registry().with(env_filter).with(stdout_layer).try_init()?;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_one_step_more_verbose() {
        assert_eq!(to_level_filter(&LogLevel::Quiet), LevelFilter::ERROR);
        assert_eq!(to_level_filter(&LogLevel::Normal), LevelFilter::INFO);
        assert_eq!(to_level_filter(&LogLevel::Debug), LevelFilter::TRACE);
    }

    #[test]
    fn writer_creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.log");
        let (_writer, _guard) = open_non_blocking_writer(&path).unwrap();
        assert!(path.exists());
    }
}
