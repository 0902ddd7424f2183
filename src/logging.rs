//! # Logging Module
//!
//! Tracing-subscriber setup shared by both binaries: a clean, colorized
//! user-facing layer on stdout plus a detailed diagnostic layer that goes
//! either to stderr or to a daily-rolling log file.

use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

/// A custom tracing event formatter that colors the whole line by severity.
///
/// Used for the stdout layer only, where users want readable output without
/// timestamps or level tags; the detailed layer keeps the default format.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Buffer the fields first so the color applies to the entire line.
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

/// Initialize the global subscriber.
///
/// - `verbose`: 0 = info, 1 = debug, 2+ = trace (applies to both layers)
/// - `quiet`: drop the colorized stdout layer entirely
/// - `log_file`: `Some("stderr")` sends diagnostics to stderr; any other
///   value is a file path; `None` falls back to a daily-rolling file named
///   `default_log_name` in the working directory.
///
/// Returns the appender guard; hold it for the life of the process or file
/// logging silently stops.
pub fn init_logging(
    verbose: u8,
    quiet: bool,
    log_file: Option<&str>,
    default_log_name: &str,
) -> Option<WorkerGuard> {
    let log_level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let guard;
    let detailed_layer;
    if let Some("stderr") = log_file {
        detailed_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let file_appender = match log_file {
            Some(path_str) => {
                let log_path = std::path::Path::new(path_str);
                let log_dir = log_path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| std::path::Path::new("."));
                let log_filename = log_path
                    .file_name()
                    .map(|f| f.to_os_string())
                    .unwrap_or_else(|| default_log_name.into());
                tracing_appender::rolling::daily(log_dir, log_filename)
            }
            None => tracing_appender::rolling::daily(".", default_log_name),
        };
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false) // no color codes inside the log file
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    let stdout_layer = if !quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_layer)
        .with(stdout_layer)
        .init();

    guard
}
