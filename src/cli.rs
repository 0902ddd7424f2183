//! # Command-Line Interface Module
//!
//! Argument parsing for the two binaries, using the `clap` derive API.
//! `ircached` runs the cache server until SIGINT/SIGTERM; `ircache-client`
//! connects to a running server and issues a fixed script of requests.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Run the daemon with defaults (/ipc_router_shared, /tmp/v8_code_cache)
//! ircached
//!
//! # Isolated instance with verbose diagnostics
//! ircached --shared-memory-name /ircache_dev --cache-file /tmp/ircache_dev -vv
//!
//! # Exercise it
//! ircache-client --graph-size 4096
//! ```

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser,
};
use std::path::PathBuf;
use std::time::Duration;

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// IR cache server daemon
///
/// Creates the shared-memory transport segment, opens (or creates) the
/// memory-mapped cache backing file, and serves requests until it receives
/// SIGINT or SIGTERM. Exit code 0 on a clean shutdown, 1 if initialization
/// fails.
#[derive(Parser, Debug, Clone)]
#[command(name = "ircached", author, version, about, long_about = None, styles = styles())]
pub struct ServerArgs {
    /// POSIX name of the shared-memory control segment
    #[arg(long, default_value = crate::defaults::SHARED_MEMORY_NAME)]
    pub shared_memory_name: String,

    /// Path of the memory-mapped cache backing file
    ///
    /// The file is created lazily, sized to 100 MiB, and persists across
    /// server restarts; cached entries survive with it.
    #[arg(long, default_value = crate::defaults::CACHE_FILE_PATH)]
    pub cache_file: PathBuf,

    /// Detailed log destination: a file path, or "stderr"
    ///
    /// Defaults to a daily-rolling file next to the working directory.
    #[arg(long, help_heading = "Output and Logging")]
    pub log_file: Option<String>,

    /// Silence user-facing informational output on stdout
    #[arg(short = 'q', long, help_heading = "Output and Logging")]
    pub quiet: bool,

    /// Increase diagnostic log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,
}

/// IR cache demonstration client
///
/// Connects to a running `ircached`, issues the demonstration request
/// script (user routes, graph store/fetch hit and miss, legacy fetch), and
/// exits 0 only if every request behaved as expected.
#[derive(Parser, Debug, Clone)]
#[command(name = "ircache-client", author, version, about, long_about = None, styles = styles())]
pub struct ClientArgs {
    /// POSIX name of the shared-memory segment to attach to
    #[arg(long, default_value = crate::defaults::SHARED_MEMORY_NAME)]
    pub shared_memory_name: String,

    /// Size in bytes of the demonstration IR graph payload
    #[arg(long, default_value_t = 1024)]
    pub graph_size: usize,

    /// How long to wait for each response (e.g. "5s", "500ms", "1m")
    #[arg(long, value_parser = parse_duration, default_value = "5s")]
    pub response_timeout: Duration,

    /// Silence user-facing informational output on stdout
    #[arg(short = 'q', long, help_heading = "Output and Logging")]
    pub quiet: bool,

    /// Increase diagnostic log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,
}

/// Parse a human-readable duration: plain seconds, or a number suffixed
/// with `ms`, `s`, `m`, or `h`.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (value, unit): (&str, &str) = match s.find(|c: char| c.is_alphabetic()) {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, "s"),
    };
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration value: {s}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(format!("invalid duration unit: {unit}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parsing_accepts_common_forms() {
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn server_args_defaults() {
        let args = ServerArgs::parse_from(["ircached"]);
        assert_eq!(args.shared_memory_name, crate::defaults::SHARED_MEMORY_NAME);
        assert_eq!(
            args.cache_file,
            PathBuf::from(crate::defaults::CACHE_FILE_PATH)
        );
        assert!(!args.quiet);
    }
}
