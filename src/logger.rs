//! Structured logging setup: installs a process-wide `tracing_subscriber`
//! over `tracing::{debug,info,warn,error}!`, since this crate has a single
//! log sink (stdout/stderr) rather than pluggable destinations.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Installs the process-wide subscriber. Safe to call once at process start;
/// a second call is a no-op (mirrors `tracing_test`'s expectations in unit
/// tests, which install their own subscriber per-test).
pub fn init_logging(level: LogLevel, json: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter_str()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(!no_color);

    let result = if json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    if let Err(err) = result {
        // Already installed (e.g. by a test harness); not fatal.
        eprintln!("logging already initialized: {err}");
    }
}

/// Emits a one-line prefixed message for a unit, matching the line-prefixing
/// behaviour required by C9 when aggregating concurrent unit output.
pub fn log_unit_line(unit_relpath: &str, level: LogLevel, line: &str) {
    match level {
        LogLevel::Trace => trace!(unit = unit_relpath, "{line}"),
        LogLevel::Debug => debug!(unit = unit_relpath, "{line}"),
        LogLevel::Info => info!(unit = unit_relpath, "{line}"),
        LogLevel::Warn => warn!(unit = unit_relpath, "{line}"),
        LogLevel::Error => error!(unit = unit_relpath, "{line}"),
    }
}
