//! Logging setup shared by the supervisor and its workers.
//!
//! Every process logs to stderr; workers inherit the supervisor's stderr, so
//! one terminal shows the whole pool. An optional file sink receives the same
//! events without ANSI colors.
//!
//! # Environment Variables
//!
//! - `PALIN_LOG` - Log filter (overrides RUST_LOG)
//! - `PALIN_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `PALIN_LOG_FORMAT` - Output format: pretty, compact, json
//! - `PALIN_LOG_FILE` - Path to log file (in addition to stderr)
//! - `PALIN_LOG_ROTATION` - Log file rotation: hourly, daily, never
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! # Example
//!
//! ```no_run
//! use palin::logging::{LogConfig, init};
//!
//! init(LogConfig::for_supervisor().with_env_overrides());
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{Level, Subscriber};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Full multi-field format
    Pretty,
    /// Compact single-line format (default; keeps interleaved workers readable)
    #[default]
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Log rotation for the file sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    /// Single file (default)
    #[default]
    Never,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "never" => Ok(Self::Never),
            _ => Err(format!(
                "Unknown log rotation: '{}'. Valid options: hourly, daily, never",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hourly => write!(f, "hourly"),
            Self::Daily => write!(f, "daily"),
            Self::Never => write!(f, "never"),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration.
///
/// Use the builder methods to customize, then pass to [`init`] or [`init_with_file`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO)
    pub level: Level,
    /// Log format (default: Compact)
    pub format: LogFormat,
    /// Path to log file (None = stderr only)
    pub file_path: Option<PathBuf>,
    /// Rotation for file output (default: Never)
    pub rotation: LogRotation,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    /// Show target module in logs
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            file_path: None,
            rotation: LogRotation::Never,
            filter: None,
            show_target: true,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for `palin run`.
    pub fn for_supervisor() -> Self {
        Self::default()
    }

    /// Preset for `palin worker`.
    ///
    /// Targets are hidden: every worker event already carries its pid and
    /// participant.
    pub fn for_worker() -> Self {
        Self {
            show_target: false,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Apply environment variable overrides.
    ///
    /// CLI settings win: a filter already set (from `-v` or `-q`) is kept, and
    /// `PALIN_LOG_LEVEL` only applies when no filter is set at all.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var("PALIN_LOG") {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }

        if self.filter.is_none()
            && let Ok(level_str) = std::env::var("PALIN_LOG_LEVEL")
        {
            self.level = parse_level(&level_str).unwrap_or(self.level);
        }

        if let Ok(format) = std::env::var("PALIN_LOG_FORMAT")
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Ok(path) = std::env::var("PALIN_LOG_FILE") {
            self.file_path = Some(PathBuf::from(path));
        }

        if let Ok(rotation) = std::env::var("PALIN_LOG_ROTATION") {
            match rotation.parse() {
                Ok(r) => self.rotation = r,
                Err(e) => eprintln!("Warning: {}", e),
            }
        }

        self
    }

    /// The filter directive this configuration resolves to.
    pub fn effective_filter(&self) -> String {
        self.filter
            .clone()
            .unwrap_or_else(|| self.level.to_string().to_lowercase())
    }

    /// Environment that makes a worker log the way this process does.
    ///
    /// Settings that came from the environment are inherited anyway; this
    /// carries over the ones that came from the command line.
    pub fn child_env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("PALIN_LOG", self.effective_filter()),
            ("PALIN_LOG_FORMAT", self.format.to_string()),
        ];
        if let Some(path) = &self.file_path {
            env.push(("PALIN_LOG_FILE", path.display().to_string()));
            env.push(("PALIN_LOG_ROTATION", self.rotation.to_string()));
        }
        env
    }

    fn build_filter(&self) -> EnvFilter {
        let directive = self.effective_filter();
        EnvFilter::try_new(&directive).unwrap_or_else(|_| {
            eprintln!("Warning: Invalid log filter '{}', using default", directive);
            EnvFilter::new(self.level.to_string().to_lowercase())
        })
    }
}

/// Parse a log level string.
fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// A formatting layer for `writer` in the configured format.
fn fmt_layer<S, W>(config: &LogConfig, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_target(config.show_target)
        .with_ansi(ansi)
        .with_writer(writer);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}

/// Initialize the global tracing subscriber, logging to stderr.
///
/// Call once at startup; later calls are silently ignored. If
/// `config.file_path` is set, this behaves like [`init_with_file`].
pub fn init(config: LogConfig) {
    if config.file_path.is_some() {
        init_with_file(config);
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(config.build_filter())
        .with(fmt_layer(&config, std::io::stderr, true))
        .try_init();
}

/// Initialize logging to stderr and, if configured, to a file.
///
/// The file is opened in append mode, so the supervisor and every worker can
/// share one path.
pub fn init_with_file(config: LogConfig) {
    let appender = config.file_path.as_ref().map(|path| {
        let parent = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("palin.log");
        RollingFileAppender::new(config.rotation.into(), parent, file_name)
    });

    let _ = tracing_subscriber::registry()
        .with(config.build_filter())
        .with(fmt_layer(&config, std::io::stderr, true))
        .with(appender.map(|appender| fmt_layer(&config, appender, false)))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("full".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("invalid".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_format_display_round_trips() {
        for format in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_log_rotation_from_str() {
        assert_eq!("hourly".parse::<LogRotation>().unwrap(), LogRotation::Hourly);
        assert_eq!("daily".parse::<LogRotation>().unwrap(), LogRotation::Daily);
        assert_eq!("never".parse::<LogRotation>().unwrap(), LogRotation::Never);
        assert!("weekly".parse::<LogRotation>().is_err());
        assert_eq!(LogRotation::Daily.to_string(), "daily");
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("error"), Some(Level::ERROR));
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("INFO"), Some(Level::INFO));
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.file_path.is_none());
        assert!(config.show_target);
        assert!(!LogConfig::for_worker().show_target);
    }

    #[test]
    fn test_effective_filter() {
        assert_eq!(LogConfig::new().effective_filter(), "info");
        let debug = LogConfig {
            level: Level::DEBUG,
            ..LogConfig::new()
        };
        assert_eq!(debug.effective_filter(), "debug");
        assert_eq!(
            LogConfig::new()
                .with_filter("palin=trace".to_string())
                .effective_filter(),
            "palin=trace"
        );
    }

    #[test]
    fn test_child_env_carries_cli_settings() {
        let config = LogConfig {
            level: Level::WARN,
            file_path: Some(PathBuf::from("/tmp/palin.log")),
            rotation: LogRotation::Hourly,
            ..LogConfig::new()
        }
        .with_format(LogFormat::Json);
        let env = config.child_env();
        assert!(env.contains(&("PALIN_LOG", "warn".to_string())));
        assert!(env.contains(&("PALIN_LOG_FORMAT", "json".to_string())));
        assert!(env.contains(&("PALIN_LOG_FILE", "/tmp/palin.log".to_string())));
        assert!(env.contains(&("PALIN_LOG_ROTATION", "hourly".to_string())));
    }

    #[test]
    fn test_rotation_from_environment() {
        // Safety: no other test in this crate touches PALIN_LOG_ROTATION.
        unsafe { std::env::set_var("PALIN_LOG_ROTATION", "daily") };
        let config = LogConfig::new().with_env_overrides();
        unsafe { std::env::remove_var("PALIN_LOG_ROTATION") };
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_child_env_without_file() {
        let env = LogConfig::new().child_env();
        assert_eq!(env.len(), 2);
        assert!(env.iter().all(|(k, _)| *k != "PALIN_LOG_FILE" && *k != "PALIN_LOG_ROTATION"));
    }
}
