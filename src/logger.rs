use crate::config::{BackendKind, LogFormat, ServerConfig};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use colored::*;
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

static SERVER_LOGGER: Lazy<ServerLogger> = Lazy::new(ServerLogger::new);

/// Dependencies that are chatty below `Info`.
const NOISY_TARGETS: &[&str] = &["hyper", "h2", "mio", "rustls", "want", "reqwest::connect"];

pub fn init() -> Result<()> {
    init_with_config(LoggerConfig::default())
}

pub fn init_with_config(config: LoggerConfig) -> Result<()> {
    let max_level = config.min_level.to_level_filter();
    SERVER_LOGGER.update_config(config)?;

    log::set_logger(&*SERVER_LOGGER)
        .map_err(|e| AppError::ConfigError(format!("Failed to set logger: {}", e)))?;
    log::set_max_level(max_level);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn color(&self) -> Color {
        match self {
            LogLevel::Trace => Color::Cyan,
            LogLevel::Debug => Color::Blue,
            LogLevel::Info => Color::Green,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error => Color::Red,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn to_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::Trace,
            LogLevel::Debug => Level::Debug,
            LogLevel::Info => Level::Info,
            LogLevel::Warn => Level::Warn,
            LogLevel::Error => Level::Error,
        }
    }

    pub fn to_level_filter(&self) -> LevelFilter {
        self.to_level().to_level_filter()
    }

    pub fn from_level(level: Level) -> Self {
        match level {
            Level::Trace => LogLevel::Trace,
            Level::Debug => LogLevel::Debug,
            Level::Info => LogLevel::Info,
            Level::Warn => LogLevel::Warn,
            Level::Error => LogLevel::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl LogEntry {
    fn from_record(record: &Record) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::from_level(record.level()),
            target: record.target().to_string(),
            message: record.args().to_string(),
            file: record.file().map(str::to_string),
            line: record.line(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub show_colors: bool,
    pub show_target: bool,
    pub show_file_location: bool,
    pub timestamp_format: String,
    pub output_json: bool,
    pub log_file: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            show_colors: true,
            show_target: true,
            show_file_location: false,
            timestamp_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
            output_json: false,
            log_file: None,
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_colors(mut self, enabled: bool) -> Self {
        self.show_colors = enabled;
        self
    }

    pub fn with_json_output(mut self, enabled: bool) -> Self {
        self.output_json = enabled;
        self
    }

    pub fn with_file_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn development() -> Self {
        Self {
            min_level: LogLevel::Debug,
            show_file_location: true,
            ..Default::default()
        }
    }

    pub fn production() -> Self {
        Self {
            min_level: LogLevel::Info,
            show_colors: false,
            output_json: true,
            ..Default::default()
        }
    }

    /// `DEBUG=true` picks the development profile.
    pub fn for_mode(debug: bool) -> Self {
        if debug {
            Self::development()
        } else {
            Self::default()
        }
    }

    /// Builds the logger settings from `DEBUG`, `LOG_FORMAT` and `LOG_FILE`.
    pub fn from_server_config(config: &ServerConfig) -> Self {
        let mut logger = match config.log_format {
            LogFormat::Json if config.debug => Self::production().with_level(LogLevel::Debug),
            LogFormat::Json => Self::production(),
            LogFormat::Text => Self::for_mode(config.debug),
        };
        if let Some(path) = &config.log_file {
            logger = logger.with_file_output(path.clone());
        }
        logger
    }
}

pub struct ServerLogger {
    config: Mutex<LoggerConfig>,
    log_file: Mutex<Option<File>>,
}

impl ServerLogger {
    fn new() -> Self {
        Self {
            config: Mutex::new(LoggerConfig::default()),
            log_file: Mutex::new(None),
        }
    }

    fn update_config(&self, new_config: LoggerConfig) -> Result<()> {
        let file = match &new_config.log_file {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        AppError::ConfigError(format!(
                            "Cannot open log file {}: {}",
                            path.display(),
                            e
                        ))
                    })?,
            ),
            None => None,
        };

        if let Ok(mut log_file) = self.log_file.lock() {
            *log_file = file;
        }
        if let Ok(mut config) = self.config.lock() {
            *config = new_config;
        }
        Ok(())
    }

    fn format_line(entry: &LogEntry, config: &LoggerConfig, colors: bool) -> String {
        let mut line = String::new();

        let timestamp = entry.timestamp.format(&config.timestamp_format).to_string();
        let level = format!("{:<5}", entry.level.as_str());
        if colors {
            line.push_str(&format!(
                "{} [{}] ",
                timestamp.bright_black(),
                level.color(entry.level.color()).bold()
            ));
        } else {
            line.push_str(&format!("{} [{}] ", timestamp, level));
        }

        if config.show_target {
            if colors {
                line.push_str(&format!("{}: ", entry.target.bright_blue()));
            } else {
                line.push_str(&format!("{}: ", entry.target));
            }
        }

        line.push_str(&entry.message);

        if config.show_file_location {
            if let (Some(file), Some(lineno)) = (&entry.file, entry.line) {
                let location = format!(" ({}:{})", file, lineno);
                if colors {
                    line.push_str(&location.bright_black().to_string());
                } else {
                    line.push_str(&location);
                }
            }
        }

        line
    }

    fn render(entry: &LogEntry, config: &LoggerConfig, colors: bool) -> String {
        if config.output_json {
            serde_json::to_string(entry).unwrap_or_else(|_| entry.message.clone())
        } else {
            Self::format_line(entry, config, colors)
        }
    }
}

fn is_noisy(target: &str, level: Level) -> bool {
    level > Level::Info && NOISY_TARGETS.iter().any(|prefix| target.starts_with(prefix))
}

impl log::Log for ServerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if is_noisy(metadata.target(), metadata.level()) {
            return false;
        }
        match self.config.lock() {
            Ok(config) => metadata.level() <= config.min_level.to_level(),
            Err(_) => true,
        }
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let entry = LogEntry::from_record(record);
        let Ok(config) = self.config.lock() else {
            return;
        };

        println!("{}", Self::render(&entry, &config, config.show_colors));

        if let Ok(mut guard) = self.log_file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = writeln!(file, "{}", Self::render(&entry, &config, false));
            }
        }
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
        if let Ok(mut guard) = self.log_file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

/// Measures an operation; logs its duration at debug level when dropped.
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        Self {
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        log::debug!(
            "{} finished in {}ms",
            self.name,
            self.elapsed().as_millis()
        );
    }
}

pub fn timer(name: &str) -> Timer {
    Timer::new(name)
}

pub fn log_startup_info(app_name: &str, version: &str, config: &ServerConfig) {
    log::info!("Starting {} v{}", app_name, version);
    log::info!("Listening on http://{}:{}", config.host, config.port);
}

pub fn log_config_info(config: &ServerConfig) {
    log::info!("Configuration loaded:");
    log::info!("   Debug mode: {}", config.debug);
    match config.backend {
        BackendKind::Remote => {
            log::info!("   Backend: remote ({})", config.remote.url);
            log::info!("   Timeout: {}s", config.remote.timeout.as_secs());
            log::info!(
                "   Auth token: {}",
                if config.remote.auth_token.is_some() { "set" } else { "missing" }
            );
        }
        BackendKind::Local => {
            log::info!("   Backend: local ({})", config.local.executable.display());
            log::info!(
                "   Model: {}",
                config
                    .local
                    .model_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "missing".to_string())
            );
            log::info!("   Steps: {}", config.local.steps);
        }
    }
    log::info!("   Static dir: {}", config.static_dir.display());
    log::info!("   Upload dir: {}", config.upload_dir.display());
    if let Some(path) = &config.log_file {
        log::info!("   Log file: {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: LogLevel, message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level,
            target: "promptcanvas::server".to_string(),
            message: message.to_string(),
            file: Some("src/server/mod.rs".to_string()),
            line: Some(42),
        }
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(LogLevel::Info.as_str(), "INFO");
        assert_eq!(LogLevel::Debug.color(), Color::Blue);
        assert_eq!(LogLevel::from_level(Level::Warn), LogLevel::Warn);
        assert!(LogLevel::Error > LogLevel::Info);
    }

    #[test]
    fn test_logger_profiles() {
        let dev = LoggerConfig::for_mode(true);
        assert_eq!(dev.min_level, LogLevel::Debug);
        assert!(dev.show_file_location);

        let default = LoggerConfig::for_mode(false);
        assert_eq!(default.min_level, LogLevel::Info);

        let prod = LoggerConfig::production();
        assert!(!prod.show_colors);
        assert!(prod.output_json);
    }

    #[test]
    fn test_profile_follows_server_config() {
        let text = LoggerConfig::from_server_config(&ServerConfig::default());
        assert!(!text.output_json);
        assert!(text.log_file.is_none());

        let config = ServerConfig::default()
            .with_log_format(LogFormat::Json)
            .with_log_file("/var/log/promptcanvas.log");
        let json = LoggerConfig::from_server_config(&config);
        assert!(json.output_json);
        assert!(!json.show_colors);
        assert_eq!(json.min_level, LogLevel::Info);
        assert_eq!(json.log_file, Some(PathBuf::from("/var/log/promptcanvas.log")));

        let debug_json = ServerConfig {
            debug: true,
            ..config
        };
        let logger = LoggerConfig::from_server_config(&debug_json);
        assert!(logger.output_json);
        assert_eq!(logger.min_level, LogLevel::Debug);
    }

    #[test]
    fn test_plain_line_format() {
        let config = LoggerConfig::development().with_colors(false);
        let line =
            ServerLogger::format_line(&entry(LogLevel::Warn, "slow backend"), &config, false);
        assert!(line.contains("[WARN ] promptcanvas::server: slow backend"));
        assert!(line.ends_with("(src/server/mod.rs:42)"));
    }

    #[test]
    fn test_json_line_format() {
        let config = LoggerConfig::production();
        let line = ServerLogger::render(&entry(LogLevel::Info, "ready"), &config, false);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["level"], "Info");
        assert_eq!(parsed["message"], "ready");
    }

    #[test]
    fn test_noisy_targets_filtered_below_info() {
        assert!(is_noisy("hyper::proto::h1", Level::Debug));
        assert!(!is_noisy("hyper::proto::h1", Level::Warn));
        assert!(!is_noisy("promptcanvas::inference", Level::Debug));
    }

    #[test]
    fn test_logger_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggerConfig::development().with_file_output(dir.path().join("server.log"));
        assert!(init_with_config(config).is_ok());
    }
}
