//! Logging System
//!
//! Structured logging using the `tracing` crate. The library only emits events; an embedding
//! application that wants them formatted can call [`init_logging`] once at startup.

use crate::error::CoordinatorError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text (default: text)
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path (if output is "file")
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Enable colored output (text format only, stdout/stderr only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Module-specific log levels
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stdout".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("flagstate.log")
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: default_log_file(),
            color: default_true(),
            modules: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), String> {
        parse_format(&self.format)?;
        parse_output(&self.output)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogOutput {
    Stdout,
    Stderr,
    File,
}

/// Initialize the global tracing subscriber.
///
/// Priority order (highest to lowest):
/// 1. Environment variables (FLAGSTATE_LOG, FLAGSTATE_LOG_FORMAT, FLAGSTATE_LOG_OUTPUT,
///    FLAGSTATE_LOG_MODULES)
/// 2. Configuration
/// 3. Defaults
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), CoordinatorError> {
    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;
    let output = determine_output(config)?;
    let use_color = config.map(|c| c.color).unwrap_or(true) && output != LogOutput::File;

    let writer = match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File => {
            let log_file = config
                .map(|c| c.file.clone())
                .unwrap_or_else(default_log_file);
            if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CoordinatorError::Config(format!("Failed to create log directory: {}", e))
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .map_err(|e| {
                    CoordinatorError::Config(format!(
                        "Failed to open log file {:?}: {}",
                        log_file, e
                    ))
                })?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
    };

    let base_subscriber = Registry::default().with(filter);
    let result = match format {
        LogFormat::Json => base_subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => base_subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(use_color)
                    .with_writer(writer),
            )
            .try_init(),
    };

    result.map_err(|e| CoordinatorError::Config(format!("Failed to install logger: {}", e)))
}

/// Build environment filter from config or environment variables
fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, CoordinatorError> {
    if let Ok(filter) = EnvFilter::try_from_env("FLAGSTATE_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    if level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(level);

    if let Some(config) = config {
        for (module, module_level) in &config.modules {
            filter = filter.add_directive(parse_directive(module, module_level)?);
        }
    }

    if let Ok(modules_str) = std::env::var("FLAGSTATE_LOG_MODULES") {
        for module_spec in modules_str.split(',') {
            if let Some((module, module_level)) = module_spec.split_once('=') {
                filter = filter.add_directive(parse_directive(module.trim(), module_level.trim())?);
            }
        }
    }

    Ok(filter)
}

fn parse_directive(
    module: &str,
    level: &str,
) -> Result<tracing_subscriber::filter::Directive, CoordinatorError> {
    format!("{}={}", module, level)
        .parse()
        .map_err(|e| CoordinatorError::Config(format!("Invalid log directive: {}", e)))
}

fn determine_format(config: Option<&LoggingConfig>) -> Result<LogFormat, CoordinatorError> {
    if let Ok(format) = std::env::var("FLAGSTATE_LOG_FORMAT") {
        if let Ok(format) = parse_format(&format) {
            return Ok(format);
        }
    }
    parse_format(config.map(|c| c.format.as_str()).unwrap_or("text"))
        .map_err(CoordinatorError::Config)
}

fn determine_output(config: Option<&LoggingConfig>) -> Result<LogOutput, CoordinatorError> {
    if let Ok(output) = std::env::var("FLAGSTATE_LOG_OUTPUT") {
        return parse_output(&output).map_err(CoordinatorError::Config);
    }
    parse_output(config.map(|c| c.output.as_str()).unwrap_or("stdout"))
        .map_err(CoordinatorError::Config)
}

fn parse_format(format: &str) -> Result<LogFormat, String> {
    match format {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(format!(
            "Invalid log format: {} (must be 'json' or 'text')",
            other
        )),
    }
}

fn parse_output(output: &str) -> Result<LogOutput, String> {
    match output {
        "stdout" => Ok(LogOutput::Stdout),
        "stderr" => Ok(LogOutput::Stderr),
        "file" => Ok(LogOutput::File),
        other => Err(format!(
            "Invalid log output: {} (must be 'stdout', 'stderr', or 'file')",
            other
        )),
    }
}
