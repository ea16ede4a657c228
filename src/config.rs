//! Configuration file support for trackconv.
//!
//! A JSON file holding the defaults a conversion falls back to when the
//! command line does not say otherwise.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::format::{DEFAULT_CATEGORY, ExportOptions, ImportOptions};

/// Log level setting for the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Parse a level name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Converter defaults loaded from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Version of the configuration file format
    #[serde(default = "default_version")]
    pub version: u32,

    /// Log verbosity level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Category for MOT class ids missing from `labels.txt`
    #[serde(default = "default_category")]
    pub default_category: String,

    /// Frames per second for `seqinfo.ini` and Label Studio timings; unset
    /// keeps the source's rate (MOT falls back to 30)
    #[serde(default)]
    pub frame_rate: Option<f64>,

    #[serde(default)]
    pub video_width: Option<u32>,

    #[serde(default)]
    pub video_height: Option<u32>,

    #[serde(default)]
    pub seq_length: Option<u32>,

    /// CVAT `<source>` / MOT sequence name override
    #[serde(default)]
    pub video_name: Option<String>,

    /// Label Studio `data.video`
    #[serde(default)]
    pub video_path: Option<String>,

    /// Whether `ffprobe` may be called for missing dimensions
    #[serde(default = "default_probe_videos")]
    pub probe_videos: bool,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_probe_videos() -> bool {
    true
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            log_level: LogLevel::default(),
            default_category: default_category(),
            frame_rate: None,
            video_width: None,
            video_height: None,
            seq_length: None,
            video_name: None,
            video_path: None,
            probe_videos: default_probe_videos(),
        }
    }
}

impl ConverterConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        // Validate version compatibility
        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        Ok(config)
    }

    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = self.to_json()?;
        std::fs::write(path, json)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Options for the importing codec.
    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            video_width: self.video_width,
            video_height: self.video_height,
            video_file: None,
            default_category: Some(self.default_category.clone()),
            probe: self.probe_videos,
        }
    }

    /// Options for the exporting codec.
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            video_width: self.video_width,
            video_height: self.video_height,
            seq_length: self.seq_length,
            frame_rate: self.frame_rate,
            video_name: self.video_name.clone(),
            video_path: self.video_path.clone(),
            video_file: None,
            probe: self.probe_videos,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
