//! Configuration for audioplay
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (and their `AUDIOPLAY_*` environment variables)
//! 2. TOML configuration file (`--config`, else `<config dir>/audioplay/config.toml`)
//! 3. Built-in defaults
//!
//! A missing TOML file is not an error: defaults are used and the caller
//! logs a warning once logging is up.

use crate::audio::sink::SinkKind;
use crate::audio::types::{Destination, PcmFormat, SessionConfig, BUFFER_SIZE_SAMPLES};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_BIT_DEPTH: u16 = 16;
pub const DEFAULT_NUM_BUFFERS: u32 = 10;
pub const DEFAULT_DURATION_SECS: u64 = 5;

/// Contents of the TOML file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybackConfig {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bit_depth: Option<u16>,
    pub num_buffers: Option<u32>,
    pub duration_secs: Option<u64>,
    pub destination: Option<Destination>,
    pub sink: Option<SinkKind>,
    pub device: Option<String>,
}

/// Where the TOML settings came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file; `missing` is the path that was looked for, if any
    Defaults { missing: Option<PathBuf> },
}

/// `<config dir>/audioplay/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("audioplay").join("config.toml"))
}

impl TomlConfig {
    /// Parse a TOML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let toml_str = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(&toml_str)
    }

    pub fn parse(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Load `explicit`, else the default path; fall back to defaults when
    /// the file does not exist. A file that exists but does not parse is an
    /// error.
    pub async fn load_or_default(explicit: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path(),
        };

        match path {
            Some(path) if path.exists() => {
                let config = Self::load(&path).await?;
                Ok((config, ConfigSource::File(path)))
            }
            missing => Ok((Self::default(), ConfigSource::Defaults { missing })),
        }
    }
}

/// Values given on the command line (already merged with environment)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bit_depth: Option<u16>,
    pub num_buffers: Option<u32>,
    pub duration_secs: Option<u64>,
    pub destination: Option<Destination>,
    pub sink: Option<SinkKind>,
    pub device: Option<String>,
}

/// Fully resolved run settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub num_buffers: u32,
    pub duration_secs: u64,
    pub destination: Destination,
    pub sink: SinkKind,
    pub device: Option<String>,
    pub log_level: String,
}

impl Settings {
    /// Merge overrides over the TOML file over built-in defaults.
    pub fn resolve(toml: &TomlConfig, overrides: ConfigOverrides) -> Self {
        let file = &toml.playback;

        Self {
            sample_rate: overrides
                .sample_rate
                .or(file.sample_rate)
                .unwrap_or(DEFAULT_SAMPLE_RATE),
            channels: overrides.channels.or(file.channels).unwrap_or(DEFAULT_CHANNELS),
            bit_depth: overrides.bit_depth.or(file.bit_depth).unwrap_or(DEFAULT_BIT_DEPTH),
            num_buffers: overrides
                .num_buffers
                .or(file.num_buffers)
                .unwrap_or(DEFAULT_NUM_BUFFERS),
            duration_secs: overrides
                .duration_secs
                .or(file.duration_secs)
                .unwrap_or(DEFAULT_DURATION_SECS),
            destination: overrides.destination.or(file.destination).unwrap_or_default(),
            sink: overrides.sink.or(file.sink).unwrap_or_default(),
            device: overrides.device.or_else(|| file.device.clone()),
            log_level: toml.logging.level.clone(),
        }
    }

    /// Validated PCM format for the synthetic run
    pub fn pcm_format(&self) -> Result<PcmFormat> {
        PcmFormat::new(self.sample_rate, self.channels, self.bit_depth)
    }

    /// Session sizing: `num_buffers` buffers of 1024 frames in `format`
    pub fn session_config(&self, format: PcmFormat) -> Result<SessionConfig> {
        SessionConfig::with_frames(format, self.num_buffers, BUFFER_SIZE_SAMPLES)
    }
}
