//! Pool configuration using Figment
//!
//! Configuration is loaded from, in increasing priority:
//! 1. built-in defaults
//! 2. a TOML file (`va-pool.toml` unless a path is given)
//! 3. environment variables prefixed with `VAPOOL_`, nested keys joined by `__`
//!
//! ```text
//! VAPOOL_LOG_LEVEL=debug
//! VAPOOL_POOL__MAX_BUFFERS=8
//! VAPOOL_POOL__ALLOCATOR=dmabuf
//! ```
//!
//! # Example
//!
//! ```no_run
//! use va_core::config::Settings;
//!
//! let settings = Settings::load().unwrap();
//! println!("allocator: {:?}", settings.pool.allocator);
//! ```

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::UsageHint;
use crate::format::VideoFormat;
use crate::limits::MAX_FRAME_DIMENSION;
use crate::video::VideoAlignment;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "va-pool.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings sources could not be read or parsed.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// A value is out of range.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Which allocator backs the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorKind {
    /// One in-process mappable memory per surface.
    #[default]
    Surface,
    /// Surfaces exported as DMA-BUF, one memory per plane.
    Dmabuf,
}

/// Buffer pool policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Allocator backing the pool.
    #[serde(default)]
    pub allocator: AllocatorKind,
    /// Buffers preallocated when the pool starts
    #[serde(default = "default_min_buffers")]
    pub min_buffers: u32,
    /// Upper bound on live buffers, 0 for unbounded
    #[serde(default = "default_max_buffers")]
    pub max_buffers: u32,
    /// Usage hint passed to surface creation.
    #[serde(default)]
    pub usage_hint: UsageHint,
    /// Attach plane layout metadata to every buffer
    #[serde(default)]
    pub video_meta: bool,
    /// Padding and stride masks requested from the pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<VideoAlignment>,
}

/// Stream geometry the tools negotiate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Image format of the stream.
    #[serde(default = "default_format")]
    pub format: VideoFormat,
    /// Width in pixels.
    #[serde(default = "default_width")]
    pub width: u32,
    /// Height in pixels.
    #[serde(default = "default_height")]
    pub height: u32,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Log filter, e.g. `info` or `va_pool=debug`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON lines instead of human-readable logs.
    #[serde(default)]
    pub json_logs: bool,
    /// Buffer pool policy.
    #[serde(default)]
    pub pool: PoolSettings,
    /// Stream geometry.
    #[serde(default)]
    pub stream: StreamSettings,
}

fn default_min_buffers() -> u32 {
    4
}

fn default_max_buffers() -> u32 {
    16
}

fn default_format() -> VideoFormat {
    VideoFormat::Nv12
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            allocator: AllocatorKind::default(),
            min_buffers: default_min_buffers(),
            max_buffers: default_max_buffers(),
            usage_hint: UsageHint::default(),
            video_meta: false,
            alignment: None,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            format: default_format(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            pool: PoolSettings::default(),
            stream: StreamSettings::default(),
        }
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_FILE`] (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("VAPOOL_").split("__"))
            .extract()
            .map_err(Box::new)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        let pool = &self.pool;
        if pool.max_buffers != 0 && pool.min_buffers > pool.max_buffers {
            return Err(ConfigError::ValidationError(format!(
                "min_buffers ({}) exceeds max_buffers ({})",
                pool.min_buffers, pool.max_buffers
            )));
        }

        let stream = &self.stream;
        if stream.width == 0 || stream.height == 0 {
            return Err(ConfigError::ValidationError(format!(
                "Stream geometry {}x{} must be non-zero",
                stream.width, stream.height
            )));
        }
        if stream.width > MAX_FRAME_DIMENSION || stream.height > MAX_FRAME_DIMENSION {
            return Err(ConfigError::ValidationError(format!(
                "Stream geometry {}x{} exceeds {MAX_FRAME_DIMENSION}",
                stream.width, stream.height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_defaults_when_file_missing() {
        let settings = Settings::load_from("/nonexistent/va-pool.toml").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    #[serial]
    fn test_load_from_toml() {
        let file = write_config(
            r#"
log_level = "debug"

[pool]
allocator = "dmabuf"
min_buffers = 2
max_buffers = 8
usage_hint = "decoder"
video_meta = true

[pool.alignment]
padding_bottom = 8
stride_align = [63, 63, 0, 0]

[stream]
format = "p010_10le"
width = 640
height = 480
"#,
        );
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.pool.allocator, AllocatorKind::Dmabuf);
        assert_eq!(settings.pool.usage_hint, UsageHint::Decoder);
        assert_eq!((settings.pool.min_buffers, settings.pool.max_buffers), (2, 8));
        let alignment = settings.pool.alignment.unwrap();
        assert_eq!(alignment.padding_bottom, 8);
        assert_eq!(alignment.padding_top, 0);
        assert_eq!(alignment.stride_align, [63, 63, 0, 0]);
        assert_eq!(settings.stream.format, VideoFormat::P010);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config("[pool]\nmax_buffers = 8\n");
        std::env::set_var("VAPOOL_POOL__MAX_BUFFERS", "12");
        let result = Settings::load_from(file.path());
        std::env::remove_var("VAPOOL_POOL__MAX_BUFFERS");
        assert_eq!(result.unwrap().pool.max_buffers, 12);
    }

    #[test]
    #[serial]
    fn test_min_above_max_rejected() {
        let file = write_config("[pool]\nmin_buffers = 9\nmax_buffers = 8\n");
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    #[serial]
    fn test_unbounded_pool_accepts_any_minimum() {
        let file = write_config("[pool]\nmin_buffers = 32\nmax_buffers = 0\n");
        assert!(Settings::load_from(file.path()).is_ok());
    }

    #[test]
    #[serial]
    fn test_invalid_log_level() {
        let file = write_config("log_level = \"loud\"\n");
        assert!(Settings::load_from(file.path()).is_err());
    }
}
