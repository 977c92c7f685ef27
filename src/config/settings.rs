//! Configuration file support

use crate::audio::{Driver, FrameSpec, PipelineConfig, CAPTURE_SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "framepace.toml";

/// Capture frame layout and buffer length
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_second: u32,
    /// Ring buffer length in milliseconds
    pub buffer_ms: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: 1,
            frames_per_second: 100,
            buffer_ms: 10_000,
        }
    }
}

/// Playback frame layout and buffer length
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_second: u32,
    /// Ring buffer length in milliseconds
    pub buffer_ms: u32,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
            frames_per_second: 100,
            buffer_ms: 1_000,
        }
    }
}

/// Hardware device selection (empty = system default)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub input: String,
    pub output: String,
}

/// Settings loaded from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Thread or cooperative driver
    pub driver: Driver,

    /// Overdue intervals tolerated before missed ticks are skipped
    pub max_catch_up: u32,

    /// Microphone batches ingested before capture emits frames
    pub warmup_batches: u32,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (empty = no file logging)
    pub log_file: String,

    pub capture: CaptureSettings,

    pub playback: PlaybackSettings,

    pub device: DeviceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            driver: Driver::Thread,
            max_catch_up: 2,
            warmup_batches: 20,
            log_level: "info".to_string(),
            log_file: String::new(),
            capture: CaptureSettings::default(),
            playback: PlaybackSettings::default(),
            device: DeviceSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Load settings from default locations
    ///
    /// Searches in order:
    /// 1. Working directory: framepace.toml
    /// 2. User config directory: framepace/config.toml
    pub fn load_default() -> Result<Self, ConfigError> {
        for path in Self::search_paths() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        // Return default settings if no file found
        Ok(Self::default())
    }

    /// Candidate paths for [`Settings::load_default`], in priority order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("framepace").join("config.toml"));
        }
        paths
    }

    /// Save settings to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;

        // Create parent directories if needed
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Build and validate the runtime pipeline configuration
    pub fn to_pipeline_config(&self) -> crate::Result<PipelineConfig> {
        let config = PipelineConfig {
            capture: FrameSpec::new(
                self.capture.sample_rate,
                self.capture.channels,
                self.capture.frames_per_second,
            )?,
            playback: FrameSpec::new(
                self.playback.sample_rate,
                self.playback.channels,
                self.playback.frames_per_second,
            )?,
            warmup_batches: self.warmup_batches,
            capture_buffer_ms: self.capture.buffer_ms,
            playback_buffer_ms: self.playback.buffer_ms,
            max_catch_up: self.max_catch_up,
            driver: self.driver,
        };
        config.validate()?;
        Ok(config)
    }

    /// Input device name, if one is configured
    pub fn input_device(&self) -> Option<&str> {
        Some(self.device.input.as_str()).filter(|name| !name.is_empty())
    }

    /// Output device name, if one is configured
    pub fn output_device(&self) -> Option<&str> {
        Some(self.device.output.as_str()).filter(|name| !name.is_empty())
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# framepace configuration

# Cadence driver: "thread" (background workers) or "cooperative" (host calls update)
driver = "thread"

# Overdue intervals drained back-to-back before missed ticks are skipped
max_catch_up = 2

# Microphone batches buffered before the first capture frame is sent
warmup_batches = 20

# Log level: trace, debug, info, warn, error (default: info)
log_level = "info"

# Log file path (empty = no file logging)
log_file = ""

# Frames pushed to the RTC engine (PCM16)
[capture]
sample_rate = 48000
channels = 1
frames_per_second = 100
buffer_ms = 10000

# Frames pulled from the RTC engine
[playback]
sample_rate = 44100
channels = 1
frames_per_second = 100
buffer_ms = 1000

# Hardware devices by name (empty = system default)
[device]
input = ""
output = ""
"#
        .to_string()
    }
}

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading/writing config file
    #[error("Failed to access config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing TOML
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// Error serializing settings
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_matches_defaults() {
        let parsed: Settings = toml::from_str(&Settings::sample_config()).unwrap();
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Settings = toml::from_str(
            r#"
driver = "cooperative"

[playback]
sample_rate = 48000
"#,
        )
        .unwrap();

        assert_eq!(parsed.driver, Driver::Cooperative);
        assert_eq!(parsed.warmup_batches, 20);
        assert_eq!(parsed.playback.sample_rate, 48000);
        assert_eq!(parsed.playback.buffer_ms, 1_000);
        assert_eq!(parsed.capture, CaptureSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut settings = Settings::default();
        settings.max_catch_up = 4;
        settings.device.input = "USB Mic".to_string();
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.input_device(), Some("USB Mic"));
        assert_eq!(loaded.output_device(), None);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Settings::load(&missing),
            Err(ConfigError::Io { .. })
        ));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "driver = [").unwrap();
        assert!(matches!(
            Settings::load(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_to_pipeline_config() {
        let config = Settings::default().to_pipeline_config().unwrap();
        assert_eq!(config.capture.frame_bytes(), 960);
        assert_eq!(config.playback.frame_samples(), 441);
        assert_eq!(config.capture_buffer_ms, 10_000);

        let mut settings = Settings::default();
        settings.playback.frames_per_second = 8;
        assert!(settings.to_pipeline_config().is_err());
    }
}
