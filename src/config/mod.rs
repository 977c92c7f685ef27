//! Command line and configuration file handling

mod args;
mod settings;

pub use args::{Args, Command};
pub use settings::{
    CaptureSettings, ConfigError, DeviceSettings, PlaybackSettings, Settings, LOCAL_CONFIG_FILE,
};
