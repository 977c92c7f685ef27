//! Audio device enumeration using cpal

use crate::error::{PaceError, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use std::fmt;
use tracing::debug;

/// Direction of an audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

/// Information about an audio device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Human-readable device name
    pub name: String,
    pub kind: DeviceKind,
    /// Whether this is the host's default device for its direction
    pub is_default: bool,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DeviceKind::Input => "[in] ",
            DeviceKind::Output => "[out]",
        };
        let default_marker = if self.is_default { " (default)" } else { "" };
        write!(f, "{} {}{}", kind, self.name, default_marker)
    }
}

/// Enumerate input and output devices of the default host
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    debug!("Enumerating devices on host {:?}", host.id());

    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();

    let inputs = host
        .input_devices()
        .map_err(|e| PaceError::device_error("input", e.to_string()))?;
    for device in inputs {
        let Ok(name) = device.name() else { continue };
        devices.push(DeviceInfo {
            is_default: default_input.as_deref() == Some(name.as_str()),
            name,
            kind: DeviceKind::Input,
        });
    }

    let outputs = host
        .output_devices()
        .map_err(|e| PaceError::device_error("output", e.to_string()))?;
    for device in outputs {
        let Ok(name) = device.name() else { continue };
        devices.push(DeviceInfo {
            is_default: default_output.as_deref() == Some(name.as_str()),
            name,
            kind: DeviceKind::Output,
        });
    }

    Ok(devices)
}

/// Find an input device by name substring, or the default input
pub(crate) fn find_input(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| PaceError::DeviceUnavailable("no default input device".to_string())),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| PaceError::device_error(wanted, e.to_string()))?
            .find(|d| d.name().map(|n| n.contains(wanted)).unwrap_or(false))
            .ok_or_else(|| PaceError::DeviceUnavailable(format!("input device '{}'", wanted))),
    }
}

/// Find an output device by name substring, or the default output
pub(crate) fn find_output(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| PaceError::DeviceUnavailable("no default output device".to_string())),
        Some(wanted) => host
            .output_devices()
            .map_err(|e| PaceError::device_error(wanted, e.to_string()))?
            .find(|d| d.name().map(|n| n.contains(wanted)).unwrap_or(false))
            .ok_or_else(|| PaceError::DeviceUnavailable(format!("output device '{}'", wanted))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_info_display() {
        let info = DeviceInfo {
            name: "Speakers".to_string(),
            kind: DeviceKind::Output,
            is_default: true,
        };
        assert_eq!(info.to_string(), "[out] Speakers (default)");

        let info = DeviceInfo {
            name: "USB Mic".to_string(),
            kind: DeviceKind::Input,
            is_default: false,
        };
        assert_eq!(info.to_string(), "[in]  USB Mic");
    }
}
