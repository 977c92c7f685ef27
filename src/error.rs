//! Unified error types for framepace

use std::time::Duration;
use thiserror::Error;

/// Main error type for framepace operations
#[derive(Error, Debug)]
pub enum PaceError {
    /// `get()` on an empty ring buffer
    #[error("Ring buffer is empty")]
    EmptyBuffer,

    /// Ring buffer storage could not be allocated
    #[error("Failed to allocate ring buffer of {requested} elements")]
    BufferAllocation { requested: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Required audio device missing
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Device operation error
    #[error("Device '{device}' error: {message}")]
    Device { device: String, message: String },

    /// RTC engine handle not yet published
    #[error("RTC engine not ready")]
    EngineNotReady,

    /// Waiting for the RTC engine handle timed out
    #[error("Timed out after {0:?} waiting for RTC engine")]
    ReadinessTimeout(Duration),

    /// Readiness slot was already filled
    #[error("RTC engine handle already set")]
    AlreadySatisfied,

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Result type alias for framepace operations
pub type Result<T> = std::result::Result<T, PaceError>;

impl PaceError {
    /// Create a device error with context
    pub fn device_error(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Device {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PaceError::Device { .. }
                | PaceError::EngineNotReady
                | PaceError::ReadinessTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(PaceError::EngineNotReady.is_recoverable());
        assert!(PaceError::device_error("mic", "busy").is_recoverable());
        assert!(!PaceError::EmptyBuffer.is_recoverable());
        assert!(!PaceError::BufferAllocation { requested: 4 }.is_recoverable());
    }

    #[test]
    fn test_device_error_message() {
        let err = PaceError::device_error("Built-in Mic", "stream closed");
        assert_eq!(err.to_string(), "Device 'Built-in Mic' error: stream closed");
    }
}
