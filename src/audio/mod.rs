//! Audio framing, buffering, and session control

mod buffer;
mod capture;
mod engine;
pub mod pcm;
mod playback;
mod session;

pub use buffer::{Overflow, RingBuffer};
pub use capture::{CaptureFramer, CaptureInput, CapturePump, CaptureStats};
pub use engine::{AudioPipeline, Driver, PipelineConfig, CAPTURE_SAMPLE_RATE};
pub use playback::{PlaybackFramer, PlaybackOutput, PlaybackPump, PlaybackStats};
pub use session::{Pump, SessionState, Step};

use crate::error::{PaceError, Result};
use std::time::Duration;

/// Supported frame rates (frames exchanged per second)
pub const FRAME_RATE_RANGE: std::ops::RangeInclusive<u32> = 1..=1000;

/// Immutable per-session frame layout
///
/// Samples are always PCM16 on the RTC side. A frame carries
/// `sample_rate / frames_per_second` samples for every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    sample_rate: u32,
    channels: u16,
    frames_per_second: u32,
}

impl FrameSpec {
    /// Validate and build a frame layout
    pub fn new(sample_rate: u32, channels: u16, frames_per_second: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(PaceError::InvalidConfig(
                "sample rate must be non-zero".to_string(),
            ));
        }
        if !(1..=2).contains(&channels) {
            return Err(PaceError::InvalidConfig(format!(
                "channel count must be 1 or 2, got {}",
                channels
            )));
        }
        if !FRAME_RATE_RANGE.contains(&frames_per_second) {
            return Err(PaceError::InvalidConfig(format!(
                "frame rate must be within {:?} Hz, got {}",
                FRAME_RATE_RANGE, frames_per_second
            )));
        }
        if sample_rate % frames_per_second != 0 {
            return Err(PaceError::InvalidConfig(format!(
                "{} Hz does not divide into {} frames per second",
                sample_rate, frames_per_second
            )));
        }

        Ok(Self {
            sample_rate,
            channels,
            frames_per_second,
        })
    }

    /// Layout for built-in defaults, which are known to pass `new`
    pub(crate) const fn preset(sample_rate: u32, channels: u16, frames_per_second: u32) -> Self {
        Self {
            sample_rate,
            channels,
            frames_per_second,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames_per_second(&self) -> u32 {
        self.frames_per_second
    }

    /// Samples per channel in one frame
    pub fn samples_per_channel(&self) -> usize {
        (self.sample_rate / self.frames_per_second) as usize
    }

    /// Interleaved samples in one frame (all channels)
    pub fn frame_samples(&self) -> usize {
        self.samples_per_channel() * self.channels as usize
    }

    /// PCM16 bytes in one frame
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * pcm::BYTES_PER_SAMPLE
    }

    /// Cadence interval between frames
    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.frames_per_second
    }

    /// Interleaved samples held by `ms` milliseconds of audio
    pub fn buffer_samples_for_ms(&self, ms: u32) -> usize {
        (self.sample_rate as u64 * self.channels as u64 * ms as u64 / 1000) as usize
    }
}

impl std::fmt::Display for FrameSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz {}ch 16bit @ {} frames/s",
            self.sample_rate, self.channels, self.frames_per_second
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let spec = FrameSpec::new(48000, 2, 100).unwrap();
        assert_eq!(spec.samples_per_channel(), 480);
        assert_eq!(spec.frame_samples(), 960);
        assert_eq!(spec.frame_bytes(), 1920);
        assert_eq!(spec.interval(), Duration::from_millis(10));
        assert_eq!(spec.buffer_samples_for_ms(1000), 96000);
    }

    #[test]
    fn test_fractional_interval_keeps_precision() {
        let spec = FrameSpec::new(48000, 1, 30).unwrap();
        assert_eq!(spec.samples_per_channel(), 1600);
        assert_eq!(spec.interval().as_nanos(), 33_333_333);
    }

    #[test]
    fn test_rejects_invalid_layouts() {
        assert!(FrameSpec::new(0, 1, 100).is_err());
        assert!(FrameSpec::new(48000, 3, 100).is_err());
        assert!(FrameSpec::new(48000, 0, 100).is_err());
        assert!(FrameSpec::new(48000, 1, 0).is_err());
        assert!(FrameSpec::new(44100, 1, 8).is_err());
    }

    #[test]
    fn test_display() {
        let spec = FrameSpec::new(44100, 1, 100).unwrap();
        assert_eq!(spec.to_string(), "44100Hz 1ch 16bit @ 100 frames/s");
    }
}
