//! Boundary with the real-time-communication engine
//!
//! The capture pipeline hands frames to a [`FrameSink`]; the playback
//! pipeline fills frames from a [`FrameSource`]. Both are called from the
//! cadence worker, never from a platform audio callback, and never while a
//! ring buffer lock is held.

mod loopback;
mod ready;

pub use loopback::LoopbackEngine;
pub use ready::EngineSlot;

use crate::audio::{pcm, FrameSpec};

/// Status code returned by the RTC engine (0 = success)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RtcStatus(pub i32);

impl RtcStatus {
    pub const OK: RtcStatus = RtcStatus(0);
    /// Engine queue cannot accept another frame
    pub const QUEUE_FULL: RtcStatus = RtcStatus(-1);
    /// No frame is available to pull
    pub const NO_FRAME: RtcStatus = RtcStatus(-2);
    /// Frame layout does not match the engine's configuration
    pub const FORMAT_MISMATCH: RtcStatus = RtcStatus(-3);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub fn code(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for RtcStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rc={}", self.0)
    }
}

/// One PCM16 frame exchanged with the RTC engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
    pub samples_per_channel: usize,
    /// Interleaved little-endian PCM16
    pub pcm: Vec<u8>,
    /// Scheduled time of this frame, in ms since the session's cadence start
    pub render_time_ms: u64,
}

impl AudioFrame {
    /// Allocate a silent frame laid out for `spec`
    pub fn for_spec(spec: &FrameSpec) -> Self {
        Self {
            sample_rate: spec.sample_rate(),
            channels: spec.channels(),
            bytes_per_sample: pcm::BYTES_PER_SAMPLE as u16,
            samples_per_channel: spec.samples_per_channel(),
            pcm: vec![0u8; spec.frame_bytes()],
            render_time_ms: 0,
        }
    }

    /// Check the frame's layout against `spec`
    pub fn matches(&self, spec: &FrameSpec) -> bool {
        self.sample_rate == spec.sample_rate()
            && self.channels == spec.channels()
            && self.samples_per_channel == spec.samples_per_channel()
            && self.pcm.len() == spec.frame_bytes()
    }
}

/// Receives captured frames (the RTC engine's external audio source input)
///
/// Must not block longer than one cadence interval.
pub trait FrameSink: Send + Sync {
    fn push_frame(&self, frame: &AudioFrame) -> RtcStatus;
}

/// Supplies frames for playback (the RTC engine's external audio sink output)
///
/// Fills the pre-sized `frame.pcm` in place.
pub trait FrameSource: Send + Sync {
    fn pull_frame(&self, frame: &mut AudioFrame) -> RtcStatus;
}
