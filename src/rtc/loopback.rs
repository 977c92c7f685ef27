//! In-process RTC engine that plays captured frames back

use super::{AudioFrame, FrameSink, FrameSource, RtcStatus};
use crate::audio::FrameSpec;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};

/// Bounded frame queue acting as both a capture sink and a playback source
///
/// Pushed frames are returned by later pulls, oldest first. Both sides must
/// use the layout the engine was created with.
pub struct LoopbackEngine {
    spec: FrameSpec,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pushed: AtomicU64,
    pulled: AtomicU64,
}

impl LoopbackEngine {
    /// Create an engine holding at most `queue_frames` frames
    pub fn new(spec: FrameSpec, queue_frames: usize) -> Self {
        let (tx, rx) = bounded(queue_frames.max(1));
        Self {
            spec,
            tx,
            rx,
            pushed: AtomicU64::new(0),
            pulled: AtomicU64::new(0),
        }
    }

    pub fn spec(&self) -> &FrameSpec {
        &self.spec
    }

    /// Frames waiting to be pulled
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    pub fn frames_pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn frames_pulled(&self) -> u64 {
        self.pulled.load(Ordering::Relaxed)
    }
}

impl FrameSink for LoopbackEngine {
    fn push_frame(&self, frame: &AudioFrame) -> RtcStatus {
        if !frame.matches(&self.spec) {
            return RtcStatus::FORMAT_MISMATCH;
        }

        match self.tx.try_send(frame.pcm.clone()) {
            Ok(()) => {
                self.pushed.fetch_add(1, Ordering::Relaxed);
                RtcStatus::OK
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                RtcStatus::QUEUE_FULL
            }
        }
    }
}

impl FrameSource for LoopbackEngine {
    fn pull_frame(&self, frame: &mut AudioFrame) -> RtcStatus {
        if !frame.matches(&self.spec) {
            return RtcStatus::FORMAT_MISMATCH;
        }

        match self.rx.try_recv() {
            Ok(pcm) => {
                frame.pcm.copy_from_slice(&pcm);
                self.pulled.fetch_add(1, Ordering::Relaxed);
                RtcStatus::OK
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => RtcStatus::NO_FRAME,
        }
    }
}
