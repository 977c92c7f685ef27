//! Playback framing: paced PCM16 frames in, on-demand float samples out

use super::buffer::{Overflow, RingBuffer};
use super::pcm;
use super::session::{should_log, FramerSlot, Pump, Step};
use super::FrameSpec;
use crate::error::{PaceError, Result};
use crate::rtc::{AudioFrame, FrameSource};
use crate::sync::{Cadence, CadenceScheduler};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Snapshot of playback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Frames pulled successfully from the source
    pub frames_pulled: u64,
    /// Pull calls that returned an error status
    pub pull_failures: u64,
    /// Samples written into the buffer
    pub samples_written: u64,
    /// Oldest samples evicted on overflow
    pub samples_overwritten: u64,
    /// Samples handed to the output callback from the buffer
    pub samples_served: u64,
    /// Silence samples substituted on underrun
    pub silence_samples: u64,
    /// Samples currently buffered
    pub buffered_samples: usize,
}

#[derive(Default)]
struct Counters {
    frames_pulled: AtomicU64,
    pull_failures: AtomicU64,
    samples_written: AtomicU64,
    samples_overwritten: AtomicU64,
    samples_served: AtomicU64,
    silence_samples: AtomicU64,
    underrun_events: AtomicU64,
}

/// Buffers decoded playback samples for the audio output callback
///
/// The buffer overwrites its oldest samples on overflow, so neither the pull
/// side nor the output callback ever waits for the other.
pub struct PlaybackFramer {
    spec: FrameSpec,
    ring: Mutex<RingBuffer<f32>>,
    counters: Counters,
}

impl PlaybackFramer {
    /// Allocate a framer buffering `buffer_ms` of audio
    pub fn new(spec: FrameSpec, buffer_ms: u32) -> Result<Self> {
        let capacity = spec.buffer_samples_for_ms(buffer_ms);
        if capacity < spec.frame_samples() {
            return Err(PaceError::InvalidConfig(format!(
                "playback buffer of {}ms cannot hold one {}-sample frame",
                buffer_ms,
                spec.frame_samples()
            )));
        }

        let ring = RingBuffer::try_with_capacity(capacity, Overflow::Overwrite)?;
        debug!(
            "Playback buffer: {} samples ({}ms) for {}",
            capacity, buffer_ms, spec
        );

        Ok(Self {
            spec,
            ring: Mutex::new(ring),
            counters: Counters::default(),
        })
    }

    pub fn spec(&self) -> &FrameSpec {
        &self.spec
    }

    /// Append decoded samples, evicting the oldest on overflow
    pub fn push_samples(&self, samples: &[f32]) {
        let overwritten = {
            let mut ring = self.ring.lock();
            let overwritten = samples.len().saturating_sub(ring.free());
            ring.put_slice(samples);
            overwritten
        };

        self.counters
            .samples_written
            .fetch_add(samples.len() as u64, Ordering::Relaxed);
        if overwritten > 0 {
            self.counters
                .samples_overwritten
                .fetch_add(overwritten as u64, Ordering::Relaxed);
            trace!("Playback buffer overflow, evicted {} samples", overwritten);
        }
    }

    /// Decode one PCM16 frame via `scratch` and append it
    pub fn push_frame_pcm(&self, pcm: &[u8], scratch: &mut Vec<f32>) {
        scratch.resize(pcm.len() / pcm::BYTES_PER_SAMPLE, 0.0);
        let decoded = pcm::decode_into(pcm, scratch);
        self.push_samples(&scratch[..decoded]);
    }

    /// Output callback side: fill `out`, substituting silence for missing data
    ///
    /// Never waits for data. Returns the number of samples taken from the
    /// buffer.
    pub fn fill(&self, out: &mut [f32]) -> usize {
        let served = self.ring.lock().pop_slice(out);
        out[served..].fill(0.0);

        self.counters
            .samples_served
            .fetch_add(served as u64, Ordering::Relaxed);

        let silence = out.len() - served;
        if silence > 0 {
            self.counters
                .silence_samples
                .fetch_add(silence as u64, Ordering::Relaxed);
            let events = self.counters.underrun_events.fetch_add(1, Ordering::Relaxed);
            if should_log(events) {
                debug!(
                    "Playback underrun: {} of {} samples silent",
                    silence,
                    out.len()
                );
            }
        }
        served
    }

    pub fn buffered_samples(&self) -> usize {
        self.ring.lock().len()
    }

    /// Discard buffered audio
    pub fn clear(&self) {
        self.ring.lock().clear();
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            frames_pulled: self.counters.frames_pulled.load(Ordering::Relaxed),
            pull_failures: self.counters.pull_failures.load(Ordering::Relaxed),
            samples_written: self.counters.samples_written.load(Ordering::Relaxed),
            samples_overwritten: self.counters.samples_overwritten.load(Ordering::Relaxed),
            samples_served: self.counters.samples_served.load(Ordering::Relaxed),
            silence_samples: self.counters.silence_samples.load(Ordering::Relaxed),
            buffered_samples: self.buffered_samples(),
        }
    }
}

/// Handle given to the audio output callback
///
/// Stays valid across sessions; while no playback session is running it
/// produces silence.
#[derive(Clone)]
pub struct PlaybackOutput {
    slot: FramerSlot<PlaybackFramer>,
}

impl PlaybackOutput {
    pub(crate) fn new(slot: FramerSlot<PlaybackFramer>) -> Self {
        Self { slot }
    }

    /// Fill `out` with interleaved samples; returns samples taken from the buffer
    pub fn fill(&self, out: &mut [f32]) -> usize {
        match self.slot.read().as_ref() {
            Some(framer) => framer.fill(out),
            None => {
                out.fill(0.0);
                0
            }
        }
    }

    /// Whether a playback session is currently supplying samples
    pub fn is_active(&self) -> bool {
        self.slot.read().is_some()
    }
}

/// Cadence-gated producer that pulls frames from a [`FrameSource`]
pub struct PlaybackPump {
    framer: Arc<PlaybackFramer>,
    source: Arc<dyn FrameSource>,
    scheduler: CadenceScheduler,
    frame: AudioFrame,
    scratch: Vec<f32>,
    max_catch_up: u32,
}

impl PlaybackPump {
    pub fn new(
        framer: Arc<PlaybackFramer>,
        source: Arc<dyn FrameSource>,
        start: Duration,
        max_catch_up: u32,
    ) -> Self {
        let spec = *framer.spec();
        Self {
            scheduler: CadenceScheduler::new(start, spec.interval()),
            frame: AudioFrame::for_spec(&spec),
            scratch: Vec::with_capacity(spec.frame_samples()),
            framer,
            source,
            max_catch_up: max_catch_up.max(1),
        }
    }

    /// Completed ticks since the session started
    pub fn tick(&self) -> u64 {
        self.scheduler.tick()
    }
}

impl Pump for PlaybackPump {
    fn step(&mut self, now: Duration) -> Step {
        if let Cadence::Pending(wait) = self.scheduler.poll(now) {
            return Step::Pending(wait);
        }
        self.scheduler.skip_missed(now, self.max_catch_up as u64);

        let deadline = self.scheduler.next_deadline() - self.scheduler.start();
        self.frame.render_time_ms = deadline.as_millis() as u64;

        let status = self.source.pull_frame(&mut self.frame);
        // A failed pull still consumes its slot
        self.scheduler.advance();

        if !status.is_ok() {
            let count = self
                .framer
                .counters
                .pull_failures
                .fetch_add(1, Ordering::Relaxed);
            if should_log(count) {
                warn!(
                    "pull_frame returned {} at tick {} ({} failures so far)",
                    status,
                    self.scheduler.tick(),
                    count + 1
                );
            }
            return Step::Skipped;
        }

        self.framer.push_frame_pcm(&self.frame.pcm, &mut self.scratch);
        self.framer
            .counters
            .frames_pulled
            .fetch_add(1, Ordering::Relaxed);
        Step::Exchanged
    }

    fn interval(&self) -> Duration {
        self.scheduler.interval()
    }

    fn burst_limit(&self) -> u32 {
        self.max_catch_up + 1
    }
}
