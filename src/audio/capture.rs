//! Microphone capture framing: float callbacks in, paced PCM16 frames out

use super::buffer::{Overflow, RingBuffer};
use super::pcm::{self, BYTES_PER_SAMPLE};
use super::session::{should_log, FramerSlot, Pump, Step};
use super::FrameSpec;
use crate::error::{PaceError, Result};
use crate::rtc::{AudioFrame, FrameSink};
use crate::sync::{Cadence, CadenceScheduler};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Snapshot of capture counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Microphone batches ingested
    pub batches: u64,
    /// Samples dropped because the ring buffer was full
    pub dropped_samples: u64,
    /// Frames accepted by the sink
    pub frames_sent: u64,
    /// Frames the sink rejected (discarded)
    pub frames_rejected: u64,
    /// Cadence intervals in which a due tick found too little buffered data
    pub underruns: u64,
    /// Bytes currently buffered
    pub buffered_bytes: usize,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    drop_events: AtomicU64,
    dropped_samples: AtomicU64,
    frames_sent: AtomicU64,
    frames_rejected: AtomicU64,
    underruns: AtomicU64,
}

/// Accumulates microphone samples as PCM16 bytes and hands out whole frames
///
/// The microphone callback is the only producer ([`ingest`]); the capture
/// pump is the only consumer ([`drain_frame`]). Both hold the ring lock only
/// for the copy itself.
///
/// [`ingest`]: CaptureFramer::ingest
/// [`drain_frame`]: CaptureFramer::drain_frame
pub struct CaptureFramer {
    spec: FrameSpec,
    ring: Mutex<RingBuffer<u8>>,
    warmup_batches: u64,
    counters: Counters,
}

impl CaptureFramer {
    /// Allocate a framer buffering `buffer_ms` of audio
    pub fn new(spec: FrameSpec, buffer_ms: u32, warmup_batches: u32) -> Result<Self> {
        let capacity = spec.buffer_samples_for_ms(buffer_ms) * BYTES_PER_SAMPLE;
        if capacity < spec.frame_bytes() {
            return Err(PaceError::InvalidConfig(format!(
                "capture buffer of {}ms cannot hold one {}-byte frame",
                buffer_ms,
                spec.frame_bytes()
            )));
        }

        let ring = RingBuffer::try_with_capacity(capacity, Overflow::Reject)?;
        debug!(
            "Capture buffer: {} bytes ({}ms) for {}",
            capacity, buffer_ms, spec
        );

        Ok(Self {
            spec,
            ring: Mutex::new(ring),
            warmup_batches: warmup_batches as u64,
            counters: Counters::default(),
        })
    }

    pub fn spec(&self) -> &FrameSpec {
        &self.spec
    }

    /// Producer side: encode one microphone batch into the buffer
    ///
    /// Samples are clamped to [-1, 1]. When the buffer cannot take a whole
    /// sample the rest of the batch is dropped; the caller is never blocked
    /// beyond the copy.
    pub fn ingest(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        let dropped = {
            let mut ring = self.ring.lock();
            let accepted = samples.len().min(ring.free() / BYTES_PER_SAMPLE);
            for &sample in &samples[..accepted] {
                let [lo, hi] = pcm::encode_sample(sample).to_le_bytes();
                ring.put(lo);
                ring.put(hi);
            }
            samples.len() - accepted
        };

        if dropped > 0 {
            let total = self
                .counters
                .dropped_samples
                .fetch_add(dropped as u64, Ordering::Relaxed);
            let events = self.counters.drop_events.fetch_add(1, Ordering::Relaxed);
            if should_log(events) {
                warn!(
                    "Capture buffer full, dropped {} samples ({} total)",
                    dropped,
                    total + dropped as u64
                );
            }
        }

        let batches = self.counters.batches.fetch_add(1, Ordering::Relaxed) + 1;
        if batches == self.warmup_batches {
            debug!("Capture warm-up reached after {} batches", batches);
        }
    }

    /// True once enough batches arrived to start emitting frames
    pub fn is_warmed_up(&self) -> bool {
        self.counters.batches.load(Ordering::Relaxed) >= self.warmup_batches
    }

    /// Consumer side: move exactly `dest.len()` bytes out of the buffer
    ///
    /// Returns `false` and leaves the buffer untouched if fewer bytes are
    /// buffered.
    pub fn drain_frame(&self, dest: &mut [u8]) -> bool {
        let mut ring = self.ring.lock();
        if ring.len() < dest.len() {
            return false;
        }
        ring.pop_slice(dest);
        true
    }

    pub fn buffered_bytes(&self) -> usize {
        self.ring.lock().len()
    }

    /// Discard buffered audio
    pub fn clear(&self) {
        self.ring.lock().clear();
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            batches: self.counters.batches.load(Ordering::Relaxed),
            dropped_samples: self.counters.dropped_samples.load(Ordering::Relaxed),
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            frames_rejected: self.counters.frames_rejected.load(Ordering::Relaxed),
            underruns: self.counters.underruns.load(Ordering::Relaxed),
            buffered_bytes: self.buffered_bytes(),
        }
    }
}

/// Handle given to the microphone callback
///
/// Stays valid across sessions; batches delivered while no capture session
/// is running are discarded.
#[derive(Clone)]
pub struct CaptureInput {
    slot: FramerSlot<CaptureFramer>,
}

impl CaptureInput {
    pub(crate) fn new(slot: FramerSlot<CaptureFramer>) -> Self {
        Self { slot }
    }

    /// Deliver a batch of interleaved samples with `channels` channels
    ///
    /// Returns `true` if a running session accepted the batch.
    pub fn deliver(&self, samples: &[f32], channels: u16) -> bool {
        let slot = self.slot.read();
        let Some(framer) = slot.as_ref() else {
            return false;
        };

        if channels != framer.spec().channels() {
            framer
                .counters
                .dropped_samples
                .fetch_add(samples.len() as u64, Ordering::Relaxed);
            let events = framer.counters.drop_events.fetch_add(1, Ordering::Relaxed);
            if should_log(events) {
                warn!(
                    "Microphone delivers {} channels but capture expects {}, dropping",
                    channels,
                    framer.spec().channels()
                );
            }
            return false;
        }

        framer.ingest(samples);
        true
    }

    /// Whether a capture session is currently accepting samples
    pub fn is_active(&self) -> bool {
        self.slot.read().is_some()
    }
}

/// Cadence-gated consumer that drains frames into a [`FrameSink`]
pub struct CapturePump {
    framer: Arc<CaptureFramer>,
    sink: Arc<dyn FrameSink>,
    scheduler: CadenceScheduler,
    frame: AudioFrame,
    max_catch_up: u32,
    warmed: bool,
    /// Grid slot of the last counted underrun; retries within it are not recounted
    starved_slot: Option<u64>,
}

impl CapturePump {
    pub fn new(
        framer: Arc<CaptureFramer>,
        sink: Arc<dyn FrameSink>,
        start: Duration,
        max_catch_up: u32,
    ) -> Self {
        let spec = *framer.spec();
        Self {
            scheduler: CadenceScheduler::new(start, spec.interval()),
            frame: AudioFrame::for_spec(&spec),
            framer,
            sink,
            max_catch_up: max_catch_up.max(1),
            warmed: false,
            starved_slot: None,
        }
    }

    /// Completed ticks since warm-up ended
    pub fn tick(&self) -> u64 {
        self.scheduler.tick()
    }
}

impl Pump for CapturePump {
    fn step(&mut self, now: Duration) -> Step {
        if !self.warmed {
            // Keep the schedule anchored to "now" until warm-up completes
            self.scheduler.restart(now);
            if !self.framer.is_warmed_up() {
                return Step::Starved;
            }
            self.warmed = true;
            info!(
                "Capture warm-up complete, {} bytes buffered",
                self.framer.buffered_bytes()
            );
        }

        if let Cadence::Pending(wait) = self.scheduler.poll(now) {
            return Step::Pending(wait);
        }
        self.scheduler.skip_missed(now, self.max_catch_up as u64);

        if !self.framer.drain_frame(&mut self.frame.pcm) {
            // Tick stays unadvanced; retried on the next step
            let slot = self.scheduler.slot_at(now);
            if self.starved_slot == Some(slot) {
                return Step::Starved;
            }
            self.starved_slot = Some(slot);

            let count = self.framer.counters.underruns.fetch_add(1, Ordering::Relaxed);
            if should_log(count) {
                debug!(
                    "Capture underrun at tick {} ({} of {} bytes buffered)",
                    self.scheduler.tick(),
                    self.framer.buffered_bytes(),
                    self.frame.pcm.len()
                );
            }
            return Step::Starved;
        }

        let deadline = self.scheduler.next_deadline() - self.scheduler.start();
        self.frame.render_time_ms = deadline.as_millis() as u64;

        let status = self.sink.push_frame(&self.frame);
        if status.is_ok() {
            self.framer.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
            trace!("Pushed capture frame at tick {}", self.scheduler.tick());
        } else {
            let count = self
                .framer
                .counters
                .frames_rejected
                .fetch_add(1, Ordering::Relaxed);
            if should_log(count) {
                warn!(
                    "push_frame failed: {} at tick {} ({} rejected so far)",
                    status,
                    self.scheduler.tick(),
                    count + 1
                );
            }
        }

        self.scheduler.advance();
        Step::Exchanged
    }

    fn interval(&self) -> Duration {
        self.scheduler.interval()
    }

    fn burst_limit(&self) -> u32 {
        self.max_catch_up + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtc::RtcStatus;
    use parking_lot::RwLock;

    const MS: Duration = Duration::from_millis(1);

    /// Sink recording every frame it is handed
    struct RecordingSink {
        frames: Mutex<Vec<AudioFrame>>,
        status: RtcStatus,
    }

    impl RecordingSink {
        fn new(status: RtcStatus) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                status,
            })
        }

        fn count(&self) -> usize {
            self.frames.lock().len()
        }
    }

    impl FrameSink for RecordingSink {
        fn push_frame(&self, frame: &AudioFrame) -> RtcStatus {
            self.frames.lock().push(frame.clone());
            self.status
        }
    }

    fn stereo_spec() -> FrameSpec {
        FrameSpec::new(48000, 2, 100).unwrap()
    }

    fn pump_with(framer: &Arc<CaptureFramer>, sink: &Arc<RecordingSink>) -> CapturePump {
        CapturePump::new(framer.clone(), sink.clone(), Duration::ZERO, 2)
    }

    #[test]
    fn test_exact_frame_drains_to_empty() {
        let framer = Arc::new(CaptureFramer::new(stereo_spec(), 1000, 0).unwrap());
        let sink = RecordingSink::new(RtcStatus::OK);
        let mut pump = pump_with(&framer, &sink);

        // 480 samples/channel * 2 channels
        framer.ingest(&[0.25; 960]);
        assert_eq!(framer.buffered_bytes(), 1920);

        assert_eq!(pump.step(Duration::ZERO), Step::Exchanged);
        assert_eq!(framer.buffered_bytes(), 0);
        assert_eq!(sink.count(), 1);

        let frames = sink.frames.lock();
        let frame = &frames[0];
        assert_eq!(frame.pcm.len(), 1920);
        assert_eq!(frame.samples_per_channel, 480);
        assert_eq!(frame.channels, 2);
        assert_eq!(frame.sample_rate, 48000);
        drop(frames);

        // Nothing buffered: skip without error, tick not consumed
        assert_eq!(pump.step(10 * MS), Step::Starved);
        assert_eq!(pump.tick(), 1);
        assert_eq!(framer.stats().underruns, 1);
    }

    #[test]
    fn test_partial_frame_waits_for_more_data() {
        let framer = Arc::new(CaptureFramer::new(stereo_spec(), 1000, 0).unwrap());
        let sink = RecordingSink::new(RtcStatus::OK);
        let mut pump = pump_with(&framer, &sink);

        framer.ingest(&[0.0; 500]);
        assert_eq!(pump.step(Duration::ZERO), Step::Starved);
        assert_eq!(framer.buffered_bytes(), 1000);

        framer.ingest(&[0.0; 500]);
        assert_eq!(pump.step(MS), Step::Exchanged);
        assert_eq!(framer.buffered_bytes(), 80);
        assert_eq!(pump.tick(), 1);
    }

    #[test]
    fn test_warmup_suppresses_frames() {
        let framer = Arc::new(CaptureFramer::new(stereo_spec(), 1000, 3).unwrap());
        let sink = RecordingSink::new(RtcStatus::OK);
        let mut pump = pump_with(&framer, &sink);

        framer.ingest(&[0.1; 960]);
        framer.ingest(&[0.1; 960]);
        assert!(!framer.is_warmed_up());
        assert_eq!(pump.step(50 * MS), Step::Starved);
        assert_eq!(sink.count(), 0);

        framer.ingest(&[0.1; 960]);
        assert!(framer.is_warmed_up());

        // Schedule is anchored at the step that observed warm-up
        assert_eq!(pump.step(60 * MS), Step::Exchanged);
        assert_eq!(pump.step(61 * MS), Step::Pending(9 * MS));
        assert_eq!(pump.step(70 * MS), Step::Exchanged);
        assert_eq!(sink.frames.lock()[1].render_time_ms, 10);
    }

    #[test]
    fn test_underrun_counted_once_per_interval() {
        let framer = Arc::new(CaptureFramer::new(stereo_spec(), 1000, 0).unwrap());
        let sink = RecordingSink::new(RtcStatus::OK);
        let mut pump = pump_with(&framer, &sink);

        // 100ms of 1ms retries with nothing buffered spans 10 intervals
        for ms in 0..100u32 {
            assert_eq!(pump.step(ms * MS), Step::Starved);
        }
        assert_eq!(framer.stats().underruns, 10);
        assert_eq!(sink.count(), 0);

        // Data arrives: the next due step still exchanges
        framer.ingest(&[0.0; 960]);
        assert_eq!(pump.step(100 * MS), Step::Exchanged);
        assert_eq!(framer.stats().underruns, 10);
    }

    #[test]
    fn test_rejected_frame_is_discarded() {
        let framer = Arc::new(CaptureFramer::new(stereo_spec(), 1000, 0).unwrap());
        let sink = RecordingSink::new(RtcStatus(-5));
        let mut pump = pump_with(&framer, &sink);

        framer.ingest(&[0.5; 1920]);
        assert_eq!(pump.step(Duration::ZERO), Step::Exchanged);
        assert_eq!(pump.step(10 * MS), Step::Exchanged);

        let stats = framer.stats();
        assert_eq!(stats.frames_rejected, 2);
        assert_eq!(stats.frames_sent, 0);
        assert_eq!(stats.buffered_bytes, 0);
    }

    #[test]
    fn test_catch_up_is_bounded() {
        let framer = Arc::new(CaptureFramer::new(stereo_spec(), 1000, 0).unwrap());
        let sink = RecordingSink::new(RtcStatus::OK);
        let mut pump = pump_with(&framer, &sink);

        framer.ingest(&[0.0; 960 * 20]);
        assert_eq!(pump.step(Duration::ZERO), Step::Exchanged);

        // 90ms stall: only max_catch_up + 1 frames are due
        let now = 100 * MS;
        let mut sent = 0;
        while pump.step(now) == Step::Exchanged {
            sent += 1;
        }
        assert_eq!(sent, 3);
        assert_eq!(sink.count(), 4);
        assert_eq!(pump.step(now), Step::Pending(10 * MS));
    }

    #[test]
    fn test_full_buffer_drops_samples() {
        let spec = FrameSpec::new(1000, 1, 100).unwrap();
        // 20ms = 20 samples = 40 bytes
        let framer = CaptureFramer::new(spec, 20, 0).unwrap();

        framer.ingest(&[0.0; 15]);
        framer.ingest(&[0.0; 15]);

        let stats = framer.stats();
        assert_eq!(stats.buffered_bytes, 40);
        assert_eq!(stats.dropped_samples, 10);
        assert_eq!(stats.batches, 2);
    }

    #[test]
    fn test_ingest_clamps_and_encodes() {
        let spec = FrameSpec::new(1000, 1, 500).unwrap();
        let framer = CaptureFramer::new(spec, 100, 0).unwrap();
        framer.ingest(&[2.0, -5.0]);

        let mut bytes = [0u8; 4];
        assert!(framer.drain_frame(&mut bytes));
        assert_eq!(bytes, [0xff, 0x7f, 0x01, 0x80]);
    }

    #[test]
    fn test_buffer_too_small_for_frame() {
        let result = CaptureFramer::new(stereo_spec(), 5, 0);
        assert!(matches!(result, Err(PaceError::InvalidConfig(_))));
    }

    #[test]
    fn test_capture_input_routes_to_session() {
        let slot: FramerSlot<CaptureFramer> = Arc::new(RwLock::new(None));
        let input = CaptureInput::new(slot.clone());
        assert!(!input.is_active());
        assert!(!input.deliver(&[0.0; 4], 2));

        let framer = Arc::new(CaptureFramer::new(stereo_spec(), 1000, 0).unwrap());
        *slot.write() = Some(framer.clone());

        assert!(input.deliver(&[0.0; 4], 2));
        assert!(!input.deliver(&[0.0; 4], 1));
        assert_eq!(framer.buffered_bytes(), 8);
        assert_eq!(framer.stats().dropped_samples, 4);
    }
}
