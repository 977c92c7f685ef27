//! Audio pipeline - session control for capture and playback

use super::capture::{CaptureFramer, CaptureInput, CapturePump, CaptureStats};
use super::playback::{PlaybackFramer, PlaybackOutput, PlaybackPump, PlaybackStats};
use super::session::{Pump, Session, SessionState};
use super::FrameSpec;
use crate::error::{PaceError, Result};
use crate::rtc::{FrameSink, FrameSource};
use crate::sync::{Clock, MonotonicClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Capture rate mandated by the platform microphone
pub const CAPTURE_SAMPLE_RATE: u32 = 48000;

/// How the cadence loops are driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// One background thread per session sleeps until each deadline
    #[default]
    Thread,
    /// The host calls [`AudioPipeline::update`] from its own loop
    Cooperative,
}

impl std::str::FromStr for Driver {
    type Err = PaceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "thread" => Ok(Driver::Thread),
            "cooperative" | "tick" => Ok(Driver::Cooperative),
            other => Err(PaceError::InvalidConfig(format!(
                "unknown driver '{}', expected 'thread' or 'cooperative'",
                other
            ))),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Frame layout pushed to the RTC engine
    pub capture: FrameSpec,
    /// Frame layout pulled from the RTC engine
    pub playback: FrameSpec,
    /// Microphone batches to ingest before the first frame is emitted
    pub warmup_batches: u32,
    /// Capture ring buffer length in milliseconds
    pub capture_buffer_ms: u32,
    /// Playback ring buffer length in milliseconds
    pub playback_buffer_ms: u32,
    /// Overdue intervals tolerated before missed ticks are skipped
    pub max_catch_up: u32,
    /// Threaded or cooperative cadence loops
    pub driver: Driver,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture: FrameSpec::preset(CAPTURE_SAMPLE_RATE, 1, 100),
            playback: FrameSpec::preset(44100, 1, 100),
            warmup_batches: 20,
            capture_buffer_ms: 10_000,
            playback_buffer_ms: 1_000,
            max_catch_up: 2,
            driver: Driver::Thread,
        }
    }
}

impl PipelineConfig {
    /// Check buffer sizes against frame sizes
    pub fn validate(&self) -> Result<()> {
        let capture_bytes =
            self.capture.buffer_samples_for_ms(self.capture_buffer_ms) * super::pcm::BYTES_PER_SAMPLE;
        if capture_bytes < self.capture.frame_bytes() {
            return Err(PaceError::InvalidConfig(format!(
                "capture_buffer_ms {} is shorter than one capture frame",
                self.capture_buffer_ms
            )));
        }
        if self.playback.buffer_samples_for_ms(self.playback_buffer_ms) < self.playback.frame_samples()
        {
            return Err(PaceError::InvalidConfig(format!(
                "playback_buffer_ms {} is shorter than one playback frame",
                self.playback_buffer_ms
            )));
        }
        if self.max_catch_up == 0 {
            return Err(PaceError::InvalidConfig(
                "max_catch_up must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Capture and playback sessions bound to one microphone/speaker pair
///
/// The engine facade is passed into `start_*` explicitly. All control
/// methods take `&self` and may be called from any thread.
pub struct AudioPipeline {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    capture: Session<CaptureFramer>,
    playback: Session<PlaybackFramer>,
    playback_source: Mutex<Option<Arc<dyn FrameSource>>>,
    playback_paused: AtomicBool,
}

impl AudioPipeline {
    /// Create a pipeline timed by the system monotonic clock
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a pipeline timed by `clock`
    pub fn with_clock(config: PipelineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        info!(
            "Pipeline: capture {}, playback {}, driver {:?}",
            config.capture, config.playback, config.driver
        );

        Ok(Self {
            config,
            clock,
            capture: Session::new("capture"),
            playback: Session::new("playback"),
            playback_source: Mutex::new(None),
            playback_paused: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle for the microphone delivery callback
    pub fn capture_input(&self) -> CaptureInput {
        CaptureInput::new(self.capture.slot())
    }

    /// Handle for the audio output demand callback
    pub fn playback_output(&self) -> PlaybackOutput {
        PlaybackOutput::new(self.playback.slot())
    }

    /// Start pushing captured frames into `sink`; no-op if already running
    pub fn start_capture<S: FrameSink + 'static>(&self, sink: Arc<S>) -> Result<()> {
        let sink: Arc<dyn FrameSink> = sink;
        let config = &self.config;
        let start = self.clock.now();

        self.capture.start(self.worker_clock(), || {
            let framer = Arc::new(CaptureFramer::new(
                config.capture,
                config.capture_buffer_ms,
                config.warmup_batches,
            )?);
            let pump = CapturePump::new(framer.clone(), sink, start, config.max_catch_up);
            Ok((framer, Box::new(pump) as Box<dyn Pump>))
        })?;
        Ok(())
    }

    /// Stop capture; returns once the worker has exited and the buffer is released
    pub fn stop_capture(&self) {
        self.capture.stop();
    }

    /// Start pulling playback frames from `source`; no-op if already running
    pub fn start_playback<S: FrameSource + 'static>(&self, source: Arc<S>) -> Result<()> {
        let source: Arc<dyn FrameSource> = source;
        self.playback_paused.store(false, Ordering::SeqCst);
        self.start_playback_from(source)
    }

    /// Stop playback and forget its source
    pub fn stop_playback(&self) {
        self.playback_paused.store(false, Ordering::SeqCst);
        self.playback.stop();
        *self.playback_source.lock() = None;
    }

    /// Suspend playback, keeping its source for [`AudioPipeline::resume_playback`]
    ///
    /// Returns `false` if playback was not running.
    pub fn pause_playback(&self) -> bool {
        if self.playback.state() != SessionState::Running {
            return false;
        }
        self.playback_paused.store(true, Ordering::SeqCst);
        self.playback.stop();
        debug!("Playback paused");
        true
    }

    /// Resume paused playback with a fresh, empty buffer
    ///
    /// Returns `false` if playback was not paused.
    pub fn resume_playback(&self) -> Result<bool> {
        if !self.playback_paused.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        let source = self.playback_source.lock().clone();
        match source {
            Some(source) => {
                debug!("Resuming playback");
                self.start_playback_from(source)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run due cadence work for cooperative sessions
    ///
    /// Call once per host update. Returns the number of frames exchanged.
    pub fn update(&self) -> u32 {
        let now = self.clock.now();
        self.capture.update(now) + self.playback.update(now)
    }

    pub fn capture_state(&self) -> SessionState {
        self.capture.state()
    }

    pub fn playback_state(&self) -> SessionState {
        self.playback.state()
    }

    pub fn is_playback_paused(&self) -> bool {
        self.playback_paused.load(Ordering::SeqCst)
    }

    /// Counters of the running capture session
    pub fn capture_stats(&self) -> Option<CaptureStats> {
        self.capture.framer().map(|framer| framer.stats())
    }

    /// Counters of the running playback session
    pub fn playback_stats(&self) -> Option<PlaybackStats> {
        self.playback.framer().map(|framer| framer.stats())
    }

    fn start_playback_from(&self, source: Arc<dyn FrameSource>) -> Result<()> {
        let config = &self.config;
        let start = self.clock.now();
        let pump_source = source.clone();

        let started = self.playback.start(self.worker_clock(), || {
            let framer = Arc::new(PlaybackFramer::new(
                config.playback,
                config.playback_buffer_ms,
            )?);
            let pump = PlaybackPump::new(framer.clone(), pump_source, start, config.max_catch_up);
            Ok((framer, Box::new(pump) as Box<dyn Pump>))
        })?;

        // A running session keeps the source it was started with
        if started {
            *self.playback_source.lock() = Some(source);
        }
        Ok(())
    }

    fn worker_clock(&self) -> Option<Arc<dyn Clock>> {
        match self.config.driver {
            Driver::Thread => Some(self.clock.clone()),
            Driver::Cooperative => None,
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.capture.stop();
        self.playback.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtc::{AudioFrame, LoopbackEngine, RtcStatus};
    use crate::sync::ManualClock;
    use std::thread;
    use std::time::Duration;

    const MS: Duration = Duration::from_millis(1);

    fn loopback_config(driver: Driver) -> PipelineConfig {
        let spec = FrameSpec::new(16000, 1, 100).unwrap();
        PipelineConfig {
            capture: spec,
            playback: spec,
            warmup_batches: 2,
            capture_buffer_ms: 1000,
            playback_buffer_ms: 500,
            max_catch_up: 2,
            driver,
        }
    }

    /// Sink that accepts everything
    struct NullSink;

    impl FrameSink for NullSink {
        fn push_frame(&self, _frame: &AudioFrame) -> RtcStatus {
            RtcStatus::OK
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.sample_rate(), CAPTURE_SAMPLE_RATE);
        assert_eq!(config.playback.frame_samples(), 441);
    }

    #[test]
    fn test_rejects_short_buffers() {
        let mut config = loopback_config(Driver::Thread);
        config.capture_buffer_ms = 5;
        assert!(AudioPipeline::new(config).is_err());

        let mut config = loopback_config(Driver::Thread);
        config.max_catch_up = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_driver_from_str() {
        assert_eq!("thread".parse::<Driver>().unwrap(), Driver::Thread);
        assert_eq!("Tick".parse::<Driver>().unwrap(), Driver::Cooperative);
        assert!("poll".parse::<Driver>().is_err());
    }

    #[test]
    fn test_cooperative_loopback_end_to_end() {
        let clock = ManualClock::new();
        let config = loopback_config(Driver::Cooperative);
        let spec = config.capture;
        let pipeline = AudioPipeline::with_clock(config, Arc::new(clock.clone())).unwrap();
        let engine = Arc::new(LoopbackEngine::new(spec, 16));

        let input = pipeline.capture_input();
        let output = pipeline.playback_output();
        assert!(!input.deliver(&[0.5; 160], 1));

        pipeline.start_capture(engine.clone()).unwrap();
        pipeline.start_playback(engine.clone()).unwrap();
        assert_eq!(pipeline.capture_state(), SessionState::Running);

        // Warm-up: two batches of one frame each
        assert!(input.deliver(&[0.5; 160], 1));
        assert!(input.deliver(&[0.5; 160], 1));
        pipeline.update();
        assert_eq!(engine.frames_pushed(), 1);

        clock.advance(10 * MS);
        pipeline.update();
        assert_eq!(engine.frames_pushed(), 2);
        assert!(pipeline.playback_stats().unwrap().frames_pulled >= 1);

        let mut out = [0.0f32; 160];
        assert_eq!(output.fill(&mut out), 160);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-3));

        pipeline.stop_capture();
        pipeline.stop_playback();
        assert_eq!(pipeline.capture_state(), SessionState::Idle);
        assert!(pipeline.capture_stats().is_none());
        assert_eq!(output.fill(&mut out), 0);
    }

    #[test]
    fn test_threaded_capture_paces_frames() {
        let pipeline = AudioPipeline::new(loopback_config(Driver::Thread)).unwrap();
        let engine = Arc::new(LoopbackEngine::new(pipeline.config().capture, 256));
        let input = pipeline.capture_input();

        pipeline.start_capture(engine.clone()).unwrap();
        // Start is idempotent
        pipeline.start_capture(engine.clone()).unwrap();

        // Half a second of audio up front
        for _ in 0..50 {
            input.deliver(&[0.1; 160], 1);
        }
        thread::sleep(Duration::from_millis(200));
        pipeline.stop_capture();

        // ~20 frames at 100 frames/s; generous bounds for scheduler noise
        let pushed = engine.frames_pushed();
        assert!((5..=40).contains(&pushed), "pushed {} frames", pushed);
        assert_eq!(pipeline.capture_state(), SessionState::Idle);
        assert!(!input.is_active());
    }

    #[test]
    fn test_pause_and_resume_playback() {
        let pipeline = AudioPipeline::new(loopback_config(Driver::Cooperative)).unwrap();
        let engine = Arc::new(LoopbackEngine::new(pipeline.config().playback, 4));

        assert!(!pipeline.pause_playback());
        pipeline.start_playback(engine.clone()).unwrap();
        assert!(pipeline.pause_playback());
        assert!(pipeline.is_playback_paused());
        assert_eq!(pipeline.playback_state(), SessionState::Idle);

        assert!(pipeline.resume_playback().unwrap());
        assert_eq!(pipeline.playback_state(), SessionState::Running);
        assert!(!pipeline.resume_playback().unwrap());

        pipeline.stop_playback();
        assert!(!pipeline.resume_playback().unwrap());
    }

    /// Source filling every frame with one constant sample value
    struct ConstantSource(i16);

    impl FrameSource for ConstantSource {
        fn pull_frame(&self, frame: &mut AudioFrame) -> RtcStatus {
            for pair in frame.pcm.chunks_exact_mut(2) {
                pair.copy_from_slice(&self.0.to_le_bytes());
            }
            RtcStatus::OK
        }
    }

    #[test]
    fn test_second_start_keeps_original_source() {
        let clock = ManualClock::new();
        let pipeline =
            AudioPipeline::with_clock(loopback_config(Driver::Cooperative), Arc::new(clock))
                .unwrap();
        let output = pipeline.playback_output();

        pipeline
            .start_playback(Arc::new(ConstantSource(16384)))
            .unwrap();
        // No-op on a running session; must not replace the remembered source
        pipeline
            .start_playback(Arc::new(ConstantSource(-16384)))
            .unwrap();

        assert!(pipeline.pause_playback());
        assert!(pipeline.resume_playback().unwrap());
        assert_eq!(pipeline.update(), 1);

        let mut out = [0.0f32; 4];
        assert_eq!(output.fill(&mut out), 4);
        assert!(out.iter().all(|&s| s == 0.5), "got {:?}", out);
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let pipeline = AudioPipeline::new(loopback_config(Driver::Thread)).unwrap();
        pipeline.stop_capture();
        pipeline.stop_playback();
        pipeline.start_capture(Arc::new(NullSink)).unwrap();
        pipeline.stop_capture();
        pipeline.stop_capture();
        assert_eq!(pipeline.capture_state(), SessionState::Idle);
    }
}
