//! framepace - real-time audio pacing CLI

use anyhow::{anyhow, Result};
use clap::Parser;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use framepace::audio::{
    AudioPipeline, CaptureInput, Driver, FrameSpec, PipelineConfig, PlaybackOutput,
};
use framepace::config::{Args, Command, Settings};
use framepace::rtc::{EngineSlot, LoopbackEngine};

/// Frames the loopback engine holds between capture and playback
const LOOPBACK_QUEUE_FRAMES: usize = 50;

/// How long to wait for the RTC engine to be published
const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::load_default()?,
    };

    // Initialize logging
    init_logging(&args, &settings)?;

    // Execute command
    match args.command.unwrap_or_default() {
        Command::Simulate {
            seconds,
            batch,
            tone,
        } => cmd_simulate(&settings, seconds, batch, tone),
        #[cfg(feature = "device")]
        Command::Loopback { input, output } => cmd_loopback(&settings, input, output),
        #[cfg(feature = "device")]
        Command::Devices => cmd_devices(),
        Command::Config { write } => cmd_config(write),
    }
}

fn init_logging(args: &Args, settings: &Settings) -> Result<()> {
    let fallback = settings.log_level.parse().unwrap_or(tracing::Level::INFO);
    let level = args.log_level(fallback);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let log_file = args
        .log
        .clone()
        .or_else(|| Some(settings.log_file.clone()).filter(|f| !f.is_empty()));

    if let Some(log_file) = log_file {
        let file = std::fs::File::create(log_file)?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Install a Ctrl+C handler and return the flag it clears
fn stop_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        r.store(false, Ordering::SeqCst);
    })?;
    Ok(running)
}

/// Both directions share the capture layout when routed through the loopback engine
fn loopback_config(settings: &Settings) -> Result<PipelineConfig> {
    let mut config = settings.to_pipeline_config()?;
    config.playback = config.capture;
    Ok(config)
}

/// Publish a loopback engine from a lifecycle thread and wait for it
fn publish_engine(spec: FrameSpec) -> Result<Arc<LoopbackEngine>> {
    let slot: Arc<EngineSlot<Arc<LoopbackEngine>>> = Arc::new(EngineSlot::new());

    let publisher = {
        let slot = slot.clone();
        thread::Builder::new()
            .name("rtc-lifecycle".to_string())
            .spawn(move || slot.set(Arc::new(LoopbackEngine::new(spec, LOOPBACK_QUEUE_FRAMES))))?
    };

    let engine = slot.wait_timeout(ENGINE_READY_TIMEOUT)?;
    publisher
        .join()
        .map_err(|_| anyhow!("RTC lifecycle thread panicked"))??;
    Ok(engine)
}

/// Run the pipeline until Ctrl+C or `deadline`, driving cooperative sessions
fn run_until(pipeline: &AudioPipeline, running: &AtomicBool, deadline: Option<Instant>) {
    let poll = match pipeline.config().driver {
        Driver::Cooperative => Duration::from_millis(1),
        Driver::Thread => Duration::from_millis(100),
    };

    while running.load(Ordering::SeqCst) && deadline.map_or(true, |d| Instant::now() < d) {
        pipeline.update();
        thread::sleep(poll);
    }
}

/// Small xorshift generator for batch size jitter
struct Jitter(u32);

impl Jitter {
    /// A value uniformly spread within +/-50% of `mean`
    fn around(&mut self, mean: usize) -> usize {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;

        let mean = mean.max(1);
        let spread = mean / 2;
        mean - spread + x as usize % (2 * spread + 1)
    }
}

/// Synthetic microphone: irregular batches of a sine tone at real-time rate
fn spawn_microphone(
    input: CaptureInput,
    spec: FrameSpec,
    batch: usize,
    tone: f32,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("synthetic-mic".to_string())
        .spawn(move || {
            let rate = spec.sample_rate();
            let channels = spec.channels();
            let step = TAU * tone / rate as f32;
            let mut jitter = Jitter(0x9e37_79b9);
            let mut phase = 0.0f32;
            let mut produced: u64 = 0;
            let mut samples = Vec::new();
            let start = Instant::now();

            while running.load(Ordering::SeqCst) {
                let frames = jitter.around(batch);
                samples.clear();
                for _ in 0..frames {
                    let value = 0.5 * phase.sin();
                    phase = (phase + step) % TAU;
                    samples.extend(std::iter::repeat(value).take(channels as usize));
                }
                input.deliver(&samples, channels);

                produced += frames as u64;
                let due = Duration::from_secs_f64(produced as f64 / rate as f64);
                if let Some(wait) = due.checked_sub(start.elapsed()) {
                    thread::sleep(wait);
                }
            }
        })?;
    Ok(handle)
}

/// Synthetic speaker: irregular output demand at real-time rate
fn spawn_speaker(
    output: PlaybackOutput,
    spec: FrameSpec,
    batch: usize,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("synthetic-speaker".to_string())
        .spawn(move || {
            let rate = spec.sample_rate();
            let channels = spec.channels() as usize;
            let mut jitter = Jitter(0x2545_f491);
            let mut consumed: u64 = 0;
            let mut out = Vec::new();
            let start = Instant::now();

            while running.load(Ordering::SeqCst) {
                let frames = jitter.around(batch);
                out.resize(frames * channels, 0.0f32);
                output.fill(&mut out);

                consumed += frames as u64;
                let due = Duration::from_secs_f64(consumed as f64 / rate as f64);
                if let Some(wait) = due.checked_sub(start.elapsed()) {
                    thread::sleep(wait);
                }
            }
        })?;
    Ok(handle)
}

fn print_stats(pipeline: &AudioPipeline, engine: &LoopbackEngine) {
    println!("\nStatistics:\n");
    if let Some(stats) = pipeline.capture_stats() {
        println!("  Capture batches:      {}", stats.batches);
        println!("  Frames sent:          {}", stats.frames_sent);
        println!("  Frames rejected:      {}", stats.frames_rejected);
        println!("  Capture underruns:    {}", stats.underruns);
        println!("  Dropped samples:      {}", stats.dropped_samples);
    }
    if let Some(stats) = pipeline.playback_stats() {
        println!("  Frames pulled:        {}", stats.frames_pulled);
        println!("  Pull failures:        {}", stats.pull_failures);
        println!("  Samples served:       {}", stats.samples_served);
        println!("  Silence samples:      {}", stats.silence_samples);
        println!("  Overwritten samples:  {}", stats.samples_overwritten);
    }
    println!("  Engine queue:         {} frames", engine.queued());
    println!();
}

/// Run capture and playback against the loopback engine with synthetic audio
fn cmd_simulate(settings: &Settings, seconds: u64, batch: usize, tone: f32) -> Result<()> {
    println!("framepace simulate\n");

    let config = loopback_config(settings)?;
    let spec = config.capture;
    let pipeline = AudioPipeline::new(config)?;
    println!("Frame format: {}", spec);

    let engine = publish_engine(spec)?;
    let running = stop_flag()?;

    if let Err(e) = pipeline.start_capture(engine.clone()) {
        error!("Failed to start capture: {}", e);
        return Err(e.into());
    }
    pipeline.start_playback(engine.clone())?;

    let mic = spawn_microphone(pipeline.capture_input(), spec, batch, tone, running.clone())?;
    let speaker = spawn_speaker(pipeline.playback_output(), spec, batch, running.clone())?;

    println!("Simulating for {}s. Press Ctrl+C to stop.", seconds);
    run_until(
        &pipeline,
        &running,
        Some(Instant::now() + Duration::from_secs(seconds)),
    );

    running.store(false, Ordering::SeqCst);
    for worker in [mic, speaker] {
        if worker.join().is_err() {
            error!("Synthetic audio thread panicked");
        }
    }

    print_stats(&pipeline, &engine);
    pipeline.stop_capture();
    pipeline.stop_playback();
    info!("Simulation finished");
    println!("Stopped.");

    Ok(())
}

/// Route the microphone through the loopback engine to the speakers
#[cfg(feature = "device")]
fn cmd_loopback(settings: &Settings, input: Option<String>, output: Option<String>) -> Result<()> {
    use framepace::device::{MicrophoneStream, SpeakerStream};

    println!("framepace loopback\n");

    let config = loopback_config(settings)?;
    let spec = config.capture;
    let pipeline = AudioPipeline::new(config)?;
    let engine = publish_engine(spec)?;
    let running = stop_flag()?;

    let input_name = input.as_deref().or(settings.input_device());
    let output_name = output.as_deref().or(settings.output_device());

    // Devices open before the sessions so a missing device prevents start
    let mic = MicrophoneStream::open(pipeline.capture_input(), spec, input_name)?;
    let speaker = SpeakerStream::open(pipeline.playback_output(), spec, output_name)?;

    pipeline.start_capture(engine.clone())?;
    pipeline.start_playback(engine.clone())?;

    println!("Frame format: {}", spec);
    println!("Microphone:   {}", mic.name());
    println!("Speaker:      {}", speaker.name());
    println!("\nLoopback running. Press Ctrl+C to stop.\n");

    run_until(&pipeline, &running, None);

    print_stats(&pipeline, &engine);
    pipeline.stop_capture();
    pipeline.stop_playback();
    drop(mic);
    drop(speaker);
    println!("Stopped.");

    Ok(())
}

/// List available audio devices
#[cfg(feature = "device")]
fn cmd_devices() -> Result<()> {
    let devices = framepace::device::list_devices()?;

    if devices.is_empty() {
        println!("No audio devices found.");
        return Ok(());
    }

    println!("Available audio devices:\n");
    for (i, device) in devices.iter().enumerate() {
        println!("  {}. {}", i + 1, device);
    }
    println!();

    Ok(())
}

/// Print or write the sample configuration
fn cmd_config(write: Option<std::path::PathBuf>) -> Result<()> {
    match write {
        Some(path) => {
            if path.exists() {
                return Err(anyhow!("{} already exists", path.display()));
            }
            std::fs::write(&path, Settings::sample_config())?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", Settings::sample_config()),
    }
    Ok(())
}
