//! Session lifecycle and cadence drivers shared by capture and playback

use crate::error::{PaceError, Result};
use crate::sync::Clock;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Sleep between retries while a pump is starved or warming up
const STARVED_RETRY: Duration = Duration::from_millis(1);

/// Transient conditions log on the first occurrence and then every Nth
pub(crate) const LOG_SAMPLE_EVERY: u64 = 1000;

/// Sampled logging stops after this many occurrences
const LOG_SAMPLE_LIMIT: u64 = 100_000;

/// Whether the `count`th occurrence (0-based) of a condition should be logged
pub(crate) fn should_log(count: u64) -> bool {
    count % LOG_SAMPLE_EVERY == 0 && count < LOG_SAMPLE_LIMIT
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No buffer allocated
    Idle,
    /// Allocating the buffer and resetting the cadence
    Starting,
    /// Producer and consumer active
    Running,
    /// Running flag cleared, waiting for the worker to exit
    Stopping,
}

/// Outcome of one cadence step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A frame was exchanged with the engine; another may already be due
    Exchanged,
    /// The tick was consumed without data (engine call failed)
    Skipped,
    /// Not yet due; the next deadline is this far away
    Pending(Duration),
    /// Due but unable to exchange (warming up or underrun); retry soon
    Starved,
}

/// One direction's cadence-gated frame exchange
pub trait Pump: Send {
    /// Attempt one frame exchange at time `now`
    fn step(&mut self, now: Duration) -> Step;

    /// Cadence interval of this pump
    fn interval(&self) -> Duration;

    /// Most frames exchanged back-to-back within one `update` call
    fn burst_limit(&self) -> u32;
}

/// Run a pump on the calling thread until `running` is cleared
///
/// Each sleep is capped at one interval so a stop request is seen within
/// one cadence period.
pub(crate) fn drive(pump: &mut dyn Pump, clock: &dyn Clock, running: &AtomicBool) {
    let interval = pump.interval();
    while running.load(Ordering::Acquire) {
        match pump.step(clock.now()) {
            Step::Exchanged | Step::Skipped => {}
            Step::Pending(wait) => thread::sleep(wait.min(interval)),
            Step::Starved => thread::sleep(STARVED_RETRY.min(interval)),
        }
    }
}

/// Run a pump cooperatively: exchange whatever is due right now, never sleep
///
/// Returns the number of frames exchanged.
pub(crate) fn drive_once(pump: &mut dyn Pump, now: Duration) -> u32 {
    let mut exchanged = 0;
    let mut attempts = 0;
    while attempts < pump.burst_limit() {
        attempts += 1;
        match pump.step(now) {
            Step::Exchanged => exchanged += 1,
            Step::Skipped => {}
            Step::Pending(_) | Step::Starved => break,
        }
    }
    exchanged
}

/// Slot through which platform callbacks reach the active session's framer
pub(crate) type FramerSlot<F> = Arc<RwLock<Option<Arc<F>>>>;

/// How a running session is driven
enum Worker {
    Thread(JoinHandle<()>),
    Cooperative(Box<dyn Pump>),
}

struct Inner {
    state: SessionState,
    running: Arc<AtomicBool>,
    worker: Option<Worker>,
}

/// Lifecycle of one pipeline direction
///
/// All transitions happen under one lock, so start/stop may be called from
/// any thread. The framer is published to the slot only after the worker is
/// set up and withdrawn only after the worker has exited.
pub(crate) struct Session<F> {
    name: &'static str,
    inner: Mutex<Inner>,
    slot: FramerSlot<F>,
}

impl<F: Send + Sync + 'static> Session<F> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                running: Arc::new(AtomicBool::new(false)),
                worker: None,
            }),
            slot: Arc::new(RwLock::new(None)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn slot(&self) -> FramerSlot<F> {
        self.slot.clone()
    }

    /// Current framer, if a session is running
    pub fn framer(&self) -> Option<Arc<F>> {
        self.slot.read().clone()
    }

    /// Start the session if idle
    ///
    /// `build` allocates the framer and its pump. With `clock` set the pump
    /// runs on a dedicated thread; otherwise it waits for [`Session::update`].
    /// Returns `false` without calling `build` if the session was not idle.
    pub fn start<B>(&self, clock: Option<Arc<dyn Clock>>, build: B) -> Result<bool>
    where
        B: FnOnce() -> Result<(Arc<F>, Box<dyn Pump>)>,
    {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Idle {
            debug!("{} session already {:?}", self.name, inner.state);
            return Ok(false);
        }

        inner.state = SessionState::Starting;
        let (framer, mut pump) = match build() {
            Ok(parts) => parts,
            Err(e) => {
                inner.state = SessionState::Idle;
                error!("Failed to start {} session: {}", self.name, e);
                return Err(e);
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        let worker = match clock {
            Some(clock) => {
                let flag = running.clone();
                let spawned = thread::Builder::new()
                    .name(format!("framepace-{}", self.name))
                    .spawn(move || drive(pump.as_mut(), clock.as_ref(), &flag));
                match spawned {
                    Ok(handle) => Worker::Thread(handle),
                    Err(e) => {
                        inner.state = SessionState::Idle;
                        error!("Failed to spawn {} worker: {}", self.name, e);
                        return Err(PaceError::WorkerSpawn(e));
                    }
                }
            }
            None => Worker::Cooperative(pump),
        };

        inner.running = running;
        inner.worker = Some(worker);
        *self.slot.write() = Some(framer);
        inner.state = SessionState::Running;
        info!("{} session started", self.name);
        Ok(true)
    }

    /// Stop the session if running; joins the worker before releasing the framer
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Running {
            return;
        }

        inner.state = SessionState::Stopping;
        inner.running.store(false, Ordering::Release);

        if let Some(Worker::Thread(handle)) = inner.worker.take() {
            if handle.join().is_err() {
                error!("{} worker panicked", self.name);
            }
        }

        *self.slot.write() = None;
        inner.state = SessionState::Idle;
        info!("{} session stopped", self.name);
    }

    /// Step a cooperative session; no-op for threaded or idle sessions
    pub fn update(&self, now: Duration) -> u32 {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Running {
            return 0;
        }
        match inner.worker.as_mut() {
            Some(Worker::Cooperative(pump)) => drive_once(pump.as_mut(), now),
            _ => 0,
        }
    }
}

impl<F> Drop for Session<F> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        inner.running.store(false, Ordering::Release);
        if let Some(Worker::Thread(handle)) = inner.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{ManualClock, MonotonicClock};
    use std::sync::atomic::AtomicU32;

    /// Exchanges on every due tick, counting steps
    struct CountingPump {
        next: Duration,
        interval: Duration,
        exchanged: Arc<AtomicU32>,
    }

    impl Pump for CountingPump {
        fn step(&mut self, now: Duration) -> Step {
            if now < self.next {
                return Step::Pending(self.next - now);
            }
            self.next += self.interval;
            self.exchanged.fetch_add(1, Ordering::SeqCst);
            Step::Exchanged
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        fn burst_limit(&self) -> u32 {
            2
        }
    }

    fn counting(exchanged: &Arc<AtomicU32>) -> Result<(Arc<()>, Box<dyn Pump>)> {
        Ok((
            Arc::new(()),
            Box::new(CountingPump {
                next: Duration::ZERO,
                interval: Duration::from_millis(5),
                exchanged: exchanged.clone(),
            }),
        ))
    }

    #[test]
    fn test_should_log_sampling() {
        assert!(should_log(0));
        assert!(!should_log(1));
        assert!(should_log(1000));
        assert!(!should_log(LOG_SAMPLE_LIMIT));
    }

    #[test]
    fn test_cooperative_update_respects_burst_limit() {
        let session: Session<()> = Session::new("test");
        let exchanged = Arc::new(AtomicU32::new(0));
        assert!(session.start(None, || counting(&exchanged)).unwrap());

        let clock = ManualClock::new();
        clock.advance(Duration::from_millis(50));
        assert_eq!(session.update(clock.now()), 2);
        assert_eq!(exchanged.load(Ordering::SeqCst), 2);

        session.stop();
        assert_eq!(session.update(clock.now()), 0);
    }

    #[test]
    fn test_start_stop_idempotent() {
        let session: Session<()> = Session::new("test");
        let exchanged = Arc::new(AtomicU32::new(0));
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());

        assert!(session
            .start(Some(clock.clone()), || counting(&exchanged))
            .unwrap());
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.framer().is_some());

        // Second start is a no-op and does not call build
        assert!(!session
            .start(Some(clock), || panic!("build called twice"))
            .unwrap());

        thread::sleep(Duration::from_millis(30));
        session.stop();
        session.stop();

        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.framer().is_none());
        assert!(exchanged.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_failed_build_leaves_idle() {
        let session: Session<()> = Session::new("test");
        let result = session.start(None, || Err(PaceError::BufferAllocation { requested: 1 }));

        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Idle);
    }
}
