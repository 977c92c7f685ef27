//! One-shot readiness slot for the RTC engine handle

use crate::error::{PaceError, Result};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Holds a handle that becomes available exactly once
///
/// The lifecycle component that creates the engine calls [`set`]; components
/// that need it block in [`wait_timeout`] instead of polling for it.
///
/// [`set`]: EngineSlot::set
/// [`wait_timeout`]: EngineSlot::wait_timeout
pub struct EngineSlot<E> {
    value: Mutex<Option<E>>,
    ready: Condvar,
}

impl<E: Clone> EngineSlot<E> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Publish the handle and wake all waiters
    pub fn set(&self, engine: E) -> Result<()> {
        let mut value = self.value.lock();
        if value.is_some() {
            return Err(PaceError::AlreadySatisfied);
        }
        *value = Some(engine);
        drop(value);

        let woken = self.ready.notify_all();
        debug!("RTC engine ready, woke {} waiters", woken);
        Ok(())
    }

    /// Get the handle if already published
    pub fn get(&self) -> Option<E> {
        self.value.lock().clone()
    }

    /// Get the handle, failing with `EngineNotReady` if it is not published yet
    pub fn require(&self) -> Result<E> {
        self.get().ok_or(PaceError::EngineNotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.value.lock().is_some()
    }

    /// Block until the handle is published
    pub fn wait(&self) -> E {
        let mut value = self.value.lock();
        loop {
            if let Some(engine) = value.as_ref() {
                return engine.clone();
            }
            self.ready.wait(&mut value);
        }
    }

    /// Block until the handle is published or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Result<E> {
        let deadline = Instant::now() + timeout;
        let mut value = self.value.lock();
        loop {
            if let Some(engine) = value.as_ref() {
                return Ok(engine.clone());
            }
            if self.ready.wait_until(&mut value, deadline).timed_out() {
                return value
                    .as_ref()
                    .cloned()
                    .ok_or(PaceError::ReadinessTimeout(timeout));
            }
        }
    }
}

impl<E: Clone> Default for EngineSlot<E> {
    fn default() -> Self {
        Self::new()
    }
}
