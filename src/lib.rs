//! framepace - real-time audio pacing
//!
//! Bridges irregular-rate microphone and speaker callbacks to a
//! fixed-cadence frame exchange with a real-time-communication engine.

pub mod audio;
pub mod config;
#[cfg(feature = "device")]
pub mod device;
pub mod error;
pub mod rtc;
pub mod sync;

pub use error::{PaceError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
