//! Cadence timing for frame exchange

mod cadence;
mod clock;

pub use cadence::{Cadence, CadenceScheduler};
pub use clock::{Clock, ManualClock, MonotonicClock};
