//! devkube time: pluggable clocks and the interval poller that drives
//! readiness checks.

#![forbid(unsafe_code)]

mod clock;
mod poller;

pub use clock::{real_clock_if_unset, Clock, ManualClock, RealClock, Ticker};
pub use poller::{Poller, DEFAULT_POLL_INTERVAL};
