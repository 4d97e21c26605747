//! Shared infrastructure used across kernel and domains.

pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};
