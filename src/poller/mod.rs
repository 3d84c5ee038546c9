//! Phase-aligned background polling.

pub mod clock;
pub mod scheduler;

pub use clock::{Clock, SystemClock};
pub use scheduler::Scheduler;
