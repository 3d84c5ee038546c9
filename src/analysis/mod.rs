//! Analysis modules.
//!
//! Window aggregation turns a raw series into one value; change detection
//! decides whether a fresh fetch is worth notifying about.

pub mod aggregator;
pub mod change;

pub use aggregator::*;
pub use change::*;
