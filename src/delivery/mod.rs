//! Downstream delivery.
//!
//! The handshake learns and confirms the push target; pushes are best-effort.

pub mod client;
pub mod signal;

pub use client::DeliveryClient;
pub use signal::InitSignal;
