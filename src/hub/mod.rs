//! Startup registration with the household hub.

pub mod registration;

pub use registration::register_sensors;
