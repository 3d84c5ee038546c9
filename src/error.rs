//! Error types for the polling pipeline.
//!
//! Each stage of the pipeline has its own error kind so callers can decide
//! whether a failure is absorbed (background loop) or surfaced (HTTP handlers).

use thiserror::Error;

/// Login failed or the held session is not usable.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("login rejected with HTTP {0}")]
    Rejected(u16),

    /// The provider answered but the expected session marker is absent.
    #[error("login response is missing the {0} session marker")]
    MissingMarker(&'static str),
}

/// Upstream data retrieval failed or returned nothing usable.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("data request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("data request returned HTTP {0}")]
    Status(u16),

    #[error("unexpected response shape: {0}")]
    Malformed(String),

    #[error("provider returned no data")]
    Empty,
}

/// Error surfaced by a data source: either the session or the fetch failed.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Push or handshake failure towards the downstream hub.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("downstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("downstream returned HTTP {0}")]
    Status(u16),

    #[error("no downstream target configured")]
    NotConfigured,
}

/// Malformed inbound configuration or a sensor that fails validation.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sensor name must not be empty")]
    EmptyName,

    #[error("sensor {0} is defined more than once")]
    DuplicateName(String),

    #[error("sensor {name}: refresh rate must be positive")]
    InvalidRefreshRate { name: String },

    #[error("sensor {name}: {hours}h window exceeds the {capacity_hours}h the provider covers")]
    WindowTooLarge {
        name: String,
        hours: u32,
        capacity_hours: u32,
    },

    #[error("sensor {name}: `{param}` = {days} exceeds the maximum of {max}")]
    DaysOutOfRange {
        name: String,
        param: &'static str,
        days: u32,
        max: u32,
    },

    #[error("sensor {name}: missing parameter `{param}`")]
    MissingParam { name: String, param: &'static str },

    #[error("sensor {name}: {provider} cannot serve processing mode {mode}")]
    UnsupportedMode {
        name: String,
        mode: String,
        provider: &'static str,
    },

    #[error("invalid init payload: {0}")]
    InvalidInit(String),
}
