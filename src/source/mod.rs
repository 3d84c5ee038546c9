//! Upstream data sources.
//!
//! A data source fetches the raw series for one sensor. The Growatt source
//! needs a login session; the Open-Meteo source is anonymous.

pub mod growatt;
pub mod open_meteo;
pub mod session;

pub use growatt::GrowattSource;
pub use open_meteo::OpenMeteoSource;

use crate::error::{ConfigError, SourceError};
use crate::models::{RawSeries, SensorDefinition};
use std::future::Future;

/// Browser-like agent; the Growatt endpoints reject unknown clients.
pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; Linux; sensorbridge)";

/// A provider the pipeline can poll.
pub trait DataSource: Send + Sync + 'static {
    /// Plain-text body of the 500 answered when the session cannot be established.
    const LOGIN_ERROR: &'static str;
    /// Plain-text body of the 500 answered when the data fetch fails.
    const FETCH_ERROR: &'static str;

    fn name(&self) -> &'static str;

    /// Provider-specific checks run at registration time.
    fn check_sensor(&self, sensor: &SensorDefinition) -> Result<(), ConfigError>;

    /// Fetch a fresh raw series for `sensor`.
    fn fetch(
        &self,
        sensor: &SensorDefinition,
    ) -> impl Future<Output = Result<RawSeries, SourceError>> + Send;
}

/// Body for a failed on-demand read.
pub fn error_body<S: DataSource>(err: &SourceError) -> &'static str {
    match err {
        SourceError::Auth(_) => S::LOGIN_ERROR,
        SourceError::Fetch(_) => S::FETCH_ERROR,
    }
}

/// Accept a JSON number or a numeric string.
pub(crate) fn number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
