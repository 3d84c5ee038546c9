//! Data models for the sensor bridge.
//!
//! This module contains the core data structures shared by the pipeline:
//! processing specifications, sensor definitions, raw series, the downstream
//! target and the measurements pushed to it.

use crate::error::ConfigError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sensor type reported to the hub and in status responses.
pub const SENSOR_TYPE: &str = "decimal_sensor";

/// Most history a provider serves (Open-Meteo's `past_days` limit).
pub const MAX_PAST_DAYS: u32 = 92;

/// Longest forecast a provider serves (Open-Meteo's `forecast_days` limit).
pub const MAX_FORECAST_DAYS: u32 = 16;

/// Which side of `now` a window extends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Past,
    Future,
    /// No window: the provider's instantaneous observation.
    Current,
}

/// Reduction applied to the samples of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Sum,
    Max,
    Min,
    Avg,
    /// Single-sample selection, no arithmetic.
    Identity,
}

/// Direction and reducer combined into one configurable mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    SumPast,
    SumFuture,
    MaxPast,
    MaxFuture,
    MinPast,
    MinFuture,
    AvgPast,
    AvgFuture,
    Current,
    /// Most recent 5-minute bucket, used for metered production.
    Latest,
}

impl ProcessingMode {
    pub fn direction(&self) -> Direction {
        match self {
            ProcessingMode::SumPast
            | ProcessingMode::MaxPast
            | ProcessingMode::MinPast
            | ProcessingMode::AvgPast
            | ProcessingMode::Latest => Direction::Past,
            ProcessingMode::SumFuture
            | ProcessingMode::MaxFuture
            | ProcessingMode::MinFuture
            | ProcessingMode::AvgFuture => Direction::Future,
            ProcessingMode::Current => Direction::Current,
        }
    }

    pub fn reducer(&self) -> Reducer {
        match self {
            ProcessingMode::SumPast | ProcessingMode::SumFuture => Reducer::Sum,
            ProcessingMode::MaxPast | ProcessingMode::MaxFuture => Reducer::Max,
            ProcessingMode::MinPast | ProcessingMode::MinFuture => Reducer::Min,
            ProcessingMode::AvgPast | ProcessingMode::AvgFuture => Reducer::Avg,
            ProcessingMode::Current | ProcessingMode::Latest => Reducer::Identity,
        }
    }

    /// Whether the mode reduces an hourly window.
    pub fn is_windowed(&self) -> bool {
        !matches!(self, ProcessingMode::Current | ProcessingMode::Latest)
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingMode::SumPast => "sum_past",
            ProcessingMode::SumFuture => "sum_future",
            ProcessingMode::MaxPast => "max_past",
            ProcessingMode::MaxFuture => "max_future",
            ProcessingMode::MinPast => "min_past",
            ProcessingMode::MinFuture => "min_future",
            ProcessingMode::AvgPast => "avg_past",
            ProcessingMode::AvgFuture => "avg_future",
            ProcessingMode::Current => "current",
            ProcessingMode::Latest => "latest",
        };
        write!(f, "{}", s)
    }
}

/// How a sensor turns a raw series into one value.
///
/// `window_hours` is stored sign-adjusted: PAST modes carry a negative
/// magnitude so the window is always `min(now, now + h) ..= max(now, now + h)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingSpec {
    pub mode: ProcessingMode,
    pub window_hours: i64,
}

impl ProcessingSpec {
    pub fn new(mode: ProcessingMode, number_of_hours: u32) -> Self {
        let hours = i64::from(number_of_hours);
        let window_hours = match mode.direction() {
            Direction::Past if mode.is_windowed() => -hours,
            Direction::Future => hours,
            _ => 0,
        };
        Self { mode, window_hours }
    }

    /// Window bounds relative to `now`, both inclusive.
    ///
    /// Saturates at the representable range instead of overflowing.
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let other = Duration::try_hours(self.window_hours)
            .and_then(|offset| now.checked_add_signed(offset))
            .unwrap_or(if self.window_hours < 0 {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            });
        (now.min(other), now.max(other))
    }

    /// Magnitude of the window in hours.
    pub fn hours(&self) -> u32 {
        u32::try_from(self.window_hours.unsigned_abs()).unwrap_or(u32::MAX)
    }
}

/// Provider-specific parameters attached to a sensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorParams {
    /// Days of history the provider is asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub past_days: Option<u32>,

    /// Days of forecast the provider is asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_days: Option<u32>,

    /// Hourly variable to fetch for windowed modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly: Option<String>,

    /// Instantaneous variable to fetch for the current mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
}

/// A registered sensor. Immutable once validated.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDefinition {
    pub name: String,
    pub refresh_rate: u32,
    pub processing: ProcessingSpec,
    pub params: SensorParams,
}

impl SensorDefinition {
    /// Build a sensor, rejecting specs whose window the provider cannot cover.
    pub fn validated(
        name: &str,
        refresh_rate: u32,
        mode: ProcessingMode,
        number_of_hours: u32,
        params: SensorParams,
    ) -> Result<Self, ConfigError> {
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if refresh_rate == 0 {
            return Err(ConfigError::InvalidRefreshRate {
                name: name.to_string(),
            });
        }

        check_days(name, "past_days", params.past_days, MAX_PAST_DAYS)?;
        check_days(name, "forecast_days", params.forecast_days, MAX_FORECAST_DAYS)?;

        let processing = ProcessingSpec::new(mode, number_of_hours);

        match (mode.direction(), mode.is_windowed()) {
            (Direction::Past, true) => {
                let days = params.past_days.ok_or_else(|| ConfigError::MissingParam {
                    name: name.to_string(),
                    param: "past_days",
                })?;
                check_capacity(name, days, processing.hours())?;
            }
            (Direction::Future, _) => {
                let days = params
                    .forecast_days
                    .ok_or_else(|| ConfigError::MissingParam {
                        name: name.to_string(),
                        param: "forecast_days",
                    })?;
                check_capacity(name, days, processing.hours())?;
            }
            (Direction::Current, _) => {
                if params.current.is_none() {
                    return Err(ConfigError::MissingParam {
                        name: name.to_string(),
                        param: "current",
                    });
                }
            }
            (Direction::Past, false) => {}
        }

        Ok(Self {
            name: name.to_string(),
            refresh_rate,
            processing,
            params,
        })
    }
}

fn check_days(
    name: &str,
    param: &'static str,
    days: Option<u32>,
    max: u32,
) -> Result<(), ConfigError> {
    match days {
        Some(days) if days > max => Err(ConfigError::DaysOutOfRange {
            name: name.to_string(),
            param,
            days,
            max,
        }),
        _ => Ok(()),
    }
}

fn check_capacity(name: &str, days: u32, hours: u32) -> Result<(), ConfigError> {
    let capacity_hours = days.saturating_mul(24);
    if capacity_hours < hours {
        return Err(ConfigError::WindowTooLarge {
            name: name.to_string(),
            hours,
            capacity_hours,
        });
    }
    Ok(())
}

/// Time-keyed samples from one fetch, plus the provider's current observation.
///
/// Compared structurally against the previous fetch for change detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSeries {
    pub points: BTreeMap<DateTime<Utc>, f64>,
    pub current: Option<f64>,
}

impl RawSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, at: DateTime<Utc>, value: f64) {
        self.points.insert(at, value);
    }

    pub fn with_current(mut self, value: f64) -> Self {
        self.current = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.current.is_none()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }
}

impl FromIterator<(DateTime<Utc>, f64)> for RawSeries {
    fn from_iter<I: IntoIterator<Item = (DateTime<Utc>, f64)>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
            current: None,
        }
    }
}

/// Where measurements go, learned from the `/init` handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownstreamConfig {
    #[serde(rename = "server-uri")]
    pub server_uri: String,
    #[serde(rename = "measurements-endpoint")]
    pub measurements_endpoint: String,
    #[serde(rename = "init-ack-endpoint")]
    pub init_ack_endpoint: String,
    #[serde(rename = "id-token")]
    pub id_token: String,
}

impl DownstreamConfig {
    /// Reject payloads that parse but cannot be used as a target.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_uri.trim().is_empty() {
            return Err(ConfigError::InvalidInit("server-uri is empty".to_string()));
        }
        Ok(())
    }

    pub fn measurements_url(&self) -> String {
        self.endpoint_url(&self.measurements_endpoint)
    }

    pub fn init_ack_url(&self) -> String {
        self.endpoint_url(&self.init_ack_endpoint)
    }

    fn endpoint_url(&self, path: &str) -> String {
        let base = self.server_uri.trim_end_matches('/');
        let base = if base.starts_with("http://") || base.starts_with("https://") {
            base.to_string()
        } else {
            format!("http://{}", base)
        };

        if path.is_empty() {
            base
        } else if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

/// One computed value, created per notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub sensor_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Wire shape of a pushed measurement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementPayload {
    #[serde(rename = "message-type")]
    pub message_type: String,
    #[serde(rename = "sensor-type")]
    pub sensor_type: String,
    pub value: f64,
    #[serde(rename = "id-token")]
    pub id_token: String,
}

impl MeasurementPayload {
    pub fn new(measurement: &Measurement, id_token: &str) -> Self {
        Self {
            message_type: "measurement".to_string(),
            sensor_type: SENSOR_TYPE.to_string(),
            value: measurement.value,
            id_token: id_token.to_string(),
        }
    }
}
