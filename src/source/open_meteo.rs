//! Open-Meteo forecast client.
//!
//! Hourly series cover `past_days` of history and `forecast_days` ahead of
//! today; `current` is the instantaneous observation. Times are requested in
//! UTC so no offset handling is needed.

use super::{number, DataSource, USER_AGENT};
use crate::config::OpenMeteoConfig;
use crate::error::{ConfigError, FetchError, SourceError};
use crate::models::{ProcessingMode, RawSeries, SensorDefinition};
use chrono::NaiveDateTime;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Anonymous forecast source for one location.
pub struct OpenMeteoSource {
    http: reqwest::Client,
    forecast_url: String,
    latitude: f64,
    longitude: f64,
}

impl OpenMeteoSource {
    pub fn new(config: &OpenMeteoConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            forecast_url: format!("{}/v1/forecast", config.base_url.trim_end_matches('/')),
            latitude: config.latitude,
            longitude: config.longitude,
        })
    }

    fn query(&self, sensor: &SensorDefinition) -> Vec<(&'static str, String)> {
        let params = &sensor.params;
        let mut query = vec![
            ("latitude", self.latitude.to_string()),
            ("longitude", self.longitude.to_string()),
            ("timezone", "UTC".to_string()),
        ];

        if let Some(ref hourly) = params.hourly {
            query.push(("hourly", hourly.clone()));
        }
        if let Some(ref current) = params.current {
            query.push(("current", current.clone()));
        }
        if let Some(days) = params.past_days {
            query.push(("past_days", days.to_string()));
        }
        if let Some(days) = params.forecast_days {
            query.push(("forecast_days", days.to_string()));
        }

        query
    }
}

impl DataSource for OpenMeteoSource {
    const LOGIN_ERROR: &'static str = "Open-Meteo login error";
    const FETCH_ERROR: &'static str = "Get forecast error";

    fn name(&self) -> &'static str {
        "open-meteo"
    }

    fn check_sensor(&self, sensor: &SensorDefinition) -> Result<(), ConfigError> {
        let mode = sensor.processing.mode;
        if mode == ProcessingMode::Latest {
            return Err(ConfigError::UnsupportedMode {
                name: sensor.name.clone(),
                mode: mode.to_string(),
                provider: self.name(),
            });
        }
        if mode.is_windowed() && sensor.params.hourly.is_none() {
            return Err(ConfigError::MissingParam {
                name: sensor.name.clone(),
                param: "hourly",
            });
        }
        Ok(())
    }

    async fn fetch(&self, sensor: &SensorDefinition) -> Result<RawSeries, SourceError> {
        let response = self
            .http
            .get(&self.forecast_url)
            .query(&self.query(sensor))
            .send()
            .await
            .map_err(FetchError::from)?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()).into());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        let series = parse_forecast(
            &body,
            sensor.params.hourly.as_deref(),
            sensor.params.current.as_deref(),
        )?;
        debug!("Fetched {} hourly points for {}", series.len(), sensor.name);
        Ok(series)
    }
}

/// Pair `hourly.time[i]` with `hourly.<var>[i]` and read `current.<var>`.
///
/// Null samples are skipped. A response with neither yields `FetchError::Empty`.
pub fn parse_forecast(
    body: &Value,
    hourly: Option<&str>,
    current: Option<&str>,
) -> Result<RawSeries, FetchError> {
    let mut series = RawSeries::new();

    if let Some(var) = hourly {
        let block = body
            .get("hourly")
            .ok_or_else(|| FetchError::Malformed("missing hourly block".to_string()))?;
        let times = block
            .get("time")
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::Malformed("missing hourly.time".to_string()))?;
        let values = block
            .get(var)
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::Malformed(format!("missing hourly.{}", var)))?;

        if times.len() != values.len() {
            return Err(FetchError::Malformed(format!(
                "hourly.time has {} entries but hourly.{} has {}",
                times.len(),
                var,
                values.len()
            )));
        }

        for (time, value) in times.iter().zip(values) {
            let Some(value) = number(value) else {
                continue;
            };
            let time = time
                .as_str()
                .ok_or_else(|| FetchError::Malformed(format!("non-string time {}", time)))?;
            let at = NaiveDateTime::parse_from_str(time, TIME_FORMAT)
                .map_err(|e| FetchError::Malformed(format!("time {:?}: {}", time, e)))?
                .and_utc();
            series.insert(at, value);
        }
    }

    if let Some(var) = current {
        if let Some(value) = body.get("current").and_then(|c| c.get(var)).and_then(number) {
            series = series.with_current(value);
        }
    }

    if series.is_empty() {
        return Err(FetchError::Empty);
    }
    Ok(series)
}
