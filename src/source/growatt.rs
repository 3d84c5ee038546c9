//! Growatt inverter cloud client.
//!
//! Production is published as average power per 5-minute bucket, keyed by
//! local wall-clock time, for the current day only. The newest bucket shows up
//! with a delay of a minute or two.

use super::session::{Login, Session, SessionManager};
use super::{number, DataSource, USER_AGENT};
use crate::config::GrowattConfig;
use crate::error::{AuthError, ConfigError, FetchError, SourceError};
use crate::models::{Direction, RawSeries, SensorDefinition};
use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Cookie whose presence marks a usable Growatt session.
pub const SESSION_MARKER: &str = "JSESSIONID";

/// Only today's buckets are fetched, so no window can reach further back.
pub const WINDOW_CAPACITY_HOURS: u32 = 24;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Form-encoded login against `LoginAPI.do`.
pub struct GrowattLogin {
    http: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

impl Login for GrowattLogin {
    async fn login(&self) -> Result<Session, AuthError> {
        let form = [
            ("userName", self.username.as_str()),
            ("password", self.password.as_str()),
        ];

        let response = self.http.post(&self.url).form(&form).send().await?;

        if !response.status().is_success() {
            return Err(AuthError::Rejected(response.status().as_u16()));
        }

        Ok(Session::from_cookies(
            response
                .cookies()
                .map(|c| (c.name().to_string(), c.value().to_string())),
        ))
    }
}

/// Polls plant production for one Growatt plant.
pub struct GrowattSource {
    http: reqwest::Client,
    detail_url: String,
    plant_id: String,
    sessions: SessionManager<GrowattLogin>,
}

impl GrowattSource {
    pub fn new(config: &GrowattConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let base = config.base_url.trim_end_matches('/');
        let login = GrowattLogin {
            http: http.clone(),
            url: format!("{}/LoginAPI.do", base),
            username: config.username.clone(),
            password: config.password.clone(),
        };

        Ok(Self {
            http,
            detail_url: format!("{}/newPlantDetailAPI.do", base),
            plant_id: config.plant_id.clone(),
            sessions: SessionManager::new(login, SESSION_MARKER),
        })
    }

    async fn fetch_detail(&self, session: &Session) -> Result<RawSeries, FetchError> {
        let date = Local::now().format("%Y-%m-%d").to_string();
        let query = [
            ("plantId", self.plant_id.as_str()),
            ("type", "1"),
            ("date", date.as_str()),
        ];

        let response = self
            .http
            .get(&self.detail_url)
            .query(&query)
            .header(reqwest::header::COOKIE, session.cookie_header())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        parse_plant_detail(&body, &Local)
    }
}

impl DataSource for GrowattSource {
    const LOGIN_ERROR: &'static str = "GroWatt login error";
    const FETCH_ERROR: &'static str = "Get plant detail error";

    fn name(&self) -> &'static str {
        "growatt"
    }

    fn check_sensor(&self, sensor: &SensorDefinition) -> Result<(), ConfigError> {
        match sensor.processing.mode.direction() {
            Direction::Past if sensor.processing.hours() > WINDOW_CAPACITY_HOURS => {
                Err(ConfigError::WindowTooLarge {
                    name: sensor.name.clone(),
                    hours: sensor.processing.hours(),
                    capacity_hours: WINDOW_CAPACITY_HOURS,
                })
            }
            Direction::Past => Ok(()),
            Direction::Future | Direction::Current => Err(ConfigError::UnsupportedMode {
                name: sensor.name.clone(),
                mode: sensor.processing.mode.to_string(),
                provider: self.name(),
            }),
        }
    }

    async fn fetch(&self, sensor: &SensorDefinition) -> Result<RawSeries, SourceError> {
        let session = self.sessions.ensure_session().await?;

        match self.fetch_detail(&session).await {
            Ok(series) => {
                debug!("Fetched {} buckets for {}", series.len(), sensor.name);
                Ok(series)
            }
            Err(e) => {
                warn!("Plant detail fetch for {} failed: {}", sensor.name, e);
                self.sessions.invalidate().await;
                Err(e.into())
            }
        }
    }
}

/// Parse `{back: {data: {"YYYY-MM-DD HH:MM": value}}}`, reading keys in `tz`.
pub fn parse_plant_detail<Tz: TimeZone>(body: &Value, tz: &Tz) -> Result<RawSeries, FetchError> {
    let data = match body.get("back").and_then(|b| b.get("data")) {
        Some(Value::Object(data)) if !data.is_empty() => data,
        Some(Value::Object(_)) | None => return Err(FetchError::Empty),
        Some(other) => {
            return Err(FetchError::Malformed(format!(
                "back.data is not an object: {}",
                other
            )))
        }
    };

    let mut series = RawSeries::new();
    for (key, raw) in data {
        let naive = NaiveDateTime::parse_from_str(key, TIMESTAMP_FORMAT)
            .map_err(|e| FetchError::Malformed(format!("timestamp {:?}: {}", key, e)))?;
        let at = tz
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| FetchError::Malformed(format!("nonexistent local time {}", key)))?
            .with_timezone(&Utc);
        let value =
            number(raw).ok_or_else(|| FetchError::Malformed(format!("value for {}: {}", key, raw)))?;
        series.insert(at, value);
    }

    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProcessingMode, SensorParams};
    use axum::{
        extract::Query,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Router,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_parse_plant_detail() {
        let body = json!({"back": {"data": {
            "2024-05-01 12:55": 812.4,
            "2024-05-01 13:00": "790.0"
        }}});

        let series = parse_plant_detail(&body, &Utc).unwrap();
        assert_eq!(series.len(), 2);
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        assert_eq!(series.points.get(&at), Some(&790.0));
    }

    #[test]
    fn test_parse_plant_detail_empty_and_malformed() {
        assert!(matches!(
            parse_plant_detail(&json!({"back": {"data": {}}}), &Utc),
            Err(FetchError::Empty)
        ));
        assert!(matches!(
            parse_plant_detail(&json!({"result": 0}), &Utc),
            Err(FetchError::Empty)
        ));
        assert!(matches!(
            parse_plant_detail(&json!({"back": {"data": {"yesterday": 1}}}), &Utc),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_forecast_modes() {
        let config = GrowattConfig::default();
        let source = GrowattSource::new(&config, Duration::from_secs(1)).unwrap();
        let sensor = SensorDefinition::validated(
            "pv",
            60,
            ProcessingMode::SumFuture,
            2,
            SensorParams {
                forecast_days: Some(1),
                ..SensorParams::default()
            },
        )
        .unwrap();
        assert!(matches!(
            source.check_sensor(&sensor),
            Err(ConfigError::UnsupportedMode { .. })
        ));
    }

    #[test]
    fn test_rejects_windows_beyond_today() {
        let source = GrowattSource::new(&GrowattConfig::default(), Duration::from_secs(1)).unwrap();
        let two_days = SensorDefinition::validated(
            "pv-48h",
            60,
            ProcessingMode::SumPast,
            48,
            SensorParams {
                past_days: Some(2),
                ..SensorParams::default()
            },
        )
        .unwrap();
        assert_eq!(
            source.check_sensor(&two_days),
            Err(ConfigError::WindowTooLarge {
                name: "pv-48h".to_string(),
                hours: 48,
                capacity_hours: WINDOW_CAPACITY_HOURS,
            })
        );

        let one_day = SensorDefinition::validated(
            "pv-24h",
            60,
            ProcessingMode::MaxPast,
            24,
            SensorParams {
                past_days: Some(1),
                ..SensorParams::default()
            },
        )
        .unwrap();
        assert_eq!(source.check_sensor(&one_day), Ok(()));
        assert_eq!(source.check_sensor(&latest_sensor()), Ok(()));
    }

    /// Fake Growatt cloud: counts logins, requires the session cookie.
    async fn fake_growatt(logins: Arc<AtomicUsize>, set_cookie: bool) -> String {
        let app = Router::new()
            .route(
                "/LoginAPI.do",
                post(move || {
                    let logins = Arc::clone(&logins);
                    async move {
                        logins.fetch_add(1, Ordering::SeqCst);
                        let mut headers = HeaderMap::new();
                        if set_cookie {
                            headers.insert(
                                "set-cookie",
                                "JSESSIONID=s1; Path=/".parse().unwrap(),
                            );
                        }
                        (headers, "{\"back\":{\"success\":true}}")
                    }
                }),
            )
            .route(
                "/newPlantDetailAPI.do",
                get(
                    |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                        let cookie = headers
                            .get("cookie")
                            .and_then(|c| c.to_str().ok())
                            .unwrap_or_default();
                        if !cookie.contains("JSESSIONID=s1") || q.get("plantId").map(String::as_str) != Some("42") {
                            return (StatusCode::FORBIDDEN, String::new());
                        }
                        (
                            StatusCode::OK,
                            json!({"back": {"data": {"2024-05-01 13:00": 5.0}}}).to_string(),
                        )
                    },
                ),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn latest_sensor() -> SensorDefinition {
        SensorDefinition::validated("pv", 300, ProcessingMode::Latest, 0, SensorParams::default())
            .unwrap()
    }

    fn config_for(base_url: String) -> GrowattConfig {
        GrowattConfig {
            base_url,
            username: "user".to_string(),
            password: "secret".to_string(),
            plant_id: "42".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fetch_logs_in_once_and_reuses_session() {
        let logins = Arc::new(AtomicUsize::new(0));
        let base = fake_growatt(Arc::clone(&logins), true).await;
        let source = GrowattSource::new(&config_for(base), Duration::from_secs(5)).unwrap();

        let first = source.fetch(&latest_sensor()).await.unwrap();
        let second = source.fetch(&latest_sensor()).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert_eq!(logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_without_session_cookie_is_auth_error() {
        let logins = Arc::new(AtomicUsize::new(0));
        let base = fake_growatt(Arc::clone(&logins), false).await;
        let source = GrowattSource::new(&config_for(base), Duration::from_secs(5)).unwrap();

        let err = source.fetch(&latest_sensor()).await.unwrap_err();
        assert!(matches!(err, SourceError::Auth(_)));
        assert_eq!(crate::source::error_body::<GrowattSource>(&err), "GroWatt login error");
    }

    #[tokio::test]
    async fn test_failed_fetch_invalidates_session() {
        let logins = Arc::new(AtomicUsize::new(0));
        let base = fake_growatt(Arc::clone(&logins), true).await;
        let mut config = config_for(base);
        config.plant_id = "unknown".to_string();
        let source = GrowattSource::new(&config, Duration::from_secs(5)).unwrap();

        let err = source.fetch(&latest_sensor()).await.unwrap_err();
        assert!(matches!(err, SourceError::Fetch(FetchError::Status(403))));
        assert_eq!(crate::source::error_body::<GrowattSource>(&err), "Get plant detail error");

        source.fetch(&latest_sensor()).await.unwrap_err();
        assert_eq!(logins.load(Ordering::SeqCst), 2);
    }
}
