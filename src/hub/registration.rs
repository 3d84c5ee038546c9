//! Household hub login and sensor registration.
//!
//! Registration runs once before the server starts. An unreachable hub or a
//! rejected login aborts startup; a sensor the hub refuses is dropped.

use crate::config::HubConfig;
use crate::models::{SensorDefinition, SENSOR_TYPE};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hub error text for a URI that is already registered.
const DUPLICATE_URI: &str = "a sensor with this URI already exists";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    AlreadyExists,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    #[serde(rename = "userName")]
    user_name: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct NewSensor<'a> {
    name: &'a str,
    refresh_rate: u32,
    uri: String,
    #[serde(rename = "type")]
    sensor_type: &'a str,
}

pub struct HubClient {
    http: reqwest::Client,
    base_url: String,
}

impl HubClient {
    pub fn new(config: &HubConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build hub HTTP client")?;

        Ok(Self {
            http,
            base_url: format!("http://{}:{}", config.host, config.port),
        })
    }

    /// Log in and return the bearer token.
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let url = format!("{}/api/v1/login", self.base_url);
        let credentials = Credentials {
            user_name: username,
            password,
        };

        let response = self
            .http
            .post(&url)
            .json(&credentials)
            .send()
            .await
            .with_context(|| format!("Unable to reach the household hub at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Hub login rejected with HTTP {}: {}", status.as_u16(), body);
        }

        let body: Value = response
            .json()
            .await
            .context("Hub login response is not JSON")?;

        body.pointer("/auth_token/token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("Hub login response has no auth_token.token")
    }

    /// Register one sensor reachable at `uri`.
    pub async fn register(
        &self,
        token: &str,
        sensor: &SensorDefinition,
        uri: String,
    ) -> Result<Registration> {
        let url = format!("{}/api/v1/sensor", self.base_url);
        let payload = NewSensor {
            name: &sensor.name,
            refresh_rate: sensor.refresh_rate,
            uri,
            sensor_type: SENSOR_TYPE,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to register {}", sensor.name))?;

        let status = response.status();
        if status.is_success() {
            return Ok(Registration::Created);
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        if body.pointer("/error/uri").and_then(Value::as_str) == Some(DUPLICATE_URI) {
            return Ok(Registration::AlreadyExists);
        }

        bail!(
            "Hub refused {} with HTTP {}: {}",
            sensor.name,
            status.as_u16(),
            body
        )
    }
}

/// Register every sensor and keep the ones the hub accepted.
///
/// `sensor_host:port` is how the hub reaches this service; each sensor lives
/// under `/{name}` on it.
pub async fn register_sensors(
    config: &HubConfig,
    sensor_host: &str,
    port: u16,
    timeout: Duration,
    sensors: Vec<SensorDefinition>,
) -> Result<Vec<SensorDefinition>> {
    let client = HubClient::new(config, timeout)?;
    let token = client
        .login(&config.username, &config.password)
        .await
        .context("Household hub login failed")?;
    debug!("Logged in to household hub");

    register_all(&client, &token, sensor_host, port, sensors).await
}

/// Register each sensor in turn. A hub that stops answering aborts the run.
async fn register_all(
    client: &HubClient,
    token: &str,
    sensor_host: &str,
    port: u16,
    sensors: Vec<SensorDefinition>,
) -> Result<Vec<SensorDefinition>> {
    let mut accepted = Vec::with_capacity(sensors.len());
    for sensor in sensors {
        let uri = format!("{}:{}/{}", sensor_host, port, sensor.name);
        match client.register(token, &sensor, uri).await {
            Ok(Registration::Created) => {
                info!("Registered sensor {}", sensor.name);
                accepted.push(sensor);
            }
            Ok(Registration::AlreadyExists) => {
                warn!(
                    "Sensor {} is already registered with the hub, continuing",
                    sensor.name
                );
                accepted.push(sensor);
            }
            Err(e) if is_unreachable(&e) => {
                return Err(e.context("Household hub became unreachable during registration"));
            }
            Err(e) => warn!("Excluding sensor {}: {:#}", sensor.name, e),
        }
    }

    Ok(accepted)
}

/// `true` when the failure is a connection error rather than a hub answer.
fn is_unreachable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .is_some_and(reqwest::Error::is_connect)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProcessingMode, SensorParams};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn sensor(name: &str) -> SensorDefinition {
        SensorDefinition::validated(name, 60, ProcessingMode::Latest, 0, SensorParams::default())
            .unwrap()
    }

    /// Fake hub: accepts `admin`/`secret`, already knows `old`, refuses `bad`.
    async fn fake_hub(seen: Arc<Mutex<Vec<Value>>>) -> HubConfig {
        let app = Router::new()
            .route(
                "/api/v1/login",
                post(|Json(body): Json<Value>| async move {
                    if body["userName"] == "admin" && body["password"] == "secret" {
                        (StatusCode::OK, Json(json!({"auth_token": {"token": "t-1"}})))
                    } else {
                        (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad credentials"})))
                    }
                }),
            )
            .route(
                "/api/v1/sensor",
                post(move |headers: HeaderMap, Json(body): Json<Value>| {
                    let seen = Arc::clone(&seen);
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default();
                        if auth != "Bearer t-1" {
                            return (StatusCode::UNAUTHORIZED, Json(json!({})));
                        }
                        seen.lock().unwrap().push(body.clone());
                        match body["name"].as_str() {
                            Some("old") => (
                                StatusCode::BAD_REQUEST,
                                Json(json!({"error": {"uri": DUPLICATE_URI}})),
                            ),
                            Some("bad") => (
                                StatusCode::BAD_REQUEST,
                                Json(json!({"error": {"name": "invalid"}})),
                            ),
                            _ => (StatusCode::CREATED, Json(json!({"id": 1}))),
                        }
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        HubConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            sensor_host: None,
        }
    }

    #[tokio::test]
    async fn test_registers_and_tolerates_duplicates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let config = fake_hub(Arc::clone(&seen)).await;

        let accepted = register_sensors(
            &config,
            "10.0.0.5",
            5023,
            Duration::from_secs(5),
            vec![sensor("new"), sensor("old"), sensor("bad")],
        )
        .await
        .unwrap();

        let names: Vec<_> = accepted.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["new", "old"]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0]["uri"], "10.0.0.5:5023/new");
        assert_eq!(seen[0]["type"], "decimal_sensor");
        assert_eq!(seen[0]["refresh_rate"], 60);
    }

    #[tokio::test]
    async fn test_rejected_login_aborts() {
        let mut config = fake_hub(Arc::new(Mutex::new(Vec::new()))).await;
        config.password = "wrong".to_string();

        let result = register_sensors(
            &config,
            "localhost",
            5023,
            Duration::from_secs(5),
            vec![sensor("new")],
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_hub_aborts() {
        let config = HubConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "admin".to_string(),
            password: "secret".to_string(),
            sensor_host: None,
        };

        let err = register_sensors(&config, "localhost", 5023, Duration::from_secs(2), vec![])
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Unable to reach"));
    }

    #[tokio::test]
    async fn test_hub_lost_after_login_aborts() {
        let gone = HubConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "admin".to_string(),
            password: "secret".to_string(),
            sensor_host: None,
        };
        let client = HubClient::new(&gone, Duration::from_secs(2)).unwrap();

        let err = register_all(&client, "t-1", "localhost", 5023, vec![sensor("new"), sensor("old")])
            .await
            .unwrap_err();
        assert!(is_unreachable(&err));
        assert!(format!("{:#}", err).contains("became unreachable"));
    }

    #[tokio::test]
    async fn test_refused_sensor_is_not_unreachable() {
        let config = fake_hub(Arc::new(Mutex::new(Vec::new()))).await;
        let client = HubClient::new(&config, Duration::from_secs(5)).unwrap();

        let err = client
            .register("t-1", &sensor("bad"), "localhost:5023/bad".to_string())
            .await
            .unwrap_err();
        assert!(!is_unreachable(&err));
    }
}
