//! Shared fakes for the async tests: a scripted data source and a loopback
//! hub that records every POST it receives.

use crate::error::{AuthError, ConfigError, FetchError, SourceError};
use crate::models::{DownstreamConfig, RawSeries, SensorDefinition};
use crate::source::DataSource;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::Router;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What the next fetch should answer.
#[derive(Debug, Clone)]
pub enum Scripted {
    Series(RawSeries),
    LoginFails,
    FetchFails,
}

pub struct FakeSource {
    next: Mutex<Scripted>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(series: RawSeries) -> Self {
        Self {
            next: Mutex::new(Scripted::Series(series)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, next: Scripted) {
        *self.next.lock().unwrap() = next;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataSource for FakeSource {
    const LOGIN_ERROR: &'static str = "fake login error";
    const FETCH_ERROR: &'static str = "fake fetch error";

    fn name(&self) -> &'static str {
        "fake"
    }

    fn check_sensor(&self, _sensor: &SensorDefinition) -> Result<(), ConfigError> {
        Ok(())
    }

    async fn fetch(&self, _sensor: &SensorDefinition) -> Result<RawSeries, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.next.lock().unwrap().clone();
        match next {
            Scripted::Series(series) => Ok(series),
            Scripted::LoginFails => Err(AuthError::MissingMarker("JSESSIONID").into()),
            Scripted::FetchFails => Err(FetchError::Empty.into()),
        }
    }
}

#[derive(Clone)]
struct HubState {
    received: Arc<Mutex<Vec<(String, Value)>>>,
    status: Arc<AtomicU16>,
}

/// Loopback downstream hub answering every POST with a settable status.
pub struct FakeHub {
    pub addr: SocketAddr,
    state: HubState,
}

impl FakeHub {
    pub async fn start() -> Self {
        let state = HubState {
            received: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(AtomicU16::new(200)),
        };

        let app = Router::new()
            .fallback(record)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn set_status(&self, code: u16) {
        self.state.status.store(code, Ordering::SeqCst);
    }

    /// Target pointing at this hub, without a URL scheme.
    pub fn downstream(&self, token: &str) -> DownstreamConfig {
        DownstreamConfig {
            server_uri: self.addr.to_string(),
            measurements_endpoint: "/measurements".to_string(),
            init_ack_endpoint: "/init-ack".to_string(),
            id_token: token.to_string(),
        }
    }

    pub fn received_on(&self, path: &str) -> Vec<Value> {
        self.state
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

async fn record(State(state): State<HubState>, uri: Uri, body: Bytes) -> StatusCode {
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state
        .received
        .lock()
        .unwrap()
        .push((uri.path().to_string(), body));
    StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap()
}
