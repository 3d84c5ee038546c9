//! Inbound HTTP surface.
//!
//! `/init` receives the downstream target. `/status` and `/value` answer for
//! the default sensor; `/{sensor}/status` and `/{sensor}/value` for a named one.
//! `/value` fetches and aggregates on demand, independent of the poll loop.

use crate::analysis::aggregate;
use crate::delivery::DeliveryClient;
use crate::models::{DownstreamConfig, SensorDefinition, SENSOR_TYPE};
use crate::source::{error_body, DataSource};
use crate::store::ValueStore;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState<S> {
    pub source: Arc<S>,
    pub store: Arc<ValueStore>,
    pub delivery: Arc<DeliveryClient>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    #[serde(rename = "type")]
    sensor_type: &'static str,
}

#[derive(Serialize)]
struct ValueResponse {
    value: f64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

fn sensor_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Sensor not found",
        }),
    )
        .into_response()
}

async fn handle_init<S: DataSource>(State(state): State<Arc<AppState<S>>>, body: Bytes) -> Response {
    let config: DownstreamConfig = match serde_json::from_slice(&body) {
        Ok(config) => config,
        Err(e) => {
            debug!("Rejecting init body: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
        }
    };

    if let Err(e) = config.validate() {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    info!("Init received, downstream target {}", config.server_uri);
    state.store.set_downstream_config(config.clone());

    match state.delivery.handshake(&config).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!("Init acknowledgement to {} failed: {}", config.server_uri, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Init acknowledgement failed: {}", e),
            )
                .into_response()
        }
    }
}

fn status_of(sensor: Option<&SensorDefinition>) -> Response {
    match sensor {
        Some(_) => Json(StatusResponse {
            status: "online",
            sensor_type: SENSOR_TYPE,
        })
        .into_response(),
        None => sensor_not_found(),
    }
}

async fn value_of<S: DataSource>(source: &S, sensor: Option<&SensorDefinition>) -> Response {
    let Some(sensor) = sensor else {
        return sensor_not_found();
    };

    match source.fetch(sensor).await {
        Ok(series) => Json(ValueResponse {
            value: aggregate(&series, &sensor.processing),
        })
        .into_response(),
        Err(e) => {
            warn!("On-demand read of {} failed: {}", sensor.name, e);
            (StatusCode::INTERNAL_SERVER_ERROR, error_body::<S>(&e)).into_response()
        }
    }
}

async fn handle_status<S: DataSource>(State(state): State<Arc<AppState<S>>>) -> Response {
    status_of(state.store.default_sensor())
}

async fn handle_value<S: DataSource>(State(state): State<Arc<AppState<S>>>) -> Response {
    value_of(state.source.as_ref(), state.store.default_sensor()).await
}

async fn handle_sensor_status<S: DataSource>(
    State(state): State<Arc<AppState<S>>>,
    Path(name): Path<String>,
) -> Response {
    status_of(state.store.get_sensor(&name))
}

async fn handle_sensor_value<S: DataSource>(
    State(state): State<Arc<AppState<S>>>,
    Path(name): Path<String>,
) -> Response {
    value_of(state.source.as_ref(), state.store.get_sensor(&name)).await
}

/// Build the axum router.
pub fn build_router<S: DataSource>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/init", post(handle_init::<S>))
        .route("/status", get(handle_status::<S>))
        .route("/value", get(handle_value::<S>))
        .route("/{sensor}/status", get(handle_sensor_status::<S>))
        .route("/{sensor}/value", get(handle_sensor_value::<S>))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn run_server<S, F>(state: Arc<AppState<S>>, host: &str, port: u16, shutdown: F) -> Result<()>
where
    S: DataSource,
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}
