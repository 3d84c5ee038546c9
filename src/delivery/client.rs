//! HTTP client towards the downstream hub.

use super::InitSignal;
use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::models::{DownstreamConfig, Measurement, MeasurementPayload};
use crate::store::ValueStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct DeliveryClient {
    http: reqwest::Client,
    store: Arc<ValueStore>,
    init: InitSignal,
    push_timeout: Duration,
    handshake_timeout: Duration,
}

impl DeliveryClient {
    pub fn new(
        store: Arc<ValueStore>,
        init: InitSignal,
        config: &DeliveryConfig,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;

        Ok(Self {
            http,
            store,
            init,
            push_timeout: Duration::from_secs(config.push_timeout_seconds),
            handshake_timeout: Duration::from_secs(config.handshake_timeout_seconds),
        })
    }

    /// Echo the accepted configuration to the init-ack endpoint.
    ///
    /// On success the poll loop is released. Repeated successes are no-ops for
    /// the signal.
    pub async fn handshake(&self, config: &DownstreamConfig) -> Result<(), DeliveryError> {
        let url = config.init_ack_url();
        debug!("Acknowledging init at {}", url);

        let response = self
            .http
            .post(&url)
            .json(config)
            .timeout(self.handshake_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }

        if self.init.fire() {
            info!("Downstream hub acknowledged init, polling released");
        } else {
            info!("Downstream target re-initialized");
        }
        Ok(())
    }

    /// Best-effort push. Failures are logged and dropped.
    pub async fn push(&self, measurement: &Measurement) {
        match self.try_push(measurement).await {
            Ok(()) => debug!(
                "Pushed {} = {} for {}",
                measurement.sensor_id, measurement.value, measurement.timestamp
            ),
            Err(e) => warn!("Push for {} failed: {}", measurement.sensor_id, e),
        }
    }

    async fn try_push(&self, measurement: &Measurement) -> Result<(), DeliveryError> {
        let target = self
            .store
            .downstream_config()
            .ok_or(DeliveryError::NotConfigured)?;
        let payload = MeasurementPayload::new(measurement, &target.id_token);

        let response = self
            .http
            .post(target.measurements_url())
            .json(&payload)
            .timeout(self.push_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        Ok(())
    }
}
