//! Configuration file handling.
//!
//! This module handles loading `sensorbridge.toml`, merging CLI overrides and
//! validating the `[[sensors]]` entries into sensor definitions.

use crate::error::ConfigError;
use crate::models::{ProcessingMode, SensorDefinition, SensorParams};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "sensorbridge.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Inbound HTTP settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Household hub to register sensors with. Registration is skipped when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<HubConfig>,

    /// Poll loop settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Downstream push settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Upstream provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Sensors to serve.
    #[serde(default)]
    pub sensors: Vec<SensorEntry>,
}

/// Inbound HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Sensor answered on `/status` and `/value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sensor: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            default_sensor: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5023
}

/// Household hub connection used for startup registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub host: String,

    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Address the hub uses to reach this service. Defaults to `server.host`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_host: Option<String>,
}

/// Poll loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,

    /// Length of the publication cycle in minutes.
    #[serde(default = "default_phase_modulus")]
    pub phase_modulus: u32,

    /// Minute within the cycle at which work runs.
    #[serde(default = "default_phase_offset")]
    pub phase_offset: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            phase_modulus: default_phase_modulus(),
            phase_offset: default_phase_offset(),
        }
    }
}

fn default_tick_seconds() -> u64 {
    60
}

fn default_phase_modulus() -> u32 {
    5
}

fn default_phase_offset() -> u32 {
    2 // provider buckets land one to two minutes late
}

/// Downstream push settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_push_timeout")]
    pub push_timeout_seconds: u64,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            push_timeout_seconds: default_push_timeout(),
            handshake_timeout_seconds: default_handshake_timeout(),
        }
    }
}

fn default_push_timeout() -> u64 {
    10
}

fn default_handshake_timeout() -> u64 {
    5
}

/// Which upstream provider this deployment polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[default]
    Growatt,
    OpenMeteo,
}

/// Upstream provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    /// Timeout for login and data requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    #[serde(default)]
    pub growatt: GrowattConfig,

    #[serde(default)]
    pub open_meteo: OpenMeteoConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            request_timeout_seconds: default_request_timeout(),
            growatt: GrowattConfig::default(),
            open_meteo: OpenMeteoConfig::default(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

/// Growatt cloud account and plant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowattConfig {
    #[serde(default = "default_growatt_url")]
    pub base_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub plant_id: String,
}

impl Default for GrowattConfig {
    fn default() -> Self {
        Self {
            base_url: default_growatt_url(),
            username: String::new(),
            password: String::new(),
            plant_id: String::new(),
        }
    }
}

fn default_growatt_url() -> String {
    "http://server.growatt.com".to_string()
}

/// Open-Meteo location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenMeteoConfig {
    #[serde(default = "default_open_meteo_url")]
    pub base_url: String,

    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,
}

impl Default for OpenMeteoConfig {
    fn default() -> Self {
        Self {
            base_url: default_open_meteo_url(),
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}

fn default_open_meteo_url() -> String {
    "https://api.open-meteo.com".to_string()
}

/// One `[[sensors]]` entry as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorEntry {
    pub name: String,

    /// Seconds between hub polls of this sensor.
    pub refresh_rate: u32,

    pub processing: ProcessingMode,

    #[serde(default)]
    pub number_of_hours: u32,

    #[serde(default)]
    pub params: SensorParams,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.tick_seconds == 0 {
            bail!("scheduler.tick_seconds must be positive");
        }
        if s.phase_modulus == 0 || s.phase_offset >= s.phase_modulus {
            bail!(
                "scheduler.phase_offset ({}) must be below phase_modulus ({})",
                s.phase_offset,
                s.phase_modulus
            );
        }
        Ok(())
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref host) = args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(hub) = self.hub.as_mut() {
            if let Some(ref username) = args.hub_username {
                hub.username = username.clone();
            }
            if let Some(ref password) = args.hub_password {
                hub.password = password.clone();
            }
        }

        if let Some(ref username) = args.provider_username {
            self.provider.growatt.username = username.clone();
        }
        if let Some(ref password) = args.provider_password {
            self.provider.growatt.password = password.clone();
        }
    }

    /// Validate the `[[sensors]]` entries.
    ///
    /// `check` adds provider-specific rules. Rejected entries are logged and
    /// returned alongside the accepted definitions.
    pub fn sensor_definitions<F>(&self, check: F) -> (Vec<SensorDefinition>, Vec<ConfigError>)
    where
        F: Fn(&SensorDefinition) -> Result<(), ConfigError>,
    {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();

        for entry in &self.sensors {
            let result = SensorDefinition::validated(
                &entry.name,
                entry.refresh_rate,
                entry.processing,
                entry.number_of_hours,
                entry.params.clone(),
            )
            .and_then(|sensor| check(&sensor).map(|_| sensor))
            .and_then(|sensor| {
                if seen.insert(sensor.name.clone()) {
                    Ok(sensor)
                } else {
                    Err(ConfigError::DuplicateName(sensor.name))
                }
            });

            match result {
                Ok(sensor) => accepted.push(sensor),
                Err(e) => {
                    warn!("Sensor excluded: {}", e);
                    rejected.push(e);
                }
            }
        }

        (accepted, rejected)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let mut config = Config::default();
        config.sensors.push(SensorEntry {
            name: "growatt-5min".to_string(),
            refresh_rate: 300,
            processing: ProcessingMode::Latest,
            number_of_hours: 0,
            params: SensorParams::default(),
        });
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
