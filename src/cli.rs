//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// SensorBridge - cloud data source bridge for a home-automation hub
///
/// Polls a solar-inverter or weather API, reduces the series to one value
/// per sensor and serves/pushes it over the hub's sensor contract.
///
/// Examples:
///   sensorbridge
///   sensorbridge --config /etc/sensorbridge.toml --port 5023
///   sensorbridge --hub-username admin --hub-password secret
///   sensorbridge --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for sensorbridge.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on (overrides server.host)
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Port to listen on (overrides server.port)
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Household hub username used for sensor registration
    #[arg(long, env = "SENSORBRIDGE_HUB_USERNAME")]
    pub hub_username: Option<String>,

    /// Household hub password used for sensor registration
    #[arg(long, env = "SENSORBRIDGE_HUB_PASSWORD", hide_env_values = true)]
    pub hub_password: Option<String>,

    /// Provider account username (Growatt)
    #[arg(long, env = "SENSORBRIDGE_PROVIDER_USERNAME")]
    pub provider_username: Option<String>,

    /// Provider account password (Growatt)
    #[arg(long, env = "SENSORBRIDGE_PROVIDER_PASSWORD", hide_env_values = true)]
    pub provider_password: Option<String>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (warnings and errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default sensorbridge.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.port == Some(0) {
            return Err("Port must be between 1 and 65535".to_string());
        }

        if let Some(ref config) = self.config {
            if !config.is_file() {
                return Err(format!("Config file does not exist: {}", config.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::WARN
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
