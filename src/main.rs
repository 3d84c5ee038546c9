//! SensorBridge - cloud data source bridge for a home-automation hub
//!
//! Polls a solar-inverter or weather API, reduces each sensor's series to a
//! single value and exposes it over the hub's HTTP sensor contract, pushing
//! fresh values to the hub once it has called `/init`.
//!
//! Exit codes:
//!   0 - Clean shutdown
//!   1 - Startup error (config, hub registration, bind failure, etc.)

mod analysis;
mod cli;
mod config;
mod delivery;
mod error;
mod hub;
mod models;
mod poller;
mod server;
mod source;
mod store;

#[cfg(test)]
mod testing;

use anyhow::{bail, Context, Result};
use cli::Args;
use config::{Config, ProviderKind, DEFAULT_CONFIG_FILE};
use delivery::{DeliveryClient, InitSignal};
use poller::{Scheduler, SystemClock};
use server::AppState;
use source::{DataSource, GrowattSource, OpenMeteoSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::ValueStore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// How long shutdown waits for the poll loop to notice the stop flag.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("SensorBridge v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run_bridge(args).await {
        error!("SensorBridge failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default sensorbridge.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set provider credentials, the hub and your sensors.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load configuration from file or defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location; a broken file is an error, not a silent fallback
    match Config::load_default()? {
        Some(config) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

/// Build the configured provider and hand over to [`serve`].
async fn run_bridge(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let timeout = Duration::from_secs(config.provider.request_timeout_seconds);
    match config.provider.kind {
        ProviderKind::Growatt => {
            let source = GrowattSource::new(&config.provider.growatt, timeout)
                .context("Failed to build Growatt client")?;
            serve(config, source).await
        }
        ProviderKind::OpenMeteo => {
            let source = OpenMeteoSource::new(&config.provider.open_meteo, timeout)
                .context("Failed to build Open-Meteo client")?;
            serve(config, source).await
        }
    }
}

/// Register sensors, start the poll loop and serve until Ctrl-C.
async fn serve<S: DataSource>(config: Config, source: S) -> Result<()> {
    let (sensors, rejected) = config.sensor_definitions(|sensor| source.check_sensor(sensor));
    if !rejected.is_empty() {
        warn!("{} sensor entr(ies) rejected by validation", rejected.len());
    }

    let sensors = match config.hub {
        Some(ref hub) => {
            let sensor_host = hub
                .sensor_host
                .clone()
                .unwrap_or_else(|| config.server.host.clone());
            hub::register_sensors(
                hub,
                &sensor_host,
                config.server.port,
                Duration::from_secs(config.provider.request_timeout_seconds),
                sensors,
            )
            .await
            .context("Sensor registration with the household hub failed")?
        }
        None => {
            info!("No [hub] section, skipping sensor registration");
            sensors
        }
    };

    let store = Arc::new(ValueStore::new(
        sensors,
        config.server.default_sensor.clone(),
    ));
    if store.is_empty() {
        bail!("No usable sensors configured");
    }
    match store.default_sensor() {
        Some(sensor) => info!("Default sensor: {}", sensor.name),
        None => info!("No default sensor, /status and /value answer 404"),
    }

    let init = InitSignal::new();
    let delivery = Arc::new(
        DeliveryClient::new(Arc::clone(&store), init.clone(), &config.delivery)
            .context("Failed to build delivery client")?,
    );
    let source = Arc::new(source);
    let stop = Arc::new(AtomicBool::new(false));

    let mut scheduler = Scheduler::new(
        Arc::clone(&source),
        Arc::clone(&store),
        Arc::clone(&delivery),
        init,
        Arc::clone(&stop),
        SystemClock,
        &config.scheduler,
    );
    let mut poller = tokio::spawn(async move {
        scheduler.run().await;
        scheduler.state()
    });

    println!(
        "📡 Serving {} sensor(s) from {} on {}:{}",
        store.len(),
        source.name(),
        config.server.host,
        config.server.port
    );
    println!("   Waiting for the hub to call /init before pushing values.");

    let state = Arc::new(AppState {
        source,
        store,
        delivery,
    });

    let shutdown_flag = Arc::clone(&stop);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
        shutdown_flag.store(true, Ordering::SeqCst);
    };

    let served = server::run_server(
        state,
        &config.server.host,
        config.server.port,
        shutdown,
    )
    .await;

    stop.store(true, Ordering::SeqCst);
    // A loop still waiting for init, or asleep mid-tick, is cut short.
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut poller).await {
        Ok(Ok(state)) => debug!("Scheduler ended in state {:?}", state),
        Ok(Err(e)) => warn!("Scheduler task failed: {}", e),
        Err(_) => poller.abort(),
    }

    served
}
