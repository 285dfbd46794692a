//! # Quad Bridge
//!
//! Bridge a message-bus control plane to radio-linked quadrotors.
//!
//! This application opens a radio session per configured vehicle, keeps the
//! onboard command-timeout failsafe fed with fresh setpoints, and relays
//! telemetry and parameters between the device and the bus.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use quad_bridge::bus::{BroadcastSink, CommandTopic, MemoryParamStore, TelemetryEvent};
use quad_bridge::config::{Config, LoggingConfig};
use quad_bridge::link::sim::SimLink;
use quad_bridge::link::{event_channel, init_drivers, RadioLink};
use quad_bridge::session::{BusEndpoints, Session};

/// Configuration file used when no path is given on the command line.
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Capacity of each vehicle's telemetry fan-out channel.
const TELEMETRY_CAPACITY: usize = 256;

/// Main entry point for the Quad Bridge application
///
/// Loads the configuration, initializes the radio drivers, spawns one session
/// task per configured vehicle and then waits for Ctrl+C.
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration from the path given as the first argument
///      (falls back to `config/default.toml`)
///    - Set up logging with tracing subscriber, optionally into a daily
///      rolling file (see `[logging]` in the configuration)
///    - Initialize the radio drivers
///
/// 2. **Sessions**
///    - Spawn one session task per `[[vehicles]]` entry; each session owns
///      its connection state machine and its setpoint watchdog
///    - Tap the telemetry fan-out and log event traffic at debug level
///
/// 3. **Graceful Shutdown**
///    - On Ctrl+C, request shutdown on every session
///    - Each session drains zero setpoints to its vehicle so the motors ramp
///      down instead of cutting out mid-command
///    - Wait for all session tasks to finish, then exit
///
/// # Errors
///
/// Returns error if:
/// - The configuration file cannot be read or fails validation
/// - The radio drivers cannot be initialized
///
/// # Examples
///
/// Run the application:
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO quad_bridge: Quad Bridge v0.1.0 starting...
/// INFO quad_bridge::link: Radio drivers initialized (interface: radio)
/// INFO quad_bridge::session: Adding radio://0/80/2M/E7E7E7E7E7 as cf1 with trim(0, 0). Logging: true
/// INFO quad_bridge::session: Connecting to radio://0/80/2M/E7E7E7E7E7
/// INFO quad_bridge::session: Connected to radio://0/80/2M/E7E7E7E7E7
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;

    // The guard flushes the rolling-file writer on drop; keep it for the
    // lifetime of the process.
    let _log_guard = init_logging(&config.logging);

    info!("Quad Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {}", config_path);

    let drivers = init_drivers(&config.driver)?;

    // The parameter store is shared (paths carry the vehicle prefix);
    // command topics and telemetry streams are per vehicle.
    let params = Arc::new(MemoryParamStore::new());

    if config.vehicles.is_empty() {
        warn!("No vehicles configured, nothing to bridge");
    }

    let settings = config.session_settings();
    let mut sessions = Vec::with_capacity(config.vehicles.len());
    for vehicle in &config.vehicles {
        let (events_tx, events_rx) = event_channel();
        let link: Arc<dyn RadioLink> = Arc::new(SimLink::new(events_tx));
        let telemetry = Arc::new(BroadcastSink::new(TELEMETRY_CAPACITY));
        spawn_telemetry_tap(vehicle.prefix.clone(), telemetry.subscribe());

        let bus = BusEndpoints {
            commands: Arc::new(CommandTopic::new()),
            telemetry,
            params: params.clone(),
        };
        sessions.push(Session::spawn(
            &drivers,
            vehicle.clone(),
            settings.clone(),
            link,
            events_rx,
            bus,
        ));
    }

    info!("Press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    for session in &sessions {
        session.shutdown();
    }
    for session in sessions {
        let prefix = session.prefix().to_string();
        session.join().await;
        debug!("Session for {prefix} closed");
    }

    info!("All sessions closed");
    Ok(())
}

/// Log one vehicle's telemetry traffic at debug level, so
/// `RUST_LOG=debug` shows the pipeline moving without a bus attached.
fn spawn_telemetry_tap(prefix: String, mut events: Receiver<TelemetryEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!("[{prefix}] telemetry event on '{}'", event.stream()),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("[{prefix}] telemetry tap lagged, skipped {skipped} events")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Initialize the tracing subscriber.
///
/// Defaults to INFO on the console; `RUST_LOG` overrides the filter. When
/// `[logging] dir` is set, output goes to a daily rolling file in that
/// directory instead and the returned guard must stay alive so buffered
/// lines are flushed on exit.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    match &config.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        // The shipped default configuration must always pass validation.
        let config = Config::load(DEFAULT_CONFIG_PATH).unwrap();
        assert!(!config.vehicles.is_empty(), "default config should bridge a vehicle");
        assert_eq!(config.vehicles[0].prefix, "cf1");
    }

    #[test]
    fn test_default_send_period_beats_failsafe() {
        // The device cuts motors roughly 500ms after the last setpoint; the
        // shipped send period has to stay well inside that.
        let config = Config::load(DEFAULT_CONFIG_PATH).unwrap();
        let settings = config.session_settings();
        assert!(settings.send_period < std::time::Duration::from_millis(500));
    }
}
