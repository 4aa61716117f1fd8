//! Engine binary for the Busloop route simulation.
//!
//! # Startup Sequence
//!
//! 1. Load configuration: the path given as the only argument, else
//!    `busloop-config.yaml` in the working directory, else defaults.
//!    Files ending in `.yaml`/`.yml` are YAML; anything else is read as
//!    the six-integer legacy input file.
//! 2. Initialize structured logging (tracing)
//! 3. Apply `BUSLOOP_LOG_PATH` / `BUSLOOP_TIME_SCALE` overrides, then
//!    validate configuration into a route record
//! 4. Open the append-only snapshot log
//! 5. Start the display feed (state changes logged at `debug`)
//! 6. Start every stop, bus, and the recorder
//! 7. Map Ctrl-C to a shutdown request
//! 8. Wait for the run to end and log the result

mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use busloop_core::config::SimulationConfig;
use busloop_core::display::BroadcastDisplay;
use busloop_core::recorder::SnapshotLog;
use busloop_core::scheduler;
use busloop_types::EndReason;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Configuration file looked up when no argument is given.
const DEFAULT_CONFIG_PATH: &str = "busloop-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the log cannot be opened,
/// or a simulation task fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (mut config, source) = load_config()?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!(source = %source.display(), "busloop-engine starting");

    // 3. Environment overrides (after logging, so rejected values are
    //    reported), then validate.
    config.simulation.apply_env_overrides();
    let route = config.validate().map_err(EngineError::from)?;

    // 4. Open the log.
    let log_path = config.simulation.log_path.clone();
    let log = SnapshotLog::open(&log_path).map_err(EngineError::from)?;
    info!(path = %log_path.display(), "snapshot log opened");

    // 5. Display feed.
    let display = Arc::new(BroadcastDisplay::new());
    let display_task = tokio::spawn(render_changes(display.subscribe()));

    // 6. Start the simulation.
    let handle = scheduler::start(route, log, display.clone());

    // 7. Ctrl-C stops the run the same way the run length does.
    let signal = handle.shutdown_signal();
    let ctrl_c = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                if signal.trigger(EndReason::StopRequested) {
                    info!("Ctrl-C received, stopping");
                }
            }
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
        }
    });

    // 8. Wait and report.
    let result = handle.wait().await.map_err(EngineError::from)?;
    ctrl_c.abort();

    // Dropping the last sender closes the feed.
    drop(display);
    let _ = display_task.await;

    info!(
        end_reason = ?result.end_reason,
        started_at = %result.started_at,
        elapsed_secs = result.elapsed_secs,
        snapshots = result.snapshots_written,
        persistence_failures = result.persistence_failures,
        total_arrivals = result.total_arrivals,
        total_boarded = result.total_boarded,
        "busloop-engine shutdown complete"
    );

    if result.persistence_failures > 0 {
        warn!(
            failures = result.persistence_failures,
            path = %log_path.display(),
            "some records were not written"
        );
    }

    Ok(())
}

/// Pick and load the configuration source.
fn load_config() -> Result<(SimulationConfig, PathBuf), EngineError> {
    let mut args = std::env::args_os().skip(1);
    let explicit = args.next().map(PathBuf::from);
    if args.next().is_some() {
        return Err(EngineError::Usage {
            message: "expected at most one argument: the configuration file".to_owned(),
        });
    }

    match explicit {
        Some(path) => Ok((load_file(&path)?, path)),
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                Ok((load_file(&path)?, path))
            } else {
                Ok((SimulationConfig::parse("")?, PathBuf::from("<defaults>")))
            }
        }
    }
}

/// Load YAML or legacy input depending on the extension.
fn load_file(path: &Path) -> Result<SimulationConfig, EngineError> {
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
    if is_yaml {
        Ok(SimulationConfig::from_file(path)?)
    } else {
        let text = std::fs::read_to_string(path).map_err(busloop_core::config::ConfigError::from)?;
        Ok(SimulationConfig::from_legacy_input(&text)?)
    }
}

/// Render the display feed into the log, one JSON object per change.
async fn render_changes(
    mut rx: tokio::sync::broadcast::Receiver<busloop_types::StateChange>,
) {
    loop {
        match rx.recv().await {
            Ok(change) => match serde_json::to_string(&change) {
                Ok(json) => debug!(target: "busloop::display", "{json}"),
                Err(e) => warn!(error = %e, "failed to serialize state change"),
            },
            Err(RecvError::Lagged(skipped)) => {
                debug!(target: "busloop::display", skipped, "display lagged, skipping ahead");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
