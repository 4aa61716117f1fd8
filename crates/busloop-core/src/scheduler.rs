//! Simulation start-up, supervision, and shutdown.
//!
//! [`start`] builds every stop and bus from a [`RouteConfig`], spawns one
//! task per stop (arrivals), one per bus (travel and boarding), and a
//! supervisor task that runs the [`SnapshotRecorder`]. The tasks run on the
//! multi-threaded tokio runtime, so actors execute in parallel across
//! worker threads.
//!
//! # Shutdown sequence
//!
//! 1. Shutdown is triggered, either by the recorder when the run length
//!    passes or through [`SimulationHandle::request_shutdown`].
//! 2. Every actor's pending wait is cancelled and its loop exits.
//! 3. The supervisor joins all actors, then writes the summary record.
//!    Nothing writes to the log after that.

use std::sync::Arc;

use busloop_types::{BusIndex, EndReason, StopIndex};
use chrono::{DateTime, Utc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

use crate::actor::ActorContext;
use crate::arrival::ArrivalProcess;
use crate::bus::{self, BusState, BusTiming};
use crate::clock::SimulationClock;
use crate::config::RouteConfig;
use crate::display::DisplaySink;
use crate::recorder::{SnapshotLog, SnapshotRecorder};
use crate::shutdown::Shutdown;
use crate::stop::{self, StopState};

/// Errors that can occur while supervising a run.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// An actor task panicked or was aborted.
    #[error("{failed} actor task(s) failed; first error: {source}")]
    ActorFailed {
        /// How many actor tasks failed.
        failed: usize,
        /// The first join error.
        source: tokio::task::JoinError,
    },

    /// The supervisor task itself panicked or was aborted.
    #[error("supervisor task failed: {source}")]
    Supervisor {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationResult {
    /// Why the run ended.
    pub end_reason: EndReason,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Simulated seconds elapsed when the summary was written.
    pub elapsed_secs: u64,
    /// Periodic snapshots written.
    pub snapshots_written: u64,
    /// Log writes that failed.
    pub persistence_failures: u64,
    /// Passengers generated across all stops.
    pub total_arrivals: u64,
    /// Passengers boarded across all buses.
    pub total_boarded: u64,
    /// High-water mark per stop, in index order.
    pub max_passenger_counts: Vec<u64>,
}

/// What an actor task returns when it exits.
enum ActorOutcome {
    Stop { arrivals: u64 },
    Bus { boarded: u64 },
}

/// Handle to a running simulation.
pub struct SimulationHandle {
    stops: Arc<[Arc<StopState>]>,
    buses: Arc<[Arc<BusState>]>,
    shutdown: Arc<Shutdown>,
    supervisor: JoinHandle<Result<SimulationResult, SchedulerError>>,
}

impl SimulationHandle {
    /// Ask the run to stop.
    ///
    /// Returns `true` if this call ended the run, `false` if it had
    /// already been stopped (by an earlier request or the run length).
    pub fn request_shutdown(&self) -> bool {
        let first = self.shutdown.trigger(EndReason::StopRequested);
        if first {
            info!("shutdown requested");
        }
        first
    }

    /// The shared shutdown signal, for wiring external stop sources.
    pub fn shutdown_signal(&self) -> Arc<Shutdown> {
        Arc::clone(&self.shutdown)
    }

    /// All stops, in index order.
    pub fn stops(&self) -> &[Arc<StopState>] {
        &self.stops
    }

    /// All buses, in index order.
    pub fn buses(&self) -> &[Arc<BusState>] {
        &self.buses
    }

    /// Wait for the run to end and every task to stop.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if any task panicked. The summary record
    /// is still written when an actor fails.
    pub async fn wait(self) -> Result<SimulationResult, SchedulerError> {
        match self.supervisor.await {
            Ok(result) => result,
            Err(source) => {
                // Make sure actors do not outlive a dead supervisor.
                let _ = self.shutdown.trigger(EndReason::StopRequested);
                Err(SchedulerError::Supervisor { source })
            }
        }
    }
}

/// Build the route and start every actor.
///
/// Must be called from within a tokio runtime.
pub fn start(
    config: RouteConfig,
    log: SnapshotLog,
    display: Arc<dyn DisplaySink>,
) -> SimulationHandle {
    let clock = SimulationClock::start(config.time_scale());
    let shutdown = Arc::new(Shutdown::new());

    let stops: Arc<[Arc<StopState>]> = (0..config.stop_count())
        .map(|i| Arc::new(StopState::new(StopIndex(i))))
        .collect();
    let buses: Arc<[Arc<BusState>]> = (0..config.bus_count())
        .map(|i| {
            Arc::new(BusState::new(
                BusIndex(i),
                config.initial_position(i),
                config.stop_count(),
            ))
        })
        .collect();

    let ctx = ActorContext {
        clock,
        shutdown: Arc::clone(&shutdown),
        display,
    };
    let timing = BusTiming {
        board_wait: clock.real_duration(config.board_time_secs()),
        drive_wait: clock.real_duration(config.driving_time_secs()),
    };

    info!(
        stop_count = config.stop_count(),
        bus_count = config.bus_count(),
        driving_time_secs = config.driving_time_secs(),
        board_time_secs = config.board_time_secs(),
        arrival_rate = config.arrival_rate(),
        run_length_secs = config.run_length().as_secs(),
        snapshot_interval_secs = config.snapshot_interval().as_secs(),
        time_scale = config.time_scale(),
        started_at = %clock.started_at(),
        "simulation starting"
    );

    let mut actors = JoinSet::new();
    for stop_state in stops.iter() {
        let index = stop_state.index().get();
        let process = ArrivalProcess::for_stop(config.seed(), index, config.arrival_rate());
        let task = stop::run_arrivals(Arc::clone(stop_state), process, ctx.clone());
        actors.spawn(async move { ActorOutcome::Stop { arrivals: task.await } });
    }
    for bus_state in buses.iter() {
        let task = bus::run_bus(Arc::clone(bus_state), Arc::clone(&stops), timing, ctx.clone());
        actors.spawn(async move { ActorOutcome::Bus { boarded: task.await } });
    }

    let recorder = SnapshotRecorder::new(
        log,
        config,
        Arc::clone(&stops),
        Arc::clone(&buses),
        clock,
        Arc::clone(&shutdown),
    );
    let supervisor = tokio::spawn(supervise(recorder, actors, clock, Arc::clone(&shutdown)));

    SimulationHandle {
        stops,
        buses,
        shutdown,
        supervisor,
    }
}

/// Run the recorder until shutdown, join every actor, then write the summary.
async fn supervise(
    mut recorder: SnapshotRecorder,
    mut actors: JoinSet<ActorOutcome>,
    clock: SimulationClock,
    shutdown: Arc<Shutdown>,
) -> Result<SimulationResult, SchedulerError> {
    recorder.run_until_shutdown().await;

    let mut total_arrivals: u64 = 0;
    let mut total_boarded: u64 = 0;
    let mut failed: usize = 0;
    let mut first_failure = None;

    while let Some(joined) = actors.join_next().await {
        match joined {
            Ok(ActorOutcome::Stop { arrivals }) => {
                total_arrivals = total_arrivals.saturating_add(arrivals);
            }
            Ok(ActorOutcome::Bus { boarded }) => {
                total_boarded = total_boarded.saturating_add(boarded);
            }
            Err(e) => {
                error!(error = %e, "actor task failed");
                failed = failed.saturating_add(1);
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
    }

    let (summary, report) = recorder.finish().await;
    let end_reason = shutdown.reason().unwrap_or(EndReason::StopRequested);
    let elapsed_secs = clock.elapsed_sim_secs();

    info!(
        reason = ?end_reason,
        elapsed_secs,
        snapshots = report.snapshots_written,
        persistence_failures = report.persistence_failures,
        total_arrivals,
        total_boarded,
        max_passenger_counts = ?summary.max_passenger_counts,
        "simulation ended"
    );

    if let Some(source) = first_failure {
        return Err(SchedulerError::ActorFailed { failed, source });
    }

    Ok(SimulationResult {
        end_reason,
        started_at: clock.started_at(),
        elapsed_secs,
        snapshots_written: report.snapshots_written,
        persistence_failures: report.persistence_failures,
        total_arrivals,
        total_boarded,
        max_passenger_counts: summary.max_passenger_counts,
    })
}
