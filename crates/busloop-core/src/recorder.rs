//! Periodic snapshots, the final summary, and the log format.
//!
//! The recorder runs as its own task. Every `snapshot_interval` it reads
//! each stop's waiting count and each bus's position and appends a
//! three-line snapshot record to the log:
//!
//! ```text
//! <elapsed simulated seconds>
//! <count_0> <count_1> ... <count_n-1>
//! <position_0> ... <position_m-1>
//! ```
//!
//! It also owns the run-length deadline: when it passes, the recorder
//! writes a closing snapshot and triggers shutdown. The summary record is
//! written by the scheduler once every actor has stopped:
//!
//! ```text
//! Simulation complete. See parameters below:
//! bus stops:<n> buses:<m> driving time:<secs> board time:<secs> person arrival rate:<rate>
//! max waiting queue at each stop: <max_0> ... <max_n-1>
//!
//! ```
//!
//! Snapshot values are read one at a time while actors keep running, so a
//! single record is not a consistent cross-section.
//!
//! Log writes are synchronous file I/O, so each one runs on tokio's
//! blocking pool rather than on the runtime's worker threads.
//!
//! Write failures are logged and counted but never stop the simulation.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use busloop_types::EndReason;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::actor::to_u64;
use crate::bus::BusState;
use crate::clock::SimulationClock;
use crate::config::RouteConfig;
use crate::shutdown::Shutdown;
use crate::stop::StopState;

/// First line of every summary record.
pub const SUMMARY_MARKER: &str = "Simulation complete. See parameters below:";

/// Prefix of the summary's high-water-mark line.
const MAX_LINE_PREFIX: &str = "max waiting queue at each stop:";

/// Shortest real snapshot period; `tokio::time::interval` rejects zero.
const MIN_SNAPSHOT_PERIOD: Duration = Duration::from_millis(1);

/// Errors writing the persisted log.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// Opening or appending to the log failed.
    #[error("snapshot log I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A previous write never handed the log back.
    #[error("snapshot log is closed")]
    Closed,

    /// The blocking write task panicked or was cancelled.
    #[error("snapshot log writer task failed: {source}")]
    Join {
        /// The join failure.
        #[from]
        source: tokio::task::JoinError,
    },
}

/// Errors reading a persisted log back.
#[derive(Debug, thiserror::Error)]
#[error("log line {line}: {reason}")]
pub struct LogParseError {
    /// One-based line number where parsing failed.
    pub line: usize,
    /// What was wrong with it.
    pub reason: String,
}

/// One record of the persisted log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    /// A periodic snapshot.
    Snapshot {
        /// Simulated seconds since the run started.
        elapsed_secs: u64,
        /// Waiting count per stop, in index order.
        passenger_counts: Vec<u64>,
        /// Position per bus, in index order.
        bus_positions: Vec<u64>,
    },
    /// The end-of-run summary.
    Summary(RunSummary),
}

/// Configuration echo and high-water marks written at shutdown.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Number of stops.
    pub stop_count: usize,
    /// Number of buses.
    pub bus_count: usize,
    /// Simulated seconds between stops.
    pub driving_time_secs: f64,
    /// Simulated seconds per boarding.
    pub board_time_secs: f64,
    /// Passengers per second per stop.
    pub arrival_rate: f64,
    /// Largest queue seen at each stop, in index order.
    pub max_passenger_counts: Vec<u64>,
}

impl RunSummary {
    /// Build a summary from the configuration and the stops' current marks.
    pub fn collect(config: &RouteConfig, stops: &[Arc<StopState>]) -> Self {
        Self {
            stop_count: config.stop_count(),
            bus_count: config.bus_count(),
            driving_time_secs: config.driving_time_secs(),
            board_time_secs: config.board_time_secs(),
            arrival_rate: config.arrival_rate(),
            max_passenger_counts: stops.iter().map(|s| s.max_passenger_count()).collect(),
        }
    }
}

impl LogRecord {
    /// Read a snapshot of the current stop counts and bus positions.
    pub fn snapshot(elapsed_secs: u64, stops: &[Arc<StopState>], buses: &[Arc<BusState>]) -> Self {
        Self::Snapshot {
            elapsed_secs,
            passenger_counts: stops.iter().map(|s| s.passenger_count()).collect(),
            bus_positions: buses.iter().map(|b| to_u64(b.position())).collect(),
        }
    }

    /// Encode the record exactly as it appears in the log.
    pub fn encode(&self) -> String {
        match self {
            Self::Snapshot {
                elapsed_secs,
                passenger_counts,
                bus_positions,
            } => format!(
                "{elapsed_secs}\n{}\n{}\n",
                join(passenger_counts),
                join(bus_positions)
            ),
            Self::Summary(summary) => format!(
                "{SUMMARY_MARKER}\n\
                 bus stops:{} buses:{} driving time:{} board time:{} person arrival rate:{}\n\
                 {MAX_LINE_PREFIX} {}\n\n",
                summary.stop_count,
                summary.bus_count,
                summary.driving_time_secs,
                summary.board_time_secs,
                summary.arrival_rate,
                join(&summary.max_passenger_counts),
            ),
        }
    }
}

fn join(values: &[u64]) -> String {
    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{value}");
    }
    out
}

/// Append-only destination for log records.
pub struct SnapshotLog {
    writer: Box<dyn Write + Send>,
}

impl SnapshotLog {
    /// Open `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Io`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, RecorderError> {
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    /// Log into any writer (an in-memory buffer in tests).
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    /// Append one record and flush it.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Io`] if the write or flush fails.
    pub fn append(&mut self, record: &LogRecord) -> Result<(), RecorderError> {
        self.writer.write_all(record.encode().as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Counters reported when the recorder finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderReport {
    /// Snapshot records successfully written.
    pub snapshots_written: u64,
    /// Writes that failed (snapshots and summary).
    pub persistence_failures: u64,
}

/// Periodic snapshot task.
pub struct SnapshotRecorder {
    /// `None` only while a write is in flight, or after a writer task died.
    log: Option<SnapshotLog>,
    config: RouteConfig,
    stops: Arc<[Arc<StopState>]>,
    buses: Arc<[Arc<BusState>]>,
    clock: SimulationClock,
    shutdown: Arc<Shutdown>,
    report: RecorderReport,
}

impl SnapshotRecorder {
    /// Create a recorder over the given tables.
    pub fn new(
        log: SnapshotLog,
        config: RouteConfig,
        stops: Arc<[Arc<StopState>]>,
        buses: Arc<[Arc<BusState>]>,
        clock: SimulationClock,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        Self {
            log: Some(log),
            config,
            stops,
            buses,
            clock,
            shutdown,
            report: RecorderReport {
                snapshots_written: 0,
                persistence_failures: 0,
            },
        }
    }

    /// Write snapshots until shutdown.
    ///
    /// The first snapshot is taken immediately. If the run-length deadline
    /// passes first, a closing snapshot is written and shutdown is
    /// triggered with [`EndReason::RunLengthReached`].
    pub async fn run_until_shutdown(&mut self) {
        let period = self
            .clock
            .real_interval(self.config.snapshot_interval())
            .max(MIN_SNAPSHOT_PERIOD);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = self.clock.deadline(self.config.run_length());

        debug!(
            period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "snapshot recorder started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep_until(deadline) => {
                    if self.shutdown.trigger(EndReason::RunLengthReached) {
                        info!(
                            elapsed_secs = self.clock.elapsed_sim_secs(),
                            run_length_secs = self.config.run_length().as_secs(),
                            "run length reached"
                        );
                        self.record_snapshot().await;
                    }
                    break;
                }
                _ = ticker.tick() => self.record_snapshot().await,
            }
        }

        debug!(
            snapshots = self.report.snapshots_written,
            failures = self.report.persistence_failures,
            "snapshot recorder stopped"
        );
    }

    /// Append one snapshot of the current state.
    pub async fn record_snapshot(&mut self) {
        let record = LogRecord::snapshot(self.clock.elapsed_sim_secs(), &self.stops, &self.buses);
        match self.write(record).await {
            Ok(()) => {
                self.report.snapshots_written = self.report.snapshots_written.saturating_add(1);
            }
            Err(e) => {
                self.report.persistence_failures =
                    self.report.persistence_failures.saturating_add(1);
                error!(error = %e, "failed to write snapshot");
            }
        }
    }

    /// Append the end-of-run summary and return the final counters.
    pub async fn finish(mut self) -> (RunSummary, RecorderReport) {
        let summary = RunSummary::collect(&self.config, &self.stops);
        if let Err(e) = self.write(LogRecord::Summary(summary.clone())).await {
            self.report.persistence_failures = self.report.persistence_failures.saturating_add(1);
            error!(error = %e, "failed to write run summary");
        }
        (summary, self.report)
    }

    /// Append `record` on the blocking pool and take the log back.
    async fn write(&mut self, record: LogRecord) -> Result<(), RecorderError> {
        let mut log = self.log.take().ok_or(RecorderError::Closed)?;
        let (log, result) = tokio::task::spawn_blocking(move || {
            let result = log.append(&record);
            (log, result)
        })
        .await?;
        self.log = Some(log);
        result
    }
}

/// Parse a log back into records.
///
/// Blank lines between records are ignored, so several runs appended to the
/// same file parse as one sequence.
///
/// # Errors
///
/// Returns [`LogParseError`] naming the first line that does not fit the
/// format.
pub fn parse_log(text: &str) -> Result<Vec<LogRecord>, LogParseError> {
    let mut lines = text.lines().enumerate().map(|(i, l)| (i.saturating_add(1), l));
    let mut records = Vec::new();

    while let Some((number, line)) = lines.next() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == SUMMARY_MARKER {
            let (config_no, config_line) = next_line(&mut lines, number, "summary parameters")?;
            let (max_no, max_line) = next_line(&mut lines, config_no, "summary maxima")?;
            records.push(LogRecord::Summary(parse_summary(
                config_no,
                config_line,
                max_no,
                max_line,
            )?));
        } else {
            let elapsed_secs = line.parse().map_err(|_err| LogParseError {
                line: number,
                reason: format!("expected elapsed seconds, got {line:?}"),
            })?;
            let (counts_no, counts) = next_line(&mut lines, number, "passenger counts")?;
            let (positions_no, positions) = next_line(&mut lines, counts_no, "bus positions")?;
            records.push(LogRecord::Snapshot {
                elapsed_secs,
                passenger_counts: parse_numbers(counts_no, counts)?,
                bus_positions: parse_numbers(positions_no, positions)?,
            });
        }
    }

    Ok(records)
}

fn next_line<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    previous: usize,
    what: &str,
) -> Result<(usize, &'a str), LogParseError> {
    lines.next().ok_or_else(|| LogParseError {
        line: previous.saturating_add(1),
        reason: format!("missing {what} line"),
    })
}

fn parse_numbers(line_no: usize, line: &str) -> Result<Vec<u64>, LogParseError> {
    let values = line
        .split_whitespace()
        .map(|token| {
            token.parse().map_err(|_err| LogParseError {
                line: line_no,
                reason: format!("expected an integer, got {token:?}"),
            })
        })
        .collect::<Result<Vec<u64>, _>>()?;
    if values.is_empty() {
        return Err(LogParseError {
            line: line_no,
            reason: "expected at least one value".to_owned(),
        });
    }
    Ok(values)
}

fn parse_summary(
    config_no: usize,
    config_line: &str,
    max_no: usize,
    max_line: &str,
) -> Result<RunSummary, LogParseError> {
    let maxima = max_line
        .trim()
        .strip_prefix(MAX_LINE_PREFIX)
        .ok_or_else(|| LogParseError {
            line: max_no,
            reason: format!("expected {MAX_LINE_PREFIX:?}"),
        })?;
    Ok(RunSummary {
        stop_count: summary_field(config_no, config_line, "bus stops")?,
        bus_count: summary_field(config_no, config_line, "buses")?,
        driving_time_secs: summary_field(config_no, config_line, "driving time")?,
        board_time_secs: summary_field(config_no, config_line, "board time")?,
        arrival_rate: summary_field(config_no, config_line, "person arrival rate")?,
        max_passenger_counts: parse_numbers(max_no, maxima)?,
    })
}

/// Extract the value after `key:` up to the next whitespace.
fn summary_field<T: std::str::FromStr>(
    line_no: usize,
    line: &str,
    key: &str,
) -> Result<T, LogParseError> {
    let missing = || LogParseError {
        line: line_no,
        reason: format!("missing or malformed {key:?}"),
    };
    let tag = format!("{key}:");
    let start = line.find(&tag).ok_or_else(missing)?;
    let rest = line.get(start.saturating_add(tag.len())..).ok_or_else(missing)?;
    rest.split_whitespace()
        .next()
        .and_then(|value| value.parse().ok())
        .ok_or_else(missing)
}
