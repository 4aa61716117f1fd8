//! Configuration loading and the validated route record.
//!
//! The canonical configuration lives in `busloop-config.yaml`. This module
//! defines strongly-typed structs that mirror the YAML structure, a loader
//! for the older six-integer input file, and [`SimulationConfig::validate`]
//! which turns either into the immutable [`RouteConfig`] the engine runs on.
//!
//! # Time unit
//!
//! Every duration is expressed in simulated seconds and the arrival rate in
//! passengers per simulated second per stop. `time_scale` converts simulated
//! seconds to wall-clock seconds: a wait of `s` simulated seconds sleeps for
//! `s / time_scale` real seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Seconds in one minute, used when converting the legacy input format.
const SECS_PER_MINUTE: u64 = 60;

/// Seconds in one hour, used when converting the legacy input format.
const SECS_PER_HOUR: u64 = 3_600;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },

    /// The legacy six-integer input file is malformed.
    #[error("invalid legacy input: {reason}")]
    Legacy {
        /// Explanation of what is wrong with the input.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
///
/// Mirrors the structure of `busloop-config.yaml`. All fields have
/// defaults matching a 15-stop, 5-bus, eight-hour service day.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Route topology.
    #[serde(default)]
    pub route: RouteSection,

    /// Driving, boarding, and arrival timings.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Run length, snapshot cadence, clock scaling, and output.
    #[serde(default)]
    pub simulation: RunConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Route topology: how many stops and buses share the loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteSection {
    /// Number of stops on the loop.
    #[serde(default = "default_stop_count")]
    pub stop_count: usize,

    /// Number of buses circulating.
    #[serde(default = "default_bus_count")]
    pub bus_count: usize,
}

impl Default for RouteSection {
    fn default() -> Self {
        Self {
            stop_count: default_stop_count(),
            bus_count: default_bus_count(),
        }
    }
}

/// Event timings, all in simulated seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimingConfig {
    /// Time to drive between adjacent stops.
    #[serde(default = "default_driving_time_secs")]
    pub driving_time_secs: f64,

    /// Time to board one passenger.
    #[serde(default = "default_board_time_secs")]
    pub board_time_secs: f64,

    /// Mean passenger arrivals per second at each stop.
    #[serde(default = "default_arrival_rate")]
    pub arrival_rate: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            driving_time_secs: default_driving_time_secs(),
            board_time_secs: default_board_time_secs(),
            arrival_rate: default_arrival_rate(),
        }
    }
}

/// Run-level settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunConfig {
    /// Total simulated seconds before the run stops itself.
    #[serde(default = "default_run_length_secs")]
    pub run_length_secs: u64,

    /// Simulated seconds between periodic snapshots.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    /// Simulated seconds per wall-clock second.
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,

    /// Base seed for the per-stop arrival generators.
    #[serde(default = "default_seed")]
    pub seed: u32,

    /// Path of the append-only snapshot log.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_length_secs: default_run_length_secs(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            time_scale: default_time_scale(),
            seed: default_seed(),
            log_path: default_log_path(),
        }
    }
}

impl RunConfig {
    /// Apply overrides from the process environment.
    ///
    /// Call this after the tracing subscriber is installed so a rejected
    /// value is reported. See [`Self::apply_overrides_from`].
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides read through `lookup`.
    ///
    /// - `BUSLOOP_LOG_PATH` replaces `log_path`.
    /// - `BUSLOOP_TIME_SCALE` replaces `time_scale` when it parses as a float;
    ///   anything else is logged and ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_LOG_PATH) {
            self.log_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(ENV_TIME_SCALE) {
            match raw.parse::<f64>() {
                Ok(scale) => self.time_scale = scale,
                Err(e) => warn!(value = %raw, error = %e, "ignoring BUSLOOP_TIME_SCALE"),
            }
        }
    }
}

/// Environment variable overriding [`RunConfig::log_path`].
pub const ENV_LOG_PATH: &str = "BUSLOOP_LOG_PATH";

/// Environment variable overriding [`RunConfig::time_scale`].
pub const ENV_TIME_SCALE: &str = "BUSLOOP_TIME_SCALE";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment overrides are not applied here; the caller applies them
    /// with [`RunConfig::apply_env_overrides`] once logging is up.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Parse the six-integer input file used by the first version of the
    /// simulator.
    ///
    /// Tokens are whitespace separated, in the order: stop count, bus count,
    /// driving time (minutes), board time (seconds), arrival rate (persons
    /// per minute), run length (hours). Values are converted to seconds;
    /// every other setting keeps its default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Legacy`] if fewer than six tokens are present
    /// or any token is not a non-negative integer.
    pub fn from_legacy_input(text: &str) -> Result<Self, ConfigError> {
        let mut values = [0_u64; 6];
        let mut tokens = text.split_whitespace();
        for (slot, field) in values.iter_mut().zip(LEGACY_FIELDS) {
            let token = tokens.next().ok_or_else(|| ConfigError::Legacy {
                reason: format!("missing value for {field}"),
            })?;
            *slot = token.parse().map_err(|_err| ConfigError::Legacy {
                reason: format!("{field} must be a non-negative integer, got {token:?}"),
            })?;
        }
        let [stops, buses, driving_min, board_secs, persons_per_min, run_hours] = values;

        let mut config = Self::default();
        config.route.stop_count = usize::try_from(stops).map_err(|_err| ConfigError::Legacy {
            reason: "stop count out of range".to_owned(),
        })?;
        config.route.bus_count = usize::try_from(buses).map_err(|_err| ConfigError::Legacy {
            reason: "bus count out of range".to_owned(),
        })?;
        config.timing.driving_time_secs = secs_to_f64(driving_min.saturating_mul(SECS_PER_MINUTE));
        config.timing.board_time_secs = secs_to_f64(board_secs);
        config.timing.arrival_rate = secs_to_f64(persons_per_min) / secs_to_f64(SECS_PER_MINUTE);
        config.simulation.run_length_secs = run_hours.saturating_mul(SECS_PER_HOUR);
        Ok(config)
    }

    /// Check every value and produce the immutable [`RouteConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if any count is zero, any duration
    /// is negative or not finite, the arrival rate or time scale is not a
    /// positive finite number, or the run length or snapshot interval is 0.
    pub fn validate(&self) -> Result<RouteConfig, ConfigError> {
        if self.route.stop_count == 0 {
            return Err(invalid("stop_count must be at least 1"));
        }
        if self.route.bus_count == 0 {
            return Err(invalid("bus_count must be at least 1"));
        }
        if self.route.bus_count > self.route.stop_count {
            warn!(
                stop_count = self.route.stop_count,
                bus_count = self.route.bus_count,
                "more buses than stops; every bus starts at stop 0"
            );
        }
        let arrival_rate = self.timing.arrival_rate;
        if !arrival_rate.is_finite() || arrival_rate <= 0.0 {
            return Err(invalid("arrival_rate must be a positive finite number"));
        }
        let time_scale = self.simulation.time_scale;
        if !time_scale.is_finite() || time_scale <= 0.0 {
            return Err(invalid("time_scale must be a positive finite number"));
        }
        if self.simulation.run_length_secs == 0 {
            return Err(invalid("run_length_secs must be at least 1"));
        }
        if self.simulation.snapshot_interval_secs == 0 {
            return Err(invalid("snapshot_interval_secs must be at least 1"));
        }

        Ok(RouteConfig {
            stop_count: self.route.stop_count,
            bus_count: self.route.bus_count,
            driving_time_secs: non_negative(self.timing.driving_time_secs, "driving_time_secs")?,
            board_time_secs: non_negative(self.timing.board_time_secs, "board_time_secs")?,
            arrival_rate,
            run_length: Duration::from_secs(self.simulation.run_length_secs),
            snapshot_interval: Duration::from_secs(self.simulation.snapshot_interval_secs),
            time_scale,
            seed: self.simulation.seed,
        })
    }
}

/// Immutable configuration record consumed by every actor.
///
/// Only obtainable through [`SimulationConfig::validate`], so holders can
/// rely on the ranges documented on each accessor.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteConfig {
    stop_count: usize,
    bus_count: usize,
    driving_time_secs: f64,
    board_time_secs: f64,
    arrival_rate: f64,
    run_length: Duration,
    snapshot_interval: Duration,
    time_scale: f64,
    seed: u32,
}

impl RouteConfig {
    /// Number of stops, at least 1.
    pub const fn stop_count(&self) -> usize {
        self.stop_count
    }

    /// Number of buses, at least 1.
    pub const fn bus_count(&self) -> usize {
        self.bus_count
    }

    /// Simulated seconds between adjacent stops.
    pub const fn driving_time_secs(&self) -> f64 {
        self.driving_time_secs
    }

    /// Simulated seconds to board one passenger.
    pub const fn board_time_secs(&self) -> f64 {
        self.board_time_secs
    }

    /// Mean passengers per simulated second at each stop.
    pub const fn arrival_rate(&self) -> f64 {
        self.arrival_rate
    }

    /// Simulated run length.
    pub const fn run_length(&self) -> Duration {
        self.run_length
    }

    /// Simulated time between snapshots.
    pub const fn snapshot_interval(&self) -> Duration {
        self.snapshot_interval
    }

    /// Simulated seconds per wall-clock second.
    pub const fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Base seed for the arrival generators.
    pub const fn seed(&self) -> u32 {
        self.seed
    }

    /// Initial position of bus `bus`: `floor(stops / buses) * bus`.
    ///
    /// Degenerates to stop 0 for every bus when there are more buses than
    /// stops. The result is reduced modulo the stop count so it is always a
    /// valid index.
    pub fn initial_position(&self, bus: usize) -> usize {
        let spacing = self.stop_count.checked_div(self.bus_count).unwrap_or(0);
        spacing
            .saturating_mul(bus)
            .checked_rem(self.stop_count)
            .unwrap_or(0)
    }
}

/// Field names of the legacy input file, in order.
const LEGACY_FIELDS: [&str; 6] = [
    "stop count",
    "bus count",
    "driving time",
    "board time",
    "arrival rate",
    "run length",
];

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

fn non_negative(value: f64, field: &str) -> Result<f64, ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            reason: format!("{field} must be a non-negative finite number"),
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn secs_to_f64(secs: u64) -> f64 {
    secs as f64
}

const fn default_stop_count() -> usize {
    15
}

const fn default_bus_count() -> usize {
    5
}

const fn default_driving_time_secs() -> f64 {
    300.0
}

const fn default_board_time_secs() -> f64 {
    2.0
}

fn default_arrival_rate() -> f64 {
    5.0 / 60.0
}

const fn default_run_length_secs() -> u64 {
    28_800
}

const fn default_snapshot_interval_secs() -> u64 {
    1_800
}

const fn default_time_scale() -> f64 {
    1.0
}

const fn default_seed() -> u32 {
    100
}

fn default_log_path() -> PathBuf {
    PathBuf::from("save.txt")
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        assert_eq!(config.route.stop_count, 15);
        assert_eq!(config.route.bus_count, 5);
        assert_eq!(config.simulation.seed, 100);
        let route = config.validate().unwrap();
        assert_eq!(route.run_length(), Duration::from_secs(28_800));
        assert_eq!(route.snapshot_interval(), Duration::from_secs(1_800));
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
route:
  stop_count: 3
  bus_count: 1

timing:
  driving_time_secs: 1
  board_time_secs: 0.5
  arrival_rate: 100

simulation:
  run_length_secs: 20
  snapshot_interval_secs: 2
  time_scale: 60
  seed: 7
  log_path: "out/run.txt"

logging:
  level: "debug"
"#;
        let config = SimulationConfig::parse(yaml).unwrap();
        assert_eq!(config.route.stop_count, 3);
        assert_eq!(config.timing.board_time_secs, 0.5);
        assert_eq!(config.simulation.seed, 7);
        assert_eq!(config.logging.level, "debug");

        let route = config.validate().unwrap();
        assert_eq!(route.arrival_rate(), 100.0);
        assert_eq!(route.time_scale(), 60.0);
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = SimulationConfig::parse("route:\n  bus_count: 2\n").unwrap();
        assert_eq!(config.route.bus_count, 2);
        assert_eq!(config.route.stop_count, 15);
        assert_eq!(config.timing.driving_time_secs, 300.0);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(SimulationConfig::parse("").is_ok());
    }

    #[test]
    fn rejects_zero_counts() {
        let mut config = SimulationConfig::default();
        config.route.stop_count = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = SimulationConfig::default();
        config.route.bus_count = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rejects_bad_rates_and_durations() {
        let mut config = SimulationConfig::default();
        config.timing.arrival_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.timing.arrival_rate = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.timing.board_time_secs = -1.0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.simulation.time_scale = 0.0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.simulation.snapshot_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.simulation.run_length_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn initial_positions_spread_evenly() {
        let mut config = SimulationConfig::default();
        config.route.stop_count = 15;
        config.route.bus_count = 5;
        let route = config.validate().unwrap();
        let positions: Vec<usize> = (0..5).map(|b| route.initial_position(b)).collect();
        assert_eq!(positions, vec![0, 3, 6, 9, 12]);
    }

    #[test]
    fn more_buses_than_stops_start_at_zero() {
        let mut config = SimulationConfig::default();
        config.route.stop_count = 2;
        config.route.bus_count = 4;
        let route = config.validate().unwrap();
        assert!((0..4).all(|b| route.initial_position(b) == 0));
    }

    #[test]
    fn legacy_input_converts_units() {
        let config = SimulationConfig::from_legacy_input("15 5 5 2 5 8").unwrap();
        assert_eq!(config.route.stop_count, 15);
        assert_eq!(config.route.bus_count, 5);
        assert_eq!(config.timing.driving_time_secs, 300.0);
        assert_eq!(config.timing.board_time_secs, 2.0);
        assert_eq!(config.timing.arrival_rate, 5.0 / 60.0);
        assert_eq!(config.simulation.run_length_secs, 28_800);
    }

    #[test]
    fn legacy_input_tolerates_newlines() {
        let config = SimulationConfig::from_legacy_input("3\n1\n1 1\n  6 1\n").unwrap();
        assert_eq!(config.route.stop_count, 3);
        assert_eq!(config.timing.arrival_rate, 0.1);
    }

    #[test]
    fn legacy_input_rejects_short_or_bad_input() {
        assert!(matches!(
            SimulationConfig::from_legacy_input("15 5 5"),
            Err(ConfigError::Legacy { .. })
        ));
        assert!(matches!(
            SimulationConfig::from_legacy_input("15 5 five 2 5 8"),
            Err(ConfigError::Legacy { .. })
        ));
    }

    #[test]
    fn overrides_replace_log_path_and_scale() {
        let vars = BTreeMap::from([
            (ENV_LOG_PATH, "/tmp/busloop.txt"),
            (ENV_TIME_SCALE, "120"),
        ]);
        let mut run = RunConfig::default();
        run.apply_overrides_from(|key| vars.get(key).map(|v| (*v).to_owned()));
        assert_eq!(run.log_path, PathBuf::from("/tmp/busloop.txt"));
        assert_eq!(run.time_scale, 120.0);
    }

    #[test]
    fn unparsable_scale_override_is_ignored() {
        let mut run = RunConfig::default();
        run.apply_overrides_from(|key| (key == ENV_TIME_SCALE).then(|| "fast".to_owned()));
        assert_eq!(run.time_scale, 1.0);
        assert_eq!(run.log_path, PathBuf::from("save.txt"));
    }

    #[test]
    fn parsing_does_not_consult_overrides() {
        let config = SimulationConfig::parse("simulation:\n  time_scale: 30\n").unwrap();
        assert_eq!(config.simulation.time_scale, 30.0);
        let config = SimulationConfig::from_legacy_input("3 1 1 1 6 1").unwrap();
        assert_eq!(config.simulation.time_scale, 1.0);
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("busloop-config.yaml");
        if path.exists() {
            let config = SimulationConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
