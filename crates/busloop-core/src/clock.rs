//! Mapping between simulated time and the wall clock.
//!
//! The clock is the single source of truth for elapsed time in a run. All
//! configured durations are simulated seconds; dividing by the time scale
//! gives the real wait. Elapsed time is measured with [`tokio::time::Instant`]
//! so it agrees with the timers the actors sleep on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Run clock created when the simulation starts.
#[derive(Debug, Clone, Copy)]
pub struct SimulationClock {
    /// Monotonic start instant.
    started: Instant,

    /// Wall-clock start time, for logs and results.
    started_at: DateTime<Utc>,

    /// Simulated seconds per real second.
    time_scale: f64,
}

impl SimulationClock {
    /// Start a clock now.
    pub fn start(time_scale: f64) -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            time_scale,
        }
    }

    /// Wall-clock start time.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Real duration corresponding to `sim_secs` simulated seconds.
    ///
    /// Values too large for a [`Duration`] saturate to [`Duration::MAX`].
    pub fn real_duration(&self, sim_secs: f64) -> Duration {
        let real = sim_secs / self.time_scale;
        if real <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(real).unwrap_or(Duration::MAX)
    }

    /// Real duration corresponding to a simulated [`Duration`].
    pub fn real_interval(&self, sim: Duration) -> Duration {
        self.real_duration(sim.as_secs_f64())
    }

    /// Instant at which `sim` simulated time will have elapsed.
    pub fn deadline(&self, sim: Duration) -> Instant {
        let real = self.real_interval(sim);
        self.started
            .checked_add(real)
            .unwrap_or_else(|| far_future(self.started))
    }

    /// Whole simulated seconds elapsed since start.
    pub fn elapsed_sim_secs(&self) -> u64 {
        let sim = self.started.elapsed().as_secs_f64() * self.time_scale;
        // Float-to-int `as` saturates and maps NaN to 0.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let secs = sim.floor() as u64;
        secs
    }
}

/// Roughly thirty years after `from`, the same horizon tokio uses for
/// "never". Used wherever a deadline would overflow [`Instant`].
pub(crate) fn far_future(from: Instant) -> Instant {
    from.checked_add(Duration::from_secs(86_400 * 365 * 30))
        .unwrap_or(from)
}
