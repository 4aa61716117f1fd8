//! Bus position and the travel-and-board loop.
//!
//! A bus alternates between two states:
//!
//! - **Boarding**: while the stop it occupies has waiting passengers,
//!   take one and wait `board_time`. The queue is re-checked after every
//!   wait because arrivals keep landing while the bus is parked.
//! - **Traveling**: wait `driving_time`, then move to the next stop
//!   (`position + 1` modulo the stop count) and start boarding again.
//!
//! Only the bus's own actor writes its position; the recorder and display
//! read it through an atomic.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use busloop_types::{BusIndex, StateChange};
use tracing::{debug, warn};

use crate::actor::{ActorContext, to_u64};
use crate::shutdown::WaitOutcome;
use crate::stop::StopState;

/// One bus on the loop.
#[derive(Debug)]
pub struct BusState {
    index: BusIndex,
    name: String,
    position: AtomicUsize,
    stop_count: usize,
}

impl BusState {
    /// Create a bus parked at `position`.
    ///
    /// `position` is reduced modulo `stop_count` so it is always valid.
    pub fn new(index: BusIndex, position: usize, stop_count: usize) -> Self {
        let stop_count = stop_count.max(1);
        Self {
            index,
            name: index.name(),
            position: AtomicUsize::new(position.checked_rem(stop_count).unwrap_or(0)),
            stop_count,
        }
    }

    /// This bus's index.
    pub const fn index(&self) -> BusIndex {
        self.index
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the stop the bus currently occupies.
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    /// Move to the next stop on the loop and return the new position.
    ///
    /// Must only be called by the bus's own actor.
    pub fn advance(&self) -> usize {
        let next = self
            .position()
            .saturating_add(1)
            .checked_rem(self.stop_count)
            .unwrap_or(0);
        self.position.store(next, Ordering::Release);
        next
    }
}

/// Real-time waits for the bus loop, converted once at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTiming {
    /// Wait after boarding each passenger.
    pub board_wait: Duration,
    /// Wait between adjacent stops.
    pub drive_wait: Duration,
}

/// Travel-and-board loop for one bus.
///
/// Returns the number of passengers this bus boarded.
pub async fn run_bus(
    bus: Arc<BusState>,
    stops: Arc<[Arc<StopState>]>,
    timing: BusTiming,
    ctx: ActorContext,
) -> u64 {
    debug!(bus = %bus.index(), position = bus.position(), "bus actor started");

    let mut boarded: u64 = 0;

    'route: loop {
        // Boarding
        loop {
            if ctx.shutdown.is_triggered() {
                break 'route;
            }
            let Some(stop) = stops.get(bus.position()) else {
                warn!(bus = %bus.index(), position = bus.position(), "bus position has no stop");
                break 'route;
            };
            let Some(waiting) = stop.board_one() else {
                break;
            };
            boarded = boarded.saturating_add(1);
            ctx.display
                .publish(StateChange::stop(stop.index().get(), waiting));
            if ctx.shutdown.sleep(timing.board_wait).await == WaitOutcome::Cancelled {
                break 'route;
            }
        }

        // Traveling
        if ctx.shutdown.sleep(timing.drive_wait).await == WaitOutcome::Cancelled {
            break;
        }
        let position = bus.advance();
        ctx.display
            .publish(StateChange::bus(bus.index().get(), to_u64(position)));
    }

    debug!(bus = %bus.index(), position = bus.position(), boarded, "bus actor stopped");
    boarded
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Mutex;

    use busloop_types::{EndReason, EntityKind, StopIndex};

    use super::*;
    use crate::clock::SimulationClock;
    use crate::display::DisplaySink;
    use crate::shutdown::Shutdown;

    #[derive(Default)]
    struct Recording(Mutex<Vec<StateChange>>);

    impl DisplaySink for Recording {
        fn publish(&self, change: StateChange) {
            self.0.lock().unwrap().push(change);
        }
    }

    fn stops(n: usize) -> Arc<[Arc<StopState>]> {
        (0..n).map(|i| Arc::new(StopState::new(StopIndex(i)))).collect()
    }

    #[test]
    fn advance_wraps_around_loop() {
        let bus = BusState::new(BusIndex(0), 1, 3);
        assert_eq!(bus.advance(), 2);
        assert_eq!(bus.advance(), 0);
        assert_eq!(bus.advance(), 1);
    }

    #[test]
    fn single_stop_loop_stays_put() {
        let bus = BusState::new(BusIndex(0), 0, 1);
        assert_eq!(bus.advance(), 0);
    }

    #[test]
    fn out_of_range_start_is_reduced() {
        let bus = BusState::new(BusIndex(2), 7, 5);
        assert_eq!(bus.position(), 2);
        assert_eq!(bus.name(), "bus 2");
    }

    #[tokio::test]
    async fn bus_empties_queue_before_departing() {
        let stops = stops(3);
        for _ in 0..4 {
            let _ = stops[0].arrive();
        }
        let shutdown = Arc::new(Shutdown::new());
        let display = Arc::new(Recording::default());
        let ctx = ActorContext {
            clock: SimulationClock::start(1_000.0),
            shutdown: Arc::clone(&shutdown),
            display: display.clone(),
        };
        let bus = Arc::new(BusState::new(BusIndex(0), 0, 3));
        let timing = BusTiming {
            board_wait: Duration::from_millis(1),
            drive_wait: Duration::from_millis(5),
        };
        let task = tokio::spawn(run_bus(Arc::clone(&bus), Arc::clone(&stops), timing, ctx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = shutdown.trigger(EndReason::StopRequested);
        let boarded = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(boarded, 4);
        assert_eq!(stops[0].passenger_count(), 0);

        let changes = display.0.lock().unwrap().clone();
        // Four boardings counting down to zero, then the first move.
        let first_four: Vec<StateChange> = changes.iter().take(4).copied().collect();
        assert_eq!(
            first_four,
            vec![
                StateChange::stop(0, 3),
                StateChange::stop(0, 2),
                StateChange::stop(0, 1),
                StateChange::stop(0, 0),
            ]
        );
        assert_eq!(changes.get(4), Some(&StateChange::bus(0, 1)));

        // Positions then cycle 1, 2, 0, 1, ... without skipping.
        let positions: Vec<u64> = changes
            .iter()
            .filter(|c| c.kind == EntityKind::Bus)
            .map(|c| c.value)
            .collect();
        assert!(positions.len() >= 3);
        let mut previous = 0;
        for p in positions {
            assert_eq!(p, (previous + 1) % 3);
            previous = p;
        }
    }

    #[tokio::test]
    async fn shutdown_interrupts_long_drive() {
        let shutdown = Arc::new(Shutdown::new());
        let ctx = ActorContext {
            clock: SimulationClock::start(1.0),
            shutdown: Arc::clone(&shutdown),
            display: Arc::new(Recording::default()),
        };
        let bus = Arc::new(BusState::new(BusIndex(0), 0, 2));
        let timing = BusTiming {
            board_wait: Duration::from_secs(3_600),
            drive_wait: Duration::from_secs(3_600),
        };
        let task = tokio::spawn(run_bus(Arc::clone(&bus), stops(2), timing, ctx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = shutdown.trigger(EndReason::StopRequested);
        let boarded = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(matches!(boarded, Ok(Ok(0))));
        assert_eq!(bus.position(), 0);
    }
}
