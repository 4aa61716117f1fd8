//! Per-stop passenger queue and the arrival actor that fills it.
//!
//! A stop's queue is mutated from two directions: its own arrival actor
//! adds passengers and any bus parked at the stop removes them. Both paths
//! go through the same [`std::sync::Mutex`], so the count and its
//! high-water mark always change together and the count can never be
//! taken below zero. The lock is held only for the arithmetic, never
//! across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use busloop_types::{StateChange, StopIndex};
use tracing::debug;

use crate::actor::ActorContext;
use crate::arrival::ArrivalProcess;
use crate::clock::far_future;
use crate::shutdown::WaitOutcome;

/// Waiting count and its high-water mark, always updated together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Passengers currently waiting.
    pub waiting: u64,
    /// Largest `waiting` value since the run started.
    pub max_waiting: u64,
}

/// One stop on the loop.
#[derive(Debug)]
pub struct StopState {
    index: StopIndex,
    name: String,
    counts: Mutex<QueueCounts>,
}

impl StopState {
    /// Create an empty stop.
    pub fn new(index: StopIndex) -> Self {
        Self {
            index,
            name: index.name(),
            counts: Mutex::new(QueueCounts::default()),
        }
    }

    /// This stop's index.
    pub const fn index(&self) -> StopIndex {
        self.index
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add one waiting passenger and return the new count.
    pub fn arrive(&self) -> u64 {
        let mut counts = self.lock();
        counts.waiting = counts.waiting.saturating_add(1);
        counts.max_waiting = counts.max_waiting.max(counts.waiting);
        counts.waiting
    }

    /// Board one passenger if any are waiting.
    ///
    /// Returns the remaining count, or `None` if the queue was already
    /// empty. The check and the decrement happen under one lock.
    pub fn board_one(&self) -> Option<u64> {
        let mut counts = self.lock();
        counts.waiting = counts.waiting.checked_sub(1)?;
        Some(counts.waiting)
    }

    /// Passengers currently waiting.
    pub fn passenger_count(&self) -> u64 {
        self.lock().waiting
    }

    /// Largest queue observed so far.
    pub fn max_passenger_count(&self) -> u64 {
        self.lock().max_waiting
    }

    /// Both counters read together.
    pub fn counts(&self) -> QueueCounts {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, QueueCounts> {
        // The critical sections cannot panic midway, so a poisoned lock
        // still holds consistent counts.
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Arrival loop for one stop.
///
/// Arrivals are scheduled on absolute deadlines (previous deadline plus the
/// next gap) so timer granularity delays an arrival without lowering the
/// long-run rate. Returns the number of passengers generated.
pub async fn run_arrivals(stop: Arc<StopState>, mut process: ArrivalProcess, ctx: ActorContext) -> u64 {
    debug!(stop = %stop.index(), seed = process.seed(), "arrival actor started");

    let mut arrivals: u64 = 0;
    let mut next_arrival = tokio::time::Instant::now();

    loop {
        let gap = ctx.clock.real_duration(process.next_gap());
        // A gap too large for an Instant means the next arrival never comes.
        next_arrival = next_arrival
            .checked_add(gap)
            .unwrap_or_else(|| far_future(next_arrival));
        if ctx.shutdown.sleep_until(next_arrival).await == WaitOutcome::Cancelled {
            break;
        }

        let waiting = stop.arrive();
        arrivals = arrivals.saturating_add(1);
        ctx.display
            .publish(StateChange::stop(stop.index().get(), waiting));
    }

    debug!(stop = %stop.index(), arrivals, "arrival actor stopped");
    arrivals
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use busloop_types::EndReason;

    use super::*;
    use crate::clock::SimulationClock;
    use crate::display::NullDisplay;
    use crate::shutdown::Shutdown;

    #[test]
    fn arrivals_raise_high_water_mark() {
        let stop = StopState::new(StopIndex(0));
        assert_eq!(stop.arrive(), 1);
        assert_eq!(stop.arrive(), 2);
        assert_eq!(stop.board_one(), Some(1));
        assert_eq!(stop.arrive(), 2);
        assert_eq!(
            stop.counts(),
            QueueCounts {
                waiting: 2,
                max_waiting: 2
            }
        );
        assert_eq!(stop.arrive(), 3);
        assert_eq!(stop.max_passenger_count(), 3);
    }

    #[test]
    fn boarding_never_goes_negative() {
        let stop = StopState::new(StopIndex(1));
        assert_eq!(stop.board_one(), None);
        let _ = stop.arrive();
        assert_eq!(stop.board_one(), Some(0));
        assert_eq!(stop.board_one(), None);
        assert_eq!(stop.passenger_count(), 0);
        assert_eq!(stop.max_passenger_count(), 1);
    }

    #[test]
    fn name_comes_from_index() {
        assert_eq!(StopState::new(StopIndex(4)).name(), "stop 4");
    }

    #[test]
    fn concurrent_arrivals_and_boarding_stay_consistent() {
        let stop = Arc::new(StopState::new(StopIndex(0)));
        let mut threads = Vec::new();
        for _ in 0..4 {
            let stop = Arc::clone(&stop);
            threads.push(std::thread::spawn(move || {
                for _ in 0..10_000 {
                    let _ = stop.arrive();
                }
            }));
        }
        let mut boarded = Vec::new();
        for _ in 0..4 {
            let stop = Arc::clone(&stop);
            boarded.push(std::thread::spawn(move || {
                let mut n: u64 = 0;
                for _ in 0..10_000 {
                    if stop.board_one().is_some() {
                        n += 1;
                    }
                }
                n
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        let total_boarded: u64 = boarded.into_iter().map(|t| t.join().unwrap()).sum();

        let counts = stop.counts();
        assert_eq!(counts.waiting + total_boarded, 40_000);
        assert!(counts.max_waiting >= counts.waiting);
        assert!(counts.max_waiting <= 40_000);
    }

    #[tokio::test]
    async fn arrival_actor_fills_queue_until_shutdown() {
        let shutdown = Arc::new(Shutdown::new());
        let ctx = ActorContext {
            clock: SimulationClock::start(1_000.0),
            shutdown: Arc::clone(&shutdown),
            display: Arc::new(NullDisplay),
        };
        let stop = Arc::new(StopState::new(StopIndex(0)));
        let process = ArrivalProcess::for_stop(100, 0, 10.0);
        let task = tokio::spawn(run_arrivals(Arc::clone(&stop), process, ctx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown.trigger(EndReason::StopRequested);
        let arrivals = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert!(arrivals > 0);
        assert_eq!(stop.passenger_count(), arrivals);
        assert_eq!(stop.max_passenger_count(), arrivals);
    }

    #[tokio::test]
    async fn vanishing_rate_produces_no_arrivals() {
        let shutdown = Arc::new(Shutdown::new());
        let ctx = ActorContext {
            clock: SimulationClock::start(1.0),
            shutdown: Arc::clone(&shutdown),
            display: Arc::new(NullDisplay),
        };
        let stop = Arc::new(StopState::new(StopIndex(0)));
        // Every gap saturates to Duration::MAX.
        let process = ArrivalProcess::for_stop(100, 0, 1e-20);
        let task = tokio::spawn(run_arrivals(Arc::clone(&stop), process, ctx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown.trigger(EndReason::StopRequested);
        let arrivals = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(arrivals, 0);
        assert_eq!(stop.passenger_count(), 0);
    }
}
