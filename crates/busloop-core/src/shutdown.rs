//! One-shot shutdown signal shared by every actor and the recorder.
//!
//! A run ends either when the run-length deadline passes or when an
//! operator asks it to stop, whichever comes first. [`Shutdown::trigger`]
//! records that first reason and flips a [`tokio::sync::watch`] flag;
//! later triggers are ignored. Actors race every wait against
//! [`Shutdown::cancelled`] so a stop takes effect mid-wait rather than
//! after the current sleep finishes.

use std::sync::OnceLock;
use std::time::Duration;

use busloop_types::EndReason;
use tokio::sync::watch;
use tokio::time::Instant;

/// How a cancellable wait finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full duration passed.
    Elapsed,
    /// Shutdown was triggered first.
    Cancelled,
}

/// Shared shutdown state.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` once shutdown has been triggered.
    tx: watch::Sender<bool>,

    /// The reason recorded by the first trigger.
    reason: OnceLock<EndReason>,
}

impl Shutdown {
    /// Create an untriggered signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx,
            reason: OnceLock::new(),
        }
    }

    /// Trigger shutdown.
    ///
    /// Returns `true` only for the call that actually triggered it; any
    /// later call is a no-op returning `false`.
    pub fn trigger(&self, reason: EndReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.tx.send_replace(true);
        true
    }

    /// Whether shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// The reason recorded by the first trigger, if any.
    pub fn reason(&self) -> Option<EndReason> {
        self.reason.get().copied()
    }

    /// Resolve once shutdown has been triggered.
    ///
    /// Resolves immediately if it already has been.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Sleep for `duration` unless shutdown is triggered first.
    ///
    /// Cancellation is checked before the timer so an already-triggered
    /// signal never sleeps.
    pub async fn sleep(&self, duration: Duration) -> WaitOutcome {
        tokio::select! {
            biased;
            () = self.cancelled() => WaitOutcome::Cancelled,
            () = tokio::time::sleep(duration) => WaitOutcome::Elapsed,
        }
    }

    /// Sleep until `deadline` unless shutdown is triggered first.
    pub async fn sleep_until(&self, deadline: Instant) -> WaitOutcome {
        tokio::select! {
            biased;
            () = self.cancelled() => WaitOutcome::Cancelled,
            () = tokio::time::sleep_until(deadline) => WaitOutcome::Elapsed,
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn initial_state_is_not_triggered() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        assert_eq!(shutdown.reason(), None);
    }

    #[test]
    fn first_trigger_wins() {
        let shutdown = Shutdown::new();
        assert!(shutdown.trigger(EndReason::StopRequested));
        assert!(!shutdown.trigger(EndReason::RunLengthReached));
        assert!(shutdown.is_triggered());
        assert_eq!(shutdown.reason(), Some(EndReason::StopRequested));
    }

    #[tokio::test]
    async fn sleep_elapses_without_trigger() {
        let shutdown = Shutdown::new();
        let outcome = shutdown.sleep(Duration::from_millis(5)).await;
        assert_eq!(outcome, WaitOutcome::Elapsed);
    }

    #[tokio::test]
    async fn triggered_signal_never_sleeps() {
        let shutdown = Shutdown::new();
        let _ = shutdown.trigger(EndReason::StopRequested);
        let outcome = shutdown.sleep(Duration::from_secs(3_600)).await;
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn past_deadline_elapses_immediately() {
        let shutdown = Shutdown::new();
        let outcome = shutdown.sleep_until(Instant::now()).await;
        assert_eq!(outcome, WaitOutcome::Elapsed);
    }

    #[tokio::test]
    async fn trigger_interrupts_long_sleep() {
        let shutdown = Arc::new(Shutdown::new());
        let sleeper = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { shutdown.sleep(Duration::from_secs(3_600)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = shutdown.trigger(EndReason::RunLengthReached);

        let outcome = tokio::time::timeout(Duration::from_secs(5), sleeper).await;
        assert!(matches!(outcome, Ok(Ok(WaitOutcome::Cancelled))));
    }
}
