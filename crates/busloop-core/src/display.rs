//! Display collaborator seam.
//!
//! Every actor reports its mutations through a [`DisplaySink`]. The sink is
//! a pure observer: publishing must not block and cannot fail, so a slow or
//! absent display never holds up the simulation.

use busloop_types::StateChange;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel used by [`BroadcastDisplay`].
///
/// A subscriber that falls further behind receives
/// [`broadcast::error::RecvError::Lagged`] and skips to the newest change.
const BROADCAST_CAPACITY: usize = 1_024;

/// Receiver of state-change notifications.
pub trait DisplaySink: Send + Sync {
    /// Called after a stop count or bus position changed.
    fn publish(&self, change: StateChange);
}

/// A sink that discards everything.
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn publish(&self, _change: StateChange) {}
}

/// Fans changes out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastDisplay {
    tx: broadcast::Sender<StateChange>,
}

impl BroadcastDisplay {
    /// Create a display with no subscribers.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Subscribe to the change stream.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySink for BroadcastDisplay {
    fn publish(&self, change: StateChange) {
        // send only fails when nobody is subscribed, which is normal.
        let _ = self.tx.send(change);
    }
}
