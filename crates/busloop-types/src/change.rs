//! Notifications emitted by the simulation after every state mutation.

use serde::{Deserialize, Serialize};

/// Which kind of entity a [`StateChange`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A stop; the value is its new waiting-passenger count.
    Stop,
    /// A bus; the value is its new position (a stop index).
    Bus,
}

/// A single `(kind, index, new value)` update for a display collaborator.
///
/// Emitted after the mutation has been applied. Delivery is best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Stop or bus.
    pub kind: EntityKind,
    /// Index into the stop or bus table.
    pub index: usize,
    /// New passenger count (stop) or new position (bus).
    pub value: u64,
}

impl StateChange {
    /// A stop's waiting count changed to `count`.
    pub const fn stop(index: usize, count: u64) -> Self {
        Self {
            kind: EntityKind::Stop,
            index,
            value: count,
        }
    }

    /// A bus moved to stop `position`.
    pub const fn bus(index: usize, position: u64) -> Self {
        Self {
            kind: EntityKind::Bus,
            index,
            value: position,
        }
    }
}

/// Reason why a simulation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// Elapsed time reached the configured run length.
    RunLengthReached,
    /// An external stop request arrived first.
    StopRequested,
}
