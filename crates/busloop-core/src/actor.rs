//! Handles every actor task carries.

use std::sync::Arc;

use crate::clock::SimulationClock;
use crate::display::DisplaySink;
use crate::shutdown::Shutdown;

/// Shared context cloned into each stop and bus task.
#[derive(Clone)]
pub struct ActorContext {
    /// Run clock for converting simulated waits to real ones.
    pub clock: SimulationClock,
    /// Shutdown signal raced against every wait.
    pub shutdown: Arc<Shutdown>,
    /// Where state changes are reported.
    pub display: Arc<dyn DisplaySink>,
}

/// Convert a table index or count to the `u64` used in notifications.
pub(crate) fn to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
