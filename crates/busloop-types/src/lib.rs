//! Shared type definitions for the Busloop route simulation.
//!
//! This crate holds the small value types that cross crate boundaries:
//! typed indices for stops and buses, the state-change notification fed
//! to display collaborators, and the reason a run ended.
//!
//! # Modules
//!
//! - [`ids`] -- [`StopIndex`] and [`BusIndex`] newtypes.
//! - [`change`] -- [`StateChange`] and [`EntityKind`].
//!
//! [`StopIndex`]: ids::StopIndex
//! [`BusIndex`]: ids::BusIndex
//! [`StateChange`]: change::StateChange
//! [`EntityKind`]: change::EntityKind

pub mod change;
pub mod ids;

pub use change::{EndReason, EntityKind, StateChange};
pub use ids::{BusIndex, StopIndex};
