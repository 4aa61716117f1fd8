//! Concurrent actors, shared state, and persistence for the Busloop
//! route simulation.
//!
//! A fixed loop of stops accumulates passengers at random; a fleet of
//! buses circles the loop boarding them. Every stop and every bus is its
//! own tokio task, and a recorder task writes periodic snapshots until the
//! run length expires or an operator stops the run.
//!
//! # Modules
//!
//! - [`arrival`] -- Per-stop exponential inter-arrival generator.
//! - [`bus`] -- [`BusState`] and the travel-and-board loop.
//! - [`clock`] -- Simulated-to-real time mapping.
//! - [`config`] -- YAML and legacy configuration, validated into
//!   [`RouteConfig`].
//! - [`display`] -- [`DisplaySink`] notification seam.
//! - [`recorder`] -- Snapshot log writing and parsing.
//! - [`scheduler`] -- [`start`] and [`SimulationHandle`].
//! - [`shutdown`] -- One-shot cancellable shutdown signal.
//! - [`stop`] -- [`StopState`] and the arrival loop.
//!
//! [`BusState`]: bus::BusState
//! [`RouteConfig`]: config::RouteConfig
//! [`DisplaySink`]: display::DisplaySink
//! [`start`]: scheduler::start
//! [`SimulationHandle`]: scheduler::SimulationHandle
//! [`StopState`]: stop::StopState

mod actor;

pub mod arrival;
pub mod bus;
pub mod clock;
pub mod config;
pub mod display;
pub mod recorder;
pub mod scheduler;
pub mod shutdown;
pub mod stop;

pub use actor::ActorContext;
