//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode during start-up and the run so
//! `main` can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: busloop_core::config::ConfigError,
    },

    /// The snapshot log could not be opened.
    #[error("recorder error: {source}")]
    Recorder {
        /// The underlying recorder error.
        #[from]
        source: busloop_core::recorder::RecorderError,
    },

    /// A simulation task failed.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: busloop_core::scheduler::SchedulerError,
    },

    /// Command-line usage error.
    #[error("usage error: {message}")]
    Usage {
        /// What was wrong with the arguments.
        message: String,
    },
}
