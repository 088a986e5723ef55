//! Error types for Millrace.

use thiserror::Error;

/// Result type alias using Millrace's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Millrace operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The worker pool has been shut down and no longer accepts jobs.
    #[error("worker pool is stopped")]
    PoolStopped,

    /// A referenced task id does not exist.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// Two nodes in the same graph were registered under one id.
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    /// A task's processing function returned an error.
    #[error("task '{id}' failed: {message}")]
    TaskFailed {
        /// Id of the failing node.
        id: String,
        /// Rendered cause of the failure.
        message: String,
    },

    /// A job panicked while running on a worker thread.
    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    /// General task-level failure raised by a processing function.
    #[error("{0}")]
    Task(String),

    /// A data item did not carry the payload type a task expected.
    #[error("payload type mismatch: expected {0}")]
    TypeMismatch(&'static str),

    /// Configuration was changed while the pipeline is running.
    #[error("pipeline is running: cannot {0}")]
    Busy(&'static str),

    /// The pipeline was started without a processor callback.
    #[error("processor function not set")]
    ProcessorNotSet,

    /// I/O error (thread spawning).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::Task`] from any displayable message.
    ///
    /// Convenience for processing functions that want to fail an item
    /// without defining their own error type.
    pub fn task(message: impl Into<String>) -> Self {
        Error::Task(message.into())
    }
}
