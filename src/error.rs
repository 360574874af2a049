//! Error types for the graph engine.
//!
//! Control-thread operations that can pre-validate their arguments fail
//! synchronously with one of these variants. Operations that execute on the
//! render thread are validated at execution time; their failures are
//! swallowed by the command drain loop and logged.

use thiserror::Error;

/// All failures the engine can report.
#[derive(Debug, Error)]
pub enum GraphError {
    /// An argument was out of range or otherwise malformed.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// The operation is not valid in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A cycle was detected while pulling the graph.
    #[error("audio graph cycle detected at node `{node}`")]
    Cycle { node: String },

    /// The context or node has already been disposed.
    #[error("already disposed")]
    Disposed,

    /// A realtime audio device could not be initialized or driven.
    #[error("audio device failure: {0}")]
    Device(String),
}

impl GraphError {
    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        GraphError::Argument(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        GraphError::InvalidOperation(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;
