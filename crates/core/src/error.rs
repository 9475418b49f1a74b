//! Error taxonomy for the optimization core.
//!
//! Fatal errors (configuration, broken invariants, unreadable checkpoints)
//! are modeled as an unwinding [`OptimonError`]. Recoverable, per-candidate
//! failures (a user fitness function panicking or returning an invalid
//! result) never reach this type — they are absorbed into
//! [`crate::candidate::Candidate`] as an `Invalid` outcome.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OptimonError>;

#[derive(Debug, Error)]
pub enum OptimonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("broker timed out waiting for the first return of iteration {iteration} after {elapsed_ms}ms")]
    FirstReturnTimeout { iteration: u64, elapsed_ms: u64 },

    #[error("checkpoint at {path} could not be read: {source}")]
    CheckpointRead {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint at {path} could not be written: {source}")]
    CheckpointWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine invariant violated: {0}")]
    Invariant(String),

    #[error("cycle logic failed at iteration {iteration}: {source}")]
    CycleLogic {
        iteration: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OptimonError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}
