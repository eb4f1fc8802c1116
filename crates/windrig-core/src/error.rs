//! Error types for windrig-core.

use thiserror::Error;

use crate::session::SessionState;

/// Failures reported by the rig collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RigError {
    /// The request could not complete (connect, timeout, unreadable body).
    #[error("network failure: {0}")]
    Network(String),

    /// The server answered with a structured error message.
    #[error("{0}")]
    Rejected(String),

    /// The requested resource does not exist on the server.
    #[error("not found: {0}")]
    NotFound(String),
}

impl RigError {
    /// Whether this failure means the request never produced an answer.
    pub fn is_network(&self) -> bool {
        matches!(self, RigError::Network(_))
    }
}

/// Timeline document construction and mutation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimelineError {
    /// A duration was zero, negative or not a number.
    #[error("invalid duration {0}: must be greater than 0")]
    InvalidDuration(f64),

    /// A tempo was negative or not a number, or zero where a real tempo is
    /// required.
    #[error("invalid bpm {0}")]
    InvalidBpm(f64),

    /// Index past the end of the event list.
    #[error("event index {index} out of range (timeline has {len} events)")]
    IndexOutOfRange { index: usize, len: usize },

    /// The event at this index is a note, not a rest.
    #[error("event {0} is not a rest")]
    NotARest(usize),
}

/// Execution cache errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    /// A build for this session is still outstanding.
    #[error("preprocessing already in progress for {0}")]
    BuildInFlight(String),
}

/// Errors surfaced to the operator by the session controller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("no music file selected")]
    NoFileSelected,

    /// The requested change is not allowed in the current state.
    #[error("not allowed while {0}")]
    Busy(SessionState),

    /// A preprocessing result arrived for parameters that have since changed.
    #[error("parameters changed during preprocessing, start again")]
    StaleBuild,

    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Rig(#[from] RigError),
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
