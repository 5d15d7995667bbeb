//! Engine error taxonomy.

use thiserror::Error;

/// Errors produced by the chat engine's command paths.
///
/// Every variant is caught at the orchestrator boundary and turned into an
/// `error` event for the offending connection; none of them abort the
/// process or touch other sessions.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown session, agent or connection.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation was attempted against a session in the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An agent would be pushed past `max_concurrent_chats`. Candidates are
    /// filtered before assignment, so hitting this indicates a bug upstream.
    #[error("agent {0} is at capacity")]
    CapacityExceeded(String),

    /// Unknown transport message type.
    #[error("unrecognized command: {0}")]
    UnrecognizedCommand(String),

    /// A known command arrived with a payload that does not parse.
    #[error("bad envelope for {command}: {reason}")]
    BadEnvelope { command: String, reason: String },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(what: impl Into<String>) -> Self {
        Self::InvalidState(what.into())
    }
}
