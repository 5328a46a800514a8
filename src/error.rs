use thiserror::Error;

use crate::imap::SessionState;

/// Errors surfaced by the ingestion, scheduling and notification layers.
#[derive(Debug, Error)]
pub enum Error {
    /// Network or TLS failure. Retryable by caller policy, never retried here.
    #[error("connection error: {0}")]
    Connection(String),

    /// Credential rejected by the server. Terminal.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Unexpected server response (unknown mailbox, malformed fetch reply).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A session operation was called from a state that does not allow it.
    #[error("cannot {operation} while session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("store error: {0}")]
    Store(String),

    #[error("blob storage error: {0}")]
    Blob(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("{0} not found")]
    NotFound(String),
}

/// A single message that could not be parsed. Skipped, never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("message {handle}: {reason}")]
pub struct ParseError {
    /// Session handle of the offending message (0 when parsed outside a session).
    pub handle: u32,
    pub reason: String,
}

/// Notification send failure. Recorded in the audit log, never propagated
/// into ingestion or scheduling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
