//! # Client Errors
//!
//! One error type for every fallible operation of the client. Variants follow
//! the failure taxonomy of the connection: protocol and timeout failures are
//! fatal to `start`, network faults are retried in steady state, aborts are
//! never surfaced to the application.

use thiserror::Error;

use crate::core::state::ConnectionState;
use crate::http::HttpError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Negotiation returned an empty or unparseable body.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server speaks a protocol version other than 1.0.
    #[error("Incompatible protocol version: {0:?}")]
    IncompatibleProtocol(String),

    /// The initial streaming connect did not complete within its window.
    #[error("Timed out while establishing the connection")]
    Timeout,

    #[error("Network fault: {0}")]
    Network(#[from] HttpError),

    /// The operation was cancelled by a local `stop`.
    #[error("Request aborted")]
    Aborted,

    /// A single inbound message could not be processed.
    #[error("Failed to process message: {0}")]
    MessageProcessing(String),

    #[error("Invalid connection state: expected {expected:?}, found {actual:?}")]
    InvalidState {
        expected: ConnectionState,
        actual: ConnectionState,
    },

    /// None of the configured transports could be started.
    #[error("The transports available were not supported on this client")]
    Unsupported,

    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// True when the error was produced by a local abort, either directly or
    /// through the HTTP collaborator.
    pub fn is_aborted(&self) -> bool {
        match self {
            ClientError::Aborted => true,
            ClientError::Network(e) => e.is_aborted(),
            _ => false,
        }
    }
}
