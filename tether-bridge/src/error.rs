//! Error types for the bridge

use tether_types::ProtocolError;
use thiserror::Error;

/// The host command channel rejected or failed a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Host command failed: {message}")]
pub struct ChannelError {
    pub message: String,
}

impl ChannelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced to callers of the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The channel call failed; the caller decides whether to retry
    #[error("Transport error: {0}")]
    Transport(#[from] ChannelError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("No reply for correlation id {correlation_id} before the deadline")]
    Timeout { correlation_id: String },

    #[error("Remote peer answered {correlation_id} with an error: {message}")]
    Remote {
        correlation_id: String,
        message: String,
    },

    #[error("Waiter for correlation id {correlation_id} was dropped")]
    Closed { correlation_id: String },
}

/// A registered handler failed while a message was being delivered
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Result type using BridgeError
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Result type returned by handlers
pub type HandlerResult = std::result::Result<(), HandlerError>;
