//! Runtime error types

use crate::instance::Lifecycle;
use tether_bridge::BridgeError;
use tether_types::ProtocolError;
use thiserror::Error;

/// Failures reported by a render target provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Render target already allocated for key: {0}")]
    AlreadyAllocated(String),

    #[error("Unknown render target handle: {0}")]
    UnknownHandle(u64),

    #[error("Render target provider failed: {0}")]
    Provider(String),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Cannot {operation} component {id} in state {state}")]
    Lifecycle {
        id: String,
        state: Lifecycle,
        operation: &'static str,
    },

    #[error("Component {id} has no method '{method}'")]
    MethodNotFound { id: String, method: String },

    #[error("Method '{method}' on component {id} failed: {source}")]
    Method {
        id: String,
        method: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Component already exists: {0}")]
    DuplicateComponent(String),

    #[error("Component not found: {0}")]
    ComponentNotFound(String),
}

impl RuntimeError {
    /// Stable code carried in `error` replies to the remote peer
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::Lifecycle { .. } => "lifecycle",
            RuntimeError::MethodNotFound { .. } => "method_not_found",
            RuntimeError::Method { .. } => "method_failed",
            RuntimeError::Render(_) => "render",
            RuntimeError::Bridge(_) => "transport",
            RuntimeError::Protocol(_) => "protocol",
            RuntimeError::DuplicateComponent(_) => "duplicate_component",
            RuntimeError::ComponentNotFound(_) => "component_not_found",
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
