//! Payload shapes and well-known action names

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Action names understood by the component runtime
pub mod actions {
    /// Remote method invocation on a component instance
    pub const CALL_METHOD: &str = "callMethod";
    /// Reply to [`CALL_METHOD`]
    pub const METHOD_RESULT: &str = "methodResult";

    pub const COMPONENT_MOUNTED: &str = "component:mounted";
    pub const COMPONENT_DESTROYED: &str = "component:destroyed";

    /// Host signal asking the runtime to tear down an instance
    pub const COMPONENT_DESTROY: &str = "component:destroy";

    /// Partial state pushed by the remote peer
    pub const SET_STATE: &str = "setState";
    /// Request for the current state of an instance
    pub const GET_STATE: &str = "getState";
    /// Reply to [`GET_STATE`] and [`SET_STATE`]
    pub const STATE_SNAPSHOT: &str = "stateSnapshot";
}

/// Generate a fresh correlation token
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Payload of a `callMethod` action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMethodPayload {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl CallMethodPayload {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

/// Payload of a successful `methodResult` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodResultPayload {
    pub result: Value,
}

/// Payload of an `error` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Payload of the component lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecyclePayload {
    pub id: String,
}

/// Current state of an instance as seen by the remote peer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSnapshotPayload {
    pub state: Map<String, Value>,
    #[serde(default)]
    pub computed: Map<String, Value>,
}
