//! Message envelope and JSON codec

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Errors raised while encoding or decoding protocol data
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Message '{action}' has no payload")]
    MissingPayload { action: String },

    #[error("Invalid payload for '{action}': {source}")]
    InvalidPayload {
        action: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Kind of a message, serialized lowercase on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Event,
    Action,
    State,
    Sync,
    Request,
    Response,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Event => "event",
            MessageType::Action => "action",
            MessageType::State => "state",
            MessageType::Sync => "sync",
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Error => "error",
        }
    }

    /// Whether this kind answers an earlier request
    pub fn is_reply(&self) -> bool {
        matches!(self, MessageType::Response | MessageType::Error)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single protocol message
///
/// Messages are created at send/receive boundaries and dropped after
/// delivery. Optional fields are left off the wire when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Routing id, usually the component instance id
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MessageType,

    pub action: String,

    /// `None` when the field is absent; an explicit `null` is `Some(Null)`
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,

    /// Milliseconds since the Unix epoch, filled in by the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Message {
    pub fn new(id: impl Into<String>, kind: MessageType, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            action: action.into(),
            payload: None,
            timestamp: None,
            correlation_id: None,
        }
    }

    pub fn event(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(id, MessageType::Event, action)
    }

    pub fn action(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(id, MessageType::Action, action)
    }

    pub fn request(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(id, MessageType::Request, action)
    }

    /// Build a reply addressed like `to`, carrying its correlation id
    pub fn reply_to(to: &Message, kind: MessageType, action: impl Into<String>) -> Self {
        Self {
            id: to.id.clone(),
            kind,
            action: action.into(),
            payload: None,
            timestamp: None,
            correlation_id: to.correlation_id.clone(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Serialize `payload` into the message
    pub fn with_payload_of<T: Serialize>(mut self, payload: &T) -> Result<Self, ProtocolError> {
        self.payload = Some(serde_json::to_value(payload).map_err(ProtocolError::Encode)?);
        Ok(self)
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Decode the payload into a typed structure
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| ProtocolError::MissingPayload {
                action: self.action.clone(),
            })?;

        T::deserialize(payload).map_err(|source| ProtocolError::InvalidPayload {
            action: self.action.clone(),
            source,
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}
