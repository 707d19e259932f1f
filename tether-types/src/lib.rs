//! Shared types for tether
//!
//! This crate provides the wire protocol spoken between the two peers of a
//! tether bridge: the [`Message`] envelope, its [`MessageType`], the payload
//! shapes used by the component runtime, and the well-known action names.
//!
//! Every message travels as a single JSON object:
//!
//! ```text
//! {"id":"counter","type":"action","action":"callMethod",
//!  "payload":{"method":"inc","args":[]},"correlationId":"…"}
//! ```
//!
//! `(id, action)` determines routing on the receiving side. A `response` or
//! `error` message carries the `correlationId` of the request it answers.

pub mod message;
pub mod payload;

pub use message::{Message, MessageType, ProtocolError};
pub use payload::{
    actions, new_correlation_id, CallMethodPayload, ErrorPayload, LifecyclePayload,
    MethodResultPayload, StateSnapshotPayload,
};
