//! tether-bridge - ordered request/response messaging over a one-way channel
//!
//! The two halves of a tether application live in separate runtimes that
//! share no memory. The only primitive available is a textual command the
//! local side can ask the remote side to execute. This crate builds a
//! bidirectional, ordered protocol on top of that primitive.
//!
//! # Architecture
//!
//! ```text
//!             send(msg)                               host callback
//!   local ───────────────► CommandTemplate ──► HostChannel ─ ─ ─►  remote
//!     ▲                    (quoted JSON)       (execute)             │
//!     │                                                              │
//!     │   ┌──────────────────────────────────────────────────────┐   │
//!     └───│ drain_queue: FIFO, single flight                     │◄──┘
//!         │   action handlers (registration order) → globals     │ receive_serialized
//!         └──────────────────────────────────────────────────────┘
//! ```
//!
//! - [`Bridge::send`] serializes a [`Message`](tether_types::Message) and hands
//!   it to the [`HostChannel`]. Failures surface as
//!   [`BridgeError::Transport`].
//! - [`Bridge::receive_serialized`] is what the host calls back into. Bad JSON
//!   is logged and dropped; good messages are queued and drained.
//! - [`Bridge::request`] pairs an outbound message with the inbound reply that
//!   carries the same `correlationId`, with an optional deadline.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tether_bridge::{handler_fn, Bridge, RecordingChannel};
//! use tether_types::Message;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let channel = Arc::new(RecordingChannel::new());
//! let bridge = Bridge::with_defaults(channel.clone());
//!
//! let greet = handler_fn(|msg: Message| async move {
//!     tracing::info!(id = %msg.id, "hello from the remote side");
//!     Ok(())
//! });
//! bridge.register_handler("greet", greet);
//!
//! bridge
//!     .receive_serialized(r#"{"id":"peer","type":"event","action":"greet"}"#)
//!     .await;
//! bridge.send(Message::event("peer", "greeted")).await.unwrap();
//!
//! assert_eq!(channel.len(), 1);
//! # });
//! ```

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod registry;
pub mod stats;

pub use bridge::Bridge;
pub use channel::{CommandTemplate, HostChannel, Quoting, RecordingChannel};
pub use config::{BridgeConfig, CommandConfig, ConfigError, HandlerFailurePolicy};
pub use error::{BridgeError, BridgeResult, ChannelError, HandlerError, HandlerResult};
pub use registry::{handler_fn, FnHandler, Handler, HandlerRef, HandlerRegistry};
pub use stats::{BridgeStats, BridgeStatsSnapshot};
