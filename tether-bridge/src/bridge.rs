//! The message bus
//!
//! A [`Bridge`] is the single point of contact with the remote peer. Outbound
//! messages go through [`Bridge::send`]; inbound text arrives through
//! [`Bridge::receive_serialized`], is queued, and is delivered in FIFO order
//! by a single-flight drain loop.
//!
//! A host usually runs one bridge, shared as an `Arc<Bridge>` with every
//! component instance and with the host callback entry point.

use crate::channel::{CommandTemplate, HostChannel};
use crate::config::{BridgeConfig, ConfigError, HandlerFailurePolicy};
use crate::error::{BridgeError, BridgeResult, HandlerError};
use crate::registry::{HandlerRef, HandlerRegistry};
use crate::stats::{BridgeStats, BridgeStatsSnapshot};
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_types::{new_correlation_id, ErrorPayload, Message, MessageType};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

/// Clears the drain flag when dropped, including during unwinding
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Message bus over a one-directional host command channel
pub struct Bridge {
    channel: Arc<dyn HostChannel>,
    template: CommandTemplate,
    failure_policy: HandlerFailurePolicy,
    request_timeout: Option<Duration>,
    registry: Mutex<HandlerRegistry>,
    queue: Mutex<VecDeque<Message>>,
    draining: AtomicBool,
    pending: Mutex<HashMap<String, oneshot::Sender<Message>>>,
    stats: BridgeStats,
}

impl Bridge {
    pub fn new(channel: Arc<dyn HostChannel>, config: &BridgeConfig) -> Result<Self, ConfigError> {
        Ok(Self::from_parts(channel, config.command_template()?, config))
    }

    /// Bridge with the default configuration
    pub fn with_defaults(channel: Arc<dyn HostChannel>) -> Self {
        Self::from_parts(channel, CommandTemplate::default(), &BridgeConfig::default())
    }

    fn from_parts(
        channel: Arc<dyn HostChannel>,
        template: CommandTemplate,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            channel,
            template,
            failure_policy: config.handler_failure,
            request_timeout: config.request_timeout(),
            registry: Mutex::new(HandlerRegistry::new()),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            stats: BridgeStats::new(),
        }
    }

    /// Replace the command template (e.g. [`CommandTemplate::raw`] for tests)
    pub fn with_template(mut self, template: CommandTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_failure_policy(mut self, policy: HandlerFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn failure_policy(&self) -> HandlerFailurePolicy {
        self.failure_policy
    }

    /// Deadline applied by [`request`](Self::request)
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    // ===== Outbound =====

    /// Serialize and hand a message to the host channel
    ///
    /// Fills `timestamp` if absent. Channel failures propagate as
    /// [`BridgeError::Transport`]; nothing is retried.
    pub async fn send(&self, mut message: Message) -> BridgeResult<Value> {
        if message.timestamp.is_none() {
            message.timestamp = Some(Utc::now().timestamp_millis());
        }

        let json = message.to_json()?;
        let command = self.template.render(&json);
        debug!(
            id = %message.id,
            kind = %message.kind,
            action = %message.action,
            "sending message"
        );

        match self.channel.execute(&command).await {
            Ok(value) => {
                self.stats.record_sent();
                Ok(value)
            }
            Err(err) => {
                self.stats.record_send_failure();
                warn!(id = %message.id, action = %message.action, error = %err, "host channel call failed");
                Err(BridgeError::Transport(err))
            }
        }
    }

    /// Send a message and wait for the reply with the same correlation id
    ///
    /// Uses the configured default deadline.
    pub async fn request(&self, message: Message) -> BridgeResult<Message> {
        self.request_with_timeout(message, self.request_timeout).await
    }

    /// Send a message and wait for its reply, optionally bounded by `timeout`
    ///
    /// A fresh correlation id is assigned when the message has none. An
    /// `error` reply becomes [`BridgeError::Remote`].
    pub async fn request_with_timeout(
        &self,
        mut message: Message,
        timeout: Option<Duration>,
    ) -> BridgeResult<Message> {
        let correlation_id = message
            .correlation_id
            .get_or_insert_with(new_correlation_id)
            .clone();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(correlation_id.clone(), tx);

        if let Err(err) = self.send(message).await {
            self.pending.lock().remove(&correlation_id);
            return Err(err);
        }

        let reply = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending.lock().remove(&correlation_id);
                    self.stats.record_request_timeout();
                    warn!(correlation_id = %correlation_id, "request timed out");
                    return Err(BridgeError::Timeout { correlation_id });
                }
            },
            None => rx.await,
        };

        let reply = reply.map_err(|_| BridgeError::Closed {
            correlation_id: correlation_id.clone(),
        })?;

        if reply.kind == MessageType::Error {
            let message = reply
                .payload_as::<ErrorPayload>()
                .map(|p| p.message)
                .unwrap_or_else(|_| String::from("unspecified remote error"));
            return Err(BridgeError::Remote {
                correlation_id,
                message,
            });
        }

        Ok(reply)
    }

    /// Number of correlated requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    // ===== Inbound =====

    /// Host callback entry point: parse, enqueue and drain
    ///
    /// Malformed input is logged and dropped. This never fails.
    pub async fn receive_serialized(&self, text: &str) {
        match Message::from_json(text) {
            Ok(message) => self.receive(message).await,
            Err(err) => {
                self.stats.record_parse_error();
                error!(error = %err, len = text.len(), "dropping malformed inbound message");
            }
        }
    }

    /// Enqueue an already-decoded message and drain
    pub async fn receive(&self, message: Message) {
        self.stats.record_received();
        trace!(id = %message.id, action = %message.action, "message received");
        self.resolve_pending(&message);
        self.queue.lock().push_back(message);
        self.drain_queue().await;
    }

    fn resolve_pending(&self, message: &Message) {
        if !message.kind.is_reply() {
            return;
        }
        let Some(correlation_id) = message.correlation_id.as_deref() else {
            return;
        };
        let waiter = self.pending.lock().remove(correlation_id);
        if let Some(tx) = waiter {
            if tx.send(message.clone()).is_err() {
                trace!(correlation_id, "requester went away before the reply arrived");
            }
        }
    }

    /// Deliver every queued message, one at a time
    ///
    /// Returns immediately if a drain is already running; that drain picks up
    /// whatever was queued.
    pub async fn drain_queue(&self) {
        loop {
            let Some(guard) = DrainGuard::acquire(&self.draining) else {
                return;
            };

            while let Some(message) = self.pop_front() {
                self.deliver(message).await;
            }

            drop(guard);

            // A message queued between the last pop and the release would
            // otherwise sit until the next receive.
            if self.queue.lock().is_empty() {
                return;
            }
        }
    }

    fn pop_front(&self) -> Option<Message> {
        self.queue.lock().pop_front()
    }

    async fn deliver(&self, message: Message) {
        self.stats.record_dispatched();
        let handlers = self.registry.lock().delivery_list(&message.action);

        for (index, handler) in handlers.iter().enumerate() {
            let outcome = AssertUnwindSafe(handler.handle(&message))
                .catch_unwind()
                .await;

            let err = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(panic) => HandlerError::Panicked(panic_message(panic.as_ref())),
            };

            self.stats.record_handler_error();
            match self.failure_policy {
                HandlerFailurePolicy::Abort => {
                    warn!(
                        id = %message.id,
                        action = %message.action,
                        error = %err,
                        skipped = handlers.len() - index - 1,
                        "handler failed; skipping remaining handlers for this message"
                    );
                    return;
                }
                HandlerFailurePolicy::Continue => {
                    warn!(id = %message.id, action = %message.action, error = %err, "handler failed");
                }
            }
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    // ===== Registration =====

    pub fn register_handler(&self, action: &str, handler: HandlerRef) -> bool {
        self.registry.lock().register(action, handler)
    }

    pub fn unregister_handler(&self, action: &str, handler: &HandlerRef) -> bool {
        self.registry.lock().unregister(action, handler)
    }

    pub fn register_global_handler(&self, handler: HandlerRef) -> bool {
        self.registry.lock().register_global(handler)
    }

    pub fn unregister_global_handler(&self, handler: &HandlerRef) -> bool {
        self.registry.lock().unregister_global(handler)
    }

    pub fn handler_count(&self, action: &str) -> usize {
        self.registry.lock().handler_count(action)
    }

    pub fn has_handlers_for(&self, action: &str) -> bool {
        self.registry.lock().has_action(action)
    }

    pub fn global_handler_count(&self) -> usize {
        self.registry.lock().global_count()
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingChannel;
    use crate::registry::handler_fn;
    use serde_json::json;

    fn recording_bridge() -> (Arc<RecordingChannel>, Bridge) {
        let channel = Arc::new(RecordingChannel::new());
        let bridge = Bridge::with_defaults(channel.clone()).with_template(CommandTemplate::raw());
        (channel, bridge)
    }

    #[test]
    fn test_defaults_agree_with_default_config() {
        let channel = Arc::new(RecordingChannel::new());
        let defaults = Bridge::with_defaults(channel.clone());
        let configured = Bridge::new(channel, &BridgeConfig::default()).unwrap();

        assert_eq!(defaults.failure_policy(), configured.failure_policy());
        assert_eq!(defaults.request_timeout(), configured.request_timeout());
        assert_eq!(defaults.request_timeout(), Some(Duration::from_millis(5000)));
    }

    #[test]
    fn test_new_applies_config() {
        let config = BridgeConfig::default()
            .with_handler_failure(HandlerFailurePolicy::Continue)
            .with_request_timeout_ms(0);
        let bridge = Bridge::new(Arc::new(RecordingChannel::new()), &config).unwrap();

        assert_eq!(bridge.failure_policy(), HandlerFailurePolicy::Continue);
        assert_eq!(bridge.request_timeout(), None);
    }

    #[tokio::test]
    async fn test_send_fills_timestamp() {
        let (channel, bridge) = recording_bridge();
        bridge.send(Message::event("c1", "ping")).await.unwrap();

        let sent = channel.messages();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn test_send_keeps_explicit_timestamp() {
        let (channel, bridge) = recording_bridge();
        bridge
            .send(Message::event("c1", "ping").with_timestamp(42))
            .await
            .unwrap();
        assert_eq!(channel.messages()[0].timestamp, Some(42));
    }

    #[tokio::test]
    async fn test_send_uses_template() {
        let channel = Arc::new(RecordingChannel::new());
        let bridge = Bridge::with_defaults(channel.clone());
        bridge
            .send(Message::event("c1", "ping").with_timestamp(1))
            .await
            .unwrap();

        assert_eq!(
            channel.commands()[0],
            r#"call tether#receive('{"id":"c1","type":"event","action":"ping","timestamp":1}')"#
        );
    }

    #[tokio::test]
    async fn test_send_returns_channel_result() {
        let (channel, bridge) = recording_bridge();
        channel.respond_with(json!({"ok": true}));
        let value = bridge.send(Message::event("c1", "ping")).await.unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let (channel, bridge) = recording_bridge();
        channel.fail_with("nvim exited");

        let err = bridge.send(Message::event("c1", "ping")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
        assert_eq!(bridge.stats().send_failures, 1);
        assert_eq!(bridge.stats().sent, 0);
    }

    #[tokio::test]
    async fn test_parse_error_is_swallowed() {
        let (_channel, bridge) = recording_bridge();
        bridge.receive_serialized("not valid json").await;

        assert_eq!(bridge.stats().parse_errors, 1);
        assert_eq!(bridge.queue_len(), 0);
        assert!(!bridge.is_draining());
    }

    #[tokio::test]
    async fn test_drain_without_handlers_empties_queue() {
        let (_channel, bridge) = recording_bridge();
        bridge
            .receive_serialized(r#"{"id":"a","type":"event","action":"nobody"}"#)
            .await;
        assert_eq!(bridge.queue_len(), 0);
        assert_eq!(bridge.stats().dispatched, 1);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stick_queue() {
        let (_channel, bridge) = recording_bridge();
        bridge.register_handler(
            "boom",
            handler_fn(|_msg| async { Err(HandlerError::failed("nope")) }),
        );

        bridge.receive(Message::event("a", "boom")).await;
        bridge.receive(Message::event("a", "boom")).await;

        assert_eq!(bridge.stats().handler_errors, 2);
        assert_eq!(bridge.queue_len(), 0);
        assert!(!bridge.is_draining());
    }

    #[test]
    fn test_drain_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = DrainGuard::acquire(&flag).unwrap();
            assert!(DrainGuard::acquire(&flag).is_none());
        }
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");

        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
