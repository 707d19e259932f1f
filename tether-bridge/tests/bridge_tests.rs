//! Integration tests for message delivery through the bridge

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tether_bridge::{
    handler_fn, Bridge, BridgeConfig, BridgeError, ChannelError, CommandTemplate,
    HandlerError, HandlerFailurePolicy, HandlerRef, HostChannel, RecordingChannel,
};
use tether_types::{ErrorPayload, Message, MessageType};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Channel whose peer immediately feeds every command back into the bridge
#[derive(Default)]
struct Loopback {
    bridge: OnceLock<Weak<Bridge>>,
}

#[async_trait]
impl HostChannel for Loopback {
    async fn execute(&self, command: &str) -> Result<Value, ChannelError> {
        let bridge = self
            .bridge
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| ChannelError::new("peer not attached"))?;
        bridge.receive_serialized(command).await;
        Ok(Value::Null)
    }
}

fn loopback_bridge() -> Arc<Bridge> {
    let channel = Arc::new(Loopback::default());
    let bridge =
        Arc::new(Bridge::with_defaults(channel.clone()).with_template(CommandTemplate::raw()));
    let _ = channel.bridge.set(Arc::downgrade(&bridge));
    bridge
}

/// Channel whose peer answers every request with a response or an error
#[derive(Default)]
struct Responder {
    bridge: OnceLock<Weak<Bridge>>,
}

#[async_trait]
impl HostChannel for Responder {
    async fn execute(&self, command: &str) -> Result<Value, ChannelError> {
        let bridge = self
            .bridge
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| ChannelError::new("peer not attached"))?;
        let request = Message::from_json(command).map_err(|e| ChannelError::new(e.to_string()))?;

        let reply = if request.action == "explode" {
            Message::reply_to(&request, MessageType::Error, "failed")
                .with_payload_of(&ErrorPayload::new("kaboom"))
                .map_err(|e| ChannelError::new(e.to_string()))?
        } else {
            Message::reply_to(&request, MessageType::Response, "echo")
                .with_payload(request.payload.clone().unwrap_or(Value::Null))
        };

        let text = reply.to_json().map_err(|e| ChannelError::new(e.to_string()))?;
        tokio::spawn(async move { bridge.receive_serialized(&text).await });
        Ok(Value::Null)
    }
}

fn responder_bridge() -> Arc<Bridge> {
    let channel = Arc::new(Responder::default());
    let bridge =
        Arc::new(Bridge::with_defaults(channel.clone()).with_template(CommandTemplate::raw()));
    let _ = channel.bridge.set(Arc::downgrade(&bridge));
    bridge
}

fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> HandlerRef {
    let log = log.clone();
    let label = label.to_string();
    handler_fn(move |msg: Message| {
        let log = log.clone();
        let label = label.clone();
        async move {
            log.lock().push(format!("{label}:{}", msg.id));
            Ok(())
        }
    })
}

#[tokio::test]
async fn test_send_reaches_registered_handler_once() {
    init_tracing();
    let bridge = loopback_bridge();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    bridge.register_handler(
        "inc",
        handler_fn(move |msg: Message| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().push(msg);
                Ok(())
            }
        }),
    );

    bridge
        .send(Message::action("c1", "inc").with_payload(json!({})))
        .await
        .unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].action, "inc");
    assert_eq!(seen[0].id, "c1");
}

#[tokio::test]
async fn test_malformed_input_logs_once_and_leaves_queue_empty() {
    init_tracing();
    let bridge = loopback_bridge();
    let log = Arc::new(Mutex::new(Vec::new()));
    bridge.register_global_handler(recorder(&log, "g"));

    bridge.receive_serialized("not valid json").await;

    assert_eq!(bridge.stats().parse_errors, 1);
    assert_eq!(bridge.stats().received, 0);
    assert_eq!(bridge.queue_len(), 0);
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_double_register_single_unregister_leaves_nothing() {
    let bridge = loopback_bridge();
    let log = Arc::new(Mutex::new(Vec::new()));
    let h = recorder(&log, "h");

    bridge.register_handler("x", h.clone());
    bridge.register_handler("x", h.clone());
    bridge.unregister_handler("x", &h);

    assert_eq!(bridge.handler_count("x"), 0);
    assert!(!bridge.has_handlers_for("x"));

    bridge.receive(Message::event("m", "x")).await;
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_duplicate_registration_delivers_once() {
    let bridge = loopback_bridge();
    let log = Arc::new(Mutex::new(Vec::new()));
    let h = recorder(&log, "h");
    let g = recorder(&log, "g");

    bridge.register_handler("x", h.clone());
    bridge.register_handler("x", h.clone());
    bridge.register_global_handler(g.clone());
    bridge.register_global_handler(g.clone());

    bridge.receive(Message::event("m1", "x")).await;
    assert_eq!(*log.lock(), vec!["h:m1", "g:m1"]);
}

#[tokio::test]
async fn test_unregister_unknown_targets_is_harmless() {
    let bridge = loopback_bridge();
    let h = handler_fn(|_msg| async { Ok(()) });

    assert!(!bridge.unregister_handler("never", &h));
    assert!(!bridge.unregister_global_handler(&h));
}

#[tokio::test]
async fn test_fifo_with_reentrant_receive() {
    let bridge = loopback_bridge();
    let log = Arc::new(Mutex::new(Vec::new()));

    // The first handler for "a" injects a new message mid-drain. It must be
    // delivered only after every handler for the current message has run.
    let weak = Arc::downgrade(&bridge);
    let log_clone = log.clone();
    bridge.register_handler(
        "a",
        handler_fn(move |msg: Message| {
            let weak = weak.clone();
            let log = log_clone.clone();
            async move {
                log.lock().push(format!("a1:{}", msg.id));
                if msg.id == "first" {
                    if let Some(bridge) = weak.upgrade() {
                        bridge.receive(Message::event("injected", "a")).await;
                    }
                }
                Ok(())
            }
        }),
    );
    bridge.register_handler("a", recorder(&log, "a2"));
    bridge.register_global_handler(recorder(&log, "g"));

    bridge.receive(Message::event("first", "a")).await;

    assert_eq!(
        *log.lock(),
        vec![
            "a1:first",
            "a2:first",
            "g:first",
            "a1:injected",
            "a2:injected",
            "g:injected",
        ]
    );
    assert_eq!(bridge.queue_len(), 0);
    assert!(!bridge.is_draining());
}

#[tokio::test]
async fn test_failing_handler_aborts_only_its_message() {
    let bridge = loopback_bridge();
    let log = Arc::new(Mutex::new(Vec::new()));

    bridge.register_handler(
        "x",
        handler_fn(|msg: Message| async move {
            if msg.id == "bad" {
                Err(HandlerError::failed("rejected"))
            } else {
                Ok(())
            }
        }),
    );
    bridge.register_handler("x", recorder(&log, "after"));
    bridge.register_global_handler(recorder(&log, "g"));

    bridge.receive(Message::event("bad", "x")).await;
    bridge.receive(Message::event("good", "x")).await;

    assert_eq!(*log.lock(), vec!["after:good", "g:good"]);
    assert_eq!(bridge.stats().handler_errors, 1);
}

#[tokio::test]
async fn test_continue_policy_keeps_delivering() {
    let channel = Arc::new(RecordingChannel::new());
    let config = BridgeConfig::default().with_handler_failure(HandlerFailurePolicy::Continue);
    let bridge = Bridge::new(channel, &config).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    bridge.register_handler(
        "x",
        handler_fn(|_msg| async { Err(HandlerError::failed("rejected")) }),
    );
    bridge.register_handler("x", recorder(&log, "after"));
    bridge.register_global_handler(recorder(&log, "g"));

    bridge.receive(Message::event("bad", "x")).await;

    assert_eq!(*log.lock(), vec!["after:bad", "g:bad"]);
    assert_eq!(bridge.stats().handler_errors, 1);
}

#[tokio::test]
async fn test_panicking_handler_does_not_wedge_the_bus() {
    init_tracing();
    let bridge = loopback_bridge();
    let log = Arc::new(Mutex::new(Vec::new()));

    bridge.register_handler(
        "x",
        handler_fn(|msg: Message| async move {
            if msg.id == "bad" {
                panic!("handler blew up");
            }
            Ok(())
        }),
    );
    bridge.register_global_handler(recorder(&log, "g"));

    bridge.receive(Message::event("bad", "x")).await;
    assert!(!bridge.is_draining());

    bridge.receive(Message::event("good", "x")).await;
    assert_eq!(*log.lock(), vec!["g:good"]);
}

#[tokio::test]
async fn test_request_resolves_with_matching_response() {
    let bridge = responder_bridge();
    let reply = bridge
        .request(Message::request("svc", "echo").with_payload(json!({"n": 3})))
        .await
        .unwrap();

    assert_eq!(reply.kind, MessageType::Response);
    assert_eq!(reply.payload, Some(json!({"n": 3})));
    assert!(reply.correlation_id.is_some());
    assert_eq!(bridge.pending_requests(), 0);
}

#[tokio::test]
async fn test_request_keeps_caller_correlation_id() {
    let bridge = responder_bridge();
    let reply = bridge
        .request(Message::request("svc", "echo").with_correlation_id("mine"))
        .await
        .unwrap();
    assert_eq!(reply.correlation_id.as_deref(), Some("mine"));
}

#[tokio::test]
async fn test_request_error_reply_becomes_remote_error() {
    let bridge = responder_bridge();
    let err = bridge
        .request(Message::request("svc", "explode"))
        .await
        .unwrap_err();

    match err {
        BridgeError::Remote { message, .. } => assert_eq!(message, "kaboom"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_replies_still_reach_handlers() {
    let bridge = responder_bridge();
    let log = Arc::new(Mutex::new(Vec::new()));
    bridge.register_handler("echo", recorder(&log, "echo"));

    bridge.request(Message::request("svc", "echo")).await.unwrap();

    // The reply is delivered on a spawned task; give it a turn to finish.
    for _ in 0..10 {
        if !log.lock().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(*log.lock(), vec!["echo:svc"]);
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out_without_reply() {
    let channel = Arc::new(RecordingChannel::new());
    let bridge = Bridge::with_defaults(channel.clone()).with_template(CommandTemplate::raw());

    let err = bridge
        .request_with_timeout(
            Message::action("c1", "callMethod"),
            Some(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::Timeout { .. }));
    assert_eq!(bridge.pending_requests(), 0);
    assert_eq!(bridge.stats().request_timeouts, 1);
    assert_eq!(channel.len(), 1);
}

#[tokio::test]
async fn test_request_transport_failure_clears_waiter() {
    let channel = Arc::new(RecordingChannel::new());
    channel.fail_with("host gone");
    let bridge = Bridge::with_defaults(channel);

    let err = bridge
        .request(Message::request("svc", "echo"))
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::Transport(_)));
    assert_eq!(bridge.pending_requests(), 0);
}

#[tokio::test]
async fn test_late_reply_after_timeout_is_ignored() {
    let channel = Arc::new(RecordingChannel::new());
    let bridge = Bridge::with_defaults(channel.clone()).with_template(CommandTemplate::raw());

    let err = bridge
        .request_with_timeout(
            Message::request("svc", "echo").with_correlation_id("late"),
            Some(Duration::from_millis(1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { .. }));

    let reply = Message::new("svc", MessageType::Response, "echo").with_correlation_id("late");
    bridge.receive(reply).await;
    assert_eq!(bridge.stats().received, 1);
    assert_eq!(bridge.queue_len(), 0);
}
