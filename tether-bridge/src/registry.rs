//! Handler registration
//!
//! Handlers are kept in ordered sets keyed by identity: registering the same
//! `Arc` twice is a no-op, and delivery follows registration order. Each
//! action has its own set, and one global set receives every message.

use crate::error::HandlerResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tether_types::Message;

/// Receives messages delivered by the bridge
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: &Message) -> HandlerResult;
}

/// Shared handler reference; identity is the pointer of the `Arc`
pub type HandlerRef = Arc<dyn Handler>;

/// A handler backed by an async closure
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, message: &Message) -> HandlerResult {
        (self.f)(message.clone()).await
    }
}

/// Wrap an async closure into a [`HandlerRef`]
///
/// Keep the returned `Arc` around to unregister it later.
pub fn handler_fn<F, Fut>(f: F) -> HandlerRef
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

fn same_handler(a: &HandlerRef, b: &HandlerRef) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn insert_unique(set: &mut Vec<HandlerRef>, handler: HandlerRef) -> bool {
    if set.iter().any(|h| same_handler(h, &handler)) {
        return false;
    }
    set.push(handler);
    true
}

fn remove_handler(set: &mut Vec<HandlerRef>, handler: &HandlerRef) -> bool {
    let before = set.len();
    set.retain(|h| !same_handler(h, handler));
    set.len() != before
}

/// Per-action and global handler sets
#[derive(Default)]
pub struct HandlerRegistry {
    by_action: HashMap<String, Vec<HandlerRef>>,
    global: Vec<HandlerRef>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one action; returns `false` if already present
    pub fn register(&mut self, action: &str, handler: HandlerRef) -> bool {
        insert_unique(self.by_action.entry(action.to_string()).or_default(), handler)
    }

    /// Unregister a handler; unknown actions and handlers are ignored
    ///
    /// Removing the last handler of an action drops the action's entry.
    pub fn unregister(&mut self, action: &str, handler: &HandlerRef) -> bool {
        let Some(set) = self.by_action.get_mut(action) else {
            return false;
        };
        let removed = remove_handler(set, handler);
        if set.is_empty() {
            self.by_action.remove(action);
        }
        removed
    }

    pub fn register_global(&mut self, handler: HandlerRef) -> bool {
        insert_unique(&mut self.global, handler)
    }

    pub fn unregister_global(&mut self, handler: &HandlerRef) -> bool {
        remove_handler(&mut self.global, handler)
    }

    /// Handlers for `action` in delivery order: action handlers, then globals
    pub fn delivery_list(&self, action: &str) -> Vec<HandlerRef> {
        self.by_action
            .get(action)
            .into_iter()
            .flatten()
            .chain(self.global.iter())
            .cloned()
            .collect()
    }

    pub fn handler_count(&self, action: &str) -> usize {
        self.by_action.get(action).map_or(0, Vec::len)
    }

    pub fn global_count(&self) -> usize {
        self.global.len()
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.by_action.contains_key(action)
    }

    pub fn actions(&self) -> impl Iterator<Item = &String> {
        self.by_action.keys()
    }
}
