//! Tether Runtime - reactive components rendered onto a remote surface
//!
//! This crate runs small reactive components whose output lives on the other
//! side of a [`tether_bridge::Bridge`]. It includes:
//!
//! - **Definitions**: state, computed values, watchers, methods, hooks and a
//!   render function, assembled with [`ComponentDef::builder`]
//! - **Instances**: the `Created -> Mounted -> Destroyed` lifecycle, state
//!   propagation and rendering
//! - **Render targets**: the [`RenderTarget`] seam that allocates and writes
//!   display surfaces
//! - **Remote dispatch**: [`ComponentRuntime`] answers `callMethod`,
//!   `setState`, `getState` and `component:destroy` messages
//!
//! ## Update propagation
//!
//! Every `update_state` runs the same pipeline:
//!
//! 1. Shallow-merge the partial state
//! 2. Recompute all computed values
//! 3. Fire watchers whose key changed, with `(new, old)`
//! 4. Render to the target (only while mounted)
//! 5. Run `on_updated`
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use tether_bridge::{Bridge, RecordingChannel};
//! use tether_runtime::{ComponentDef, ComponentRuntime, MemoryTargets};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let bridge = Arc::new(Bridge::with_defaults(Arc::new(RecordingChannel::new())));
//! let targets = Arc::new(MemoryTargets::new());
//! let runtime = ComponentRuntime::new(bridge, targets.clone());
//!
//! let counter = ComponentDef::builder("counter")
//!     .state(json!({"count": 0}))
//!     .method("increment", |ctx, _args| {
//!         let next = ctx.get_i64("count").unwrap_or(0) + 1;
//!         ctx.set("count", json!(next));
//!         Ok(json!(next))
//!     })
//!     .render(|view| vec![format!("Count: {}", view.get_i64("count").unwrap_or(0))])
//!     .build();
//!
//! let component = runtime.create(counter).unwrap();
//! component.mount().await.unwrap();
//! component.call_method("increment", &[]).await.unwrap();
//!
//! assert_eq!(targets.lines("counter").unwrap(), vec!["Count: 1"]);
//! # });
//! ```

pub mod component;
pub mod error;
pub mod instance;
pub mod runtime;
pub mod target;

pub use component::{
    ComponentBuilder, ComponentDef, ComputedFn, HookFn, MethodContext, MethodFn, RenderFn, State,
    View, WatchFn,
};
pub use error::{RenderError, RuntimeError, RuntimeResult};
pub use instance::{Component, Lifecycle};
pub use runtime::ComponentRuntime;
pub use target::{MemoryTargets, RenderTarget, TargetHandle};
